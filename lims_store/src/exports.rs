//! Instrument files rendered from what a process persisted: Echo pick lists
//! for normalization and pooling, sample sheets for sequencing runs.

use crate::errors::{StoreError, StoreResult};
use crate::graph::{
    composition_sources, container_location, get_composition, get_process, load_lineage,
    process_outputs,
};
use crate::steps::{concentration_from, pool_components};
use crate::LimsStore;
use lab_calc::normalization::{NormalizationPlan, NormalizedVolumes, NormalizedWell};
use lab_calc::pooling::{PoolComponent, PoolingResult};
use lab_formats::echo::{
    generate_pick_list, normalization_transfers, pooling_transfers, EchoWell, PickListRow,
    WaterSource,
};
use lab_formats::sample_sheet::{amplicon_row, shotgun_rows, IndexedLibrary, SampleSheet};
use lims_types::{
    CompositionId, ContainerLocation, PlateConfiguration, ProcessId, ValidationError, WellCoord,
};
use provenance::{
    Assay, Composition, CompositionDetail, CompositionKind, LineageGraph, Process, ProcessKind,
};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;

fn wrong_kind(expected: ProcessKind, process: &Process) -> StoreError {
    ValidationError::MismatchedParameters {
        kind: expected.to_string(),
        given: process.kind.to_string(),
    }
    .into()
}

/// Plate and well of a composition as the Echo sees it. Tubes are loaded
/// as a single well A1.
fn echo_location(conn: &Connection, composition: &Composition) -> StoreResult<(String, WellCoord)> {
    Ok(match container_location(conn, composition.container)? {
        ContainerLocation::Well {
            plate_external_id,
            coord,
            ..
        } => (plate_external_id, coord),
        ContainerLocation::Tube { external_id } => (external_id, WellCoord::new(1, 1)),
    })
}

/// Name a composition by the sample it came from. Controls repeat across
/// plates, so they are qualified by where they were plated.
fn sample_name(conn: &Connection, graph: &LineageGraph, composition: &Composition) -> StoreResult<String> {
    if let CompositionDetail::Pool { name, .. } = &composition.detail {
        return Ok(name.clone());
    }
    let samples = if composition.kind() == CompositionKind::Sample {
        vec![composition.id]
    } else {
        graph.ancestors_of_kind(composition.id, CompositionKind::Sample)
    };
    if let [sample] = samples.as_slice() {
        let sample = get_composition(conn, *sample)?;
        if let Some(detail) = sample.as_sample() {
            if let Some(id) = &detail.sample_id {
                return Ok(id.clone());
            }
            let (plate, well) = echo_location(conn, &sample)?;
            return Ok(format!("{}.{plate}.{well}", detail.content));
        }
    }
    let (plate, well) = echo_location(conn, composition)?;
    Ok(format!("{plate}.{well}"))
}

fn echo_well(conn: &Connection, graph: &LineageGraph, composition: &Composition) -> StoreResult<EchoWell> {
    let (plate, well) = echo_location(conn, composition)?;
    Ok(EchoWell {
        sample_name: sample_name(conn, graph, composition)?,
        plate,
        well,
    })
}

/// Shotgun libraries in a pool, descending through pools of pools, in
/// composition order.
fn pooled_libraries(conn: &Connection, pool: CompositionId) -> StoreResult<Vec<Composition>> {
    let mut stack = vec![pool];
    let mut libraries = BTreeSet::new();
    let mut seen = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        for component in pool_components(conn, id)? {
            let input = get_composition(conn, component.input)?;
            match input.kind() {
                CompositionKind::Pool => stack.push(input.id),
                CompositionKind::LibraryShotgun => {
                    libraries.insert(input.id);
                }
                _ => {}
            }
        }
    }
    libraries
        .into_iter()
        .map(|id| get_composition(conn, id))
        .collect()
}

fn primer_index(conn: &Connection, primer: CompositionId) -> StoreResult<(String, String)> {
    let composition = get_composition(conn, primer)?;
    let detail = composition.as_primer().ok_or_else(|| ValidationError::WrongCompositionKind {
        composition: primer,
        expected: CompositionKind::Primer.to_string(),
        actual: composition.kind().to_string(),
    })?;
    Ok((detail.index_name.clone(), detail.sequence.clone()))
}

impl LimsStore {
    /// Echo pick list of a normalization: sample then water into every
    /// normalized well.
    pub fn normalization_pick_list(
        &self,
        process: ProcessId,
        source_plate_type: &str,
        water: &WaterSource,
    ) -> StoreResult<Vec<PickListRow>> {
        let process = get_process(&self.conn, process)?;
        let record = process
            .parameters
            .as_normalization()
            .ok_or_else(|| wrong_kind(ProcessKind::Normalization, &process))?;
        let graph = load_lineage(&self.conn)?;
        let outputs = process_outputs(&self.conn, process.id)?;
        let Some(first) = outputs.first() else {
            return Ok(Vec::new());
        };
        let (destination, _) = echo_location(&self.conn, first)?;

        let mut wells = Vec::with_capacity(outputs.len());
        for output in &outputs {
            let CompositionDetail::NormalizedGdna {
                dna_volume_nl,
                water_volume_nl,
            } = output.detail
            else {
                continue;
            };
            let Some((input_id, _)) = composition_sources(&self.conn, output.id)?.into_iter().next() else {
                continue;
            };
            let input = get_composition(&self.conn, input_id)?;
            let concentration = match record.quantifications.get(&input_id) {
                Some(&q) => concentration_from(&self.conn, input_id, q)?.and_then(|c| c.concentration),
                None => None,
            };
            wells.push(NormalizedWell {
                input: echo_well(&self.conn, &graph, &input)?,
                concentration: concentration.unwrap_or_default(),
                volumes: NormalizedVolumes {
                    dna_volume_nl,
                    water_volume_nl,
                    flag: None,
                },
            });
        }
        let plan = NormalizationPlan {
            wells,
            skipped: Vec::new(),
        };
        let transfers = normalization_transfers(&plan, &destination, water);
        Ok(generate_pick_list(&transfers, source_plate_type))
    }

    /// Echo pick list of a pooling, spreading the pool over destination
    /// wells of at most `max_per_well_nl` each.
    pub fn pooling_pick_list(
        &self,
        process: ProcessId,
        source_plate_type: &str,
        destination_plate: &str,
        configuration: PlateConfiguration,
        max_per_well_nl: f64,
    ) -> StoreResult<Vec<PickListRow>> {
        let process = get_process(&self.conn, process)?;
        let record = process
            .parameters
            .as_pooling()
            .ok_or_else(|| wrong_kind(ProcessKind::Pooling, &process))?;
        let graph = load_lineage(&self.conn)?;
        let pool = process_outputs(&self.conn, process.id)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::unknown("pool of process", process.id))?;

        let mut components = Vec::new();
        for component in pool_components(&self.conn, pool.id)? {
            let input = get_composition(&self.conn, component.input)?;
            let concentration = record
                .inputs
                .iter()
                .find(|i| i.composition == component.input)
                .map(|i| i.concentration)
                .unwrap_or_default();
            components.push(PoolComponent {
                input: echo_well(&self.conn, &graph, &input)?,
                concentration,
                volume_nl: component.volume_nl,
                percentage: component.percentage,
                flag: None,
            });
        }
        let result = PoolingResult {
            components,
            total_volume_nl: pool.total_volume_nl,
            estimated_concentration: match pool.detail {
                CompositionDetail::Pool {
                    estimated_concentration,
                    ..
                } => estimated_concentration,
                _ => 0.0,
            },
        };
        let transfers = pooling_transfers(&result, destination_plate, configuration, max_per_well_nl)?;
        Ok(generate_pick_list(&transfers, source_plate_type))
    }

    /// Sample sheet of a sequencing run.
    pub fn sample_sheet(&self, process: ProcessId) -> StoreResult<SampleSheet> {
        let process = get_process(&self.conn, process)?;
        let run = process
            .parameters
            .as_sequencing()
            .ok_or_else(|| wrong_kind(ProcessKind::Sequencing, &process))?;
        let graph = load_lineage(&self.conn)?;

        let mut lanes = run.lanes.clone();
        lanes.sort_by_key(|l| l.lane);
        let mut rows = Vec::new();
        for lane in &lanes {
            let pool = get_composition(&self.conn, lane.pool)?;
            let CompositionDetail::Pool { name, .. } = &pool.detail else {
                return Err(ValidationError::WrongCompositionKind {
                    composition: pool.id,
                    expected: CompositionKind::Pool.to_string(),
                    actual: pool.kind().to_string(),
                }
                .into());
            };
            match run.assay {
                Assay::Amplicon => rows.push(amplicon_row(lane.lane, name, &run.experiment)),
                Assay::Metagenomics => {
                    let mut libraries = Vec::new();
                    for library in pooled_libraries(&self.conn, pool.id)? {
                        let CompositionDetail::LibraryShotgun { i5, i7 } = library.detail else {
                            continue;
                        };
                        let (plate, well) = echo_location(&self.conn, &library)?;
                        let (i5_name, i5_sequence) = primer_index(&self.conn, i5)?;
                        let (i7_name, i7_sequence) = primer_index(&self.conn, i7)?;
                        libraries.push(IndexedLibrary {
                            sample_name: sample_name(&self.conn, &graph, &library)?,
                            plate,
                            well: well.to_string(),
                            i7_name,
                            i7_sequence,
                            i5_name,
                            i5_sequence,
                            project: run.experiment.clone(),
                        });
                    }
                    rows.extend(shotgun_rows(lane.lane, &libraries, run.instrument));
                }
            }
        }

        Ok(SampleSheet {
            investigator: run.principal_investigator.clone(),
            experiment: run.experiment.clone(),
            run_name: run.run_name.clone(),
            date: process.run_date.date_naive(),
            assay: match run.assay {
                Assay::Amplicon => "TruSeq HT".to_string(),
                Assay::Metagenomics => "Metagenomics".to_string(),
            },
            chemistry: match run.assay {
                Assay::Amplicon => "Amplicon".to_string(),
                Assay::Metagenomics => "Default".to_string(),
            },
            fwd_cycles: run.fwd_cycles,
            rev_cycles: run.rev_cycles,
            contacts: run.contacts.clone(),
            rows,
        })
    }

    /// Sequencing lanes of a run as recorded, ordered by lane.
    pub fn sequencing_lanes(&self, process: ProcessId) -> StoreResult<Vec<(u8, CompositionId)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT lane_number, pool_composition_id FROM sequencing_lane WHERE process_id = ?1 ORDER BY lane_number",
        )?;
        let rows = stmt.query_map(params![process.0], |row| {
            Ok((row.get(0)?, CompositionId(row.get(1)?)))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
