//! Lab steps. Each step checks its labware, equipment and reagents, runs
//! the numeric engine it needs, and records one process with its outputs
//! in a single transaction.

use crate::errors::{StoreError, StoreResult};
use crate::graph::{
    check_sample_plating, check_volume, composition_label, consume_volume, container_composition,
    get_composition, get_process, insert_output_composition, insert_process, process_inputs,
    require_kind, PlatingCheck,
};
use crate::labware::{
    get_plate, insert_plate, insert_tube, plate_compositions, require_equipment, require_reagent,
    tube_composition, well_container,
};
use crate::LimsStore;
use itertools::Itertools;
use lab_calc::compression::{check_destination, compression_layout, SourcePlate};
use lab_calc::concentration::{compute_concentration, ng_per_ul_to_nm};
use lab_calc::normalization::{plan_normalization, NormalizationParameters, NormalizationPlan, SkipReason, VolumeFlag};
use lab_calc::pooling::{compute_pooling, PoolingInput, PoolingResult, PoolingStrategy};
use lims_types::{
    CapacityError, CompositionId, ConfigurationError, EquipmentKind, MissingDataError, Plate,
    PlateConfiguration, ProcessId, ReagentKind, ValidationError, WellCoord,
};
use log::{info, warn};
use provenance::{
    AmpliconLibraryParameters, Composition, CompositionDetail, CompositionKind,
    CompressionParameters, ConcentrationCalculation, ExtractionParameters, NormalizationRecord,
    PoolComponentRecord, PooledInput, PoolingRecord, Process, ProcessKind, ProcessParameters,
    QuantificationParameters, SampleDetail, SequencingParameters, ShotgunLibraryParameters,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct PlatedWell {
    pub well: WellCoord,
    pub composition: CompositionId,
    pub content: String,
    pub check: PlatingCheck,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatingReport {
    pub process: Process,
    pub plate: Plate,
    pub wells: Vec<PlatedWell>,
}

impl PlatingReport {
    /// Wells whose sample was already plated elsewhere.
    pub fn conflicts(&self) -> impl Iterator<Item = &PlatedWell> + '_ {
        self.wells.iter().filter(|w| !w.check.is_clear())
    }
}

/// Outputs of a step that fills a new plate.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub process: Process,
    pub plate: Plate,
    pub outputs: Vec<(WellCoord, CompositionId)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantificationReport {
    pub process: Process,
    pub calculations: Vec<ConcentrationCalculation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationReport {
    pub process: Process,
    pub plate: Plate,
    pub outputs: Vec<(WellCoord, CompositionId)>,
    pub flagged: Vec<(WellCoord, VolumeFlag)>,
    pub skipped: Vec<(WellCoord, SkipReason)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolingReport {
    pub process: Process,
    pub pool: Composition,
    pub result: PoolingResult<CompositionId>,
}

/// Live compositions of a plate, all of one of the `expected` kinds.
fn plate_inputs(
    conn: &Connection,
    plate: &Plate,
    expected: &[CompositionKind],
) -> StoreResult<Vec<(WellCoord, Composition)>> {
    if plate.discarded {
        return Err(ValidationError::Other(format!("plate '{}' is discarded", plate.external_id)).into());
    }
    let compositions = plate_compositions(conn, plate.id)?;
    for (_, c) in &compositions {
        require_kind(c, expected)?;
    }
    Ok(compositions)
}

fn step_report(process: Process, plate: Plate, outputs: Vec<(WellCoord, CompositionId)>) -> StepReport {
    info!(
        "{} process {} filled {} wells of '{}'",
        process.kind,
        process.id,
        outputs.len(),
        plate.external_id
    );
    StepReport {
        process,
        plate,
        outputs,
    }
}

fn concentration_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConcentrationCalculation> {
    Ok(ConcentrationCalculation {
        composition: CompositionId(row.get(0)?),
        quantification: ProcessId(row.get(1)?),
        raw: row.get(2)?,
        concentration: row.get(3)?,
        molar_concentration: row.get(4)?,
    })
}

const CONCENTRATION_COLUMNS: &str = "composition_id, quantification_process_id, raw_concentration, computed_concentration, molar_concentration";

/// Concentration from the most recent quantification of a composition.
pub(crate) fn current_concentration(
    conn: &Connection,
    composition: CompositionId,
) -> StoreResult<Option<ConcentrationCalculation>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CONCENTRATION_COLUMNS} FROM concentration_calculation WHERE composition_id = ?1 \
                 ORDER BY quantification_process_id DESC LIMIT 1"
            ),
            params![composition.0],
            concentration_row,
        )
        .optional()?)
}

pub(crate) fn concentration_from(
    conn: &Connection,
    composition: CompositionId,
    quantification: ProcessId,
) -> StoreResult<Option<ConcentrationCalculation>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CONCENTRATION_COLUMNS} FROM concentration_calculation \
                 WHERE composition_id = ?1 AND quantification_process_id = ?2"
            ),
            params![composition.0, quantification.0],
            concentration_row,
        )
        .optional()?)
}

/// Mass concentration to pool a composition by: its latest measurement, or
/// for pools not measured since, the estimate made when it was pooled.
fn pooling_concentration(conn: &Connection, composition: &Composition) -> StoreResult<Option<f64>> {
    if let Some(c) = current_concentration(conn, composition.id)?.and_then(|c| c.concentration) {
        return Ok(Some(c));
    }
    Ok(match composition.detail {
        CompositionDetail::Pool {
            estimated_concentration,
            ..
        } => Some(estimated_concentration),
        _ => None,
    })
}

fn quantify_tx(
    conn: &Connection,
    readings: &[(CompositionId, f64)],
    parameters: QuantificationParameters,
    operator: &str,
) -> StoreResult<QuantificationReport> {
    if readings.is_empty() {
        return Err(ValidationError::NoInputs("quantification").into());
    }
    // Compute everything before the first write.
    let computed = readings
        .iter()
        .map(|&(composition, raw)| {
            let concentration = compute_concentration(raw, &parameters.curve)?;
            let molar = parameters
                .fragment_size_bp
                .map(|size| ng_per_ul_to_nm(concentration, size))
                .transpose()?;
            Ok((composition, raw, concentration, molar))
        })
        .collect::<StoreResult<Vec<_>>>()?;

    let inputs: Vec<_> = readings.iter().map(|(c, _)| *c).collect();
    let process = insert_process(
        conn,
        ProcessKind::Quantification,
        &inputs,
        operator,
        &ProcessParameters::Quantification(parameters),
    )?;
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO concentration_calculation({CONCENTRATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
    ))?;
    let mut calculations = Vec::with_capacity(computed.len());
    for (composition, raw, concentration, molar) in computed {
        stmt.execute(params![composition.0, process.id.0, raw, concentration, molar])?;
        calculations.push(ConcentrationCalculation {
            composition,
            quantification: process.id,
            raw,
            concentration: Some(concentration),
            molar_concentration: molar,
        });
    }
    info!(
        "quantification process {} measured {} compositions",
        process.id,
        calculations.len()
    );
    Ok(QuantificationReport {
        process,
        calculations,
    })
}

fn allocate_primer_combinations(
    conn: &Connection,
    primer_set: &str,
    requested: usize,
) -> StoreResult<Vec<(CompositionId, CompositionId)>> {
    let (set_id, next): (i64, i64) = conn
        .query_row(
            "SELECT primer_set_id, next_combination FROM primer_set WHERE external_id = ?1",
            params![primer_set],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::unknown("primer set", primer_set))?;
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM primer_set_combination WHERE primer_set_id = ?1",
        params![set_id],
        |row| row.get(0),
    )?;
    let remaining = usize::try_from(total - next).unwrap_or(0);
    if requested > remaining {
        return Err(CapacityError::PrimerSetExhausted {
            primer_set: primer_set.to_string(),
            remaining,
            requested,
        }
        .into());
    }
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT i5_composition_id, i7_composition_id FROM primer_set_combination
        WHERE primer_set_id = ?1 AND combination_index >= ?2
        ORDER BY combination_index LIMIT ?3
        "#,
    )?;
    let combinations = stmt
        .query_map(params![set_id, next, requested as i64], |row| {
            Ok((CompositionId(row.get(0)?), CompositionId(row.get(1)?)))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    conn.execute(
        "UPDATE primer_set SET next_combination = ?1 WHERE primer_set_id = ?2",
        params![next + requested as i64, set_id],
    )?;
    Ok(combinations)
}

fn pool_tx(
    conn: &Connection,
    pool_name: &str,
    inputs: Vec<Composition>,
    strategy: &PoolingStrategy,
    operator: &str,
) -> StoreResult<PoolingReport> {
    let pooling_inputs = inputs
        .iter()
        .map(|c| -> StoreResult<PoolingInput<_>> {
            let Some(concentration) = pooling_concentration(conn, c)? else {
                return Err(MissingDataError::Concentration {
                    input: composition_label(conn, c)?,
                }
                .into());
            };
            Ok(PoolingInput {
                input: c.id,
                concentration: Some(concentration),
            })
        })
        .collect::<StoreResult<Vec<_>>>()?;
    let result = compute_pooling(strategy, &pooling_inputs)?;
    for (input, component) in inputs.iter().zip(&result.components) {
        check_volume(conn, input.container, component.volume_nl)?;
        if let Some(flag) = component.flag {
            warn!(
                "pool '{pool_name}': {} flagged {flag}",
                composition_label(conn, input)?
            );
        }
    }

    let record = PoolingRecord::new(
        pool_name,
        strategy,
        result
            .components
            .iter()
            .map(|c| PooledInput {
                composition: c.input,
                concentration: c.concentration,
            })
            .collect(),
    );
    let ids: Vec<_> = inputs.iter().map(|c| c.id).collect();
    let process = insert_process(
        conn,
        ProcessKind::Pooling,
        &ids,
        operator,
        &ProcessParameters::Pooling(record),
    )?;
    let tube = insert_tube(conn, pool_name)?;
    let sources: Vec<_> = result
        .components
        .iter()
        .map(|c| (c.input, Some(c.volume_nl)))
        .collect();
    let pool = insert_output_composition(
        conn,
        &process,
        tube.container,
        CompositionDetail::Pool {
            name: pool_name.to_string(),
            is_pool_of_pools: strategy.combines_pools(),
            estimated_concentration: result.estimated_concentration,
        },
        result.total_volume_nl,
        &sources,
    )?;
    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO pool_composition_component(output_composition_id, input_composition_id, input_volume, percentage_of_output)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )?;
    for (input, component) in inputs.iter().zip(&result.components) {
        stmt.execute(params![
            pool.id.0,
            component.input.0,
            component.volume_nl,
            component.percentage
        ])?;
        consume_volume(conn, input.container, component.volume_nl)?;
    }
    info!(
        "pooled {} inputs into '{pool_name}' ({:.1} nL, ~{:.3} ng/uL)",
        result.components.len(),
        result.total_volume_nl,
        result.estimated_concentration
    );
    Ok(PoolingReport {
        process,
        pool,
        result,
    })
}

impl LimsStore {
    /// Plate samples into an existing plate. Every layout entry becomes a
    /// sample composition; entries whose sample already sits in a live well
    /// are plated anyway and reported in [`PlatingReport::conflicts`].
    pub fn plate_samples(
        &mut self,
        plate_external_id: &str,
        layout: &[(WellCoord, String)],
        operator: &str,
    ) -> StoreResult<PlatingReport> {
        if layout.is_empty() {
            return Err(ValidationError::NoInputs("sample plating").into());
        }
        let tx = self.immediate()?;
        let plate = get_plate(&tx, plate_external_id)?;
        if plate.discarded {
            return Err(ValidationError::Other(format!("plate '{plate_external_id}' is discarded")).into());
        }
        let process = insert_process(
            &tx,
            ProcessKind::SamplePlating,
            &[],
            operator,
            &ProcessParameters::SamplePlating,
        )?;
        let mut wells = Vec::with_capacity(layout.len());
        for (coord, content) in layout {
            let container = well_container(&tx, &plate, *coord)?;
            if container_composition(&tx, container)?.is_some() {
                return Err(ValidationError::WellAlreadyPlated {
                    plate: plate.external_id.clone(),
                    well: coord.to_string(),
                }
                .into());
            }
            let check = check_sample_plating(&tx, plate.id, *coord, content)?;
            for well in check.previous_plates.iter().chain(&check.same_plate) {
                warn!("'{content}' plated into {plate_external_id}:{coord} is also in {well}");
            }
            let detail = SampleDetail::from_plating_content(content);
            let composition = insert_output_composition(
                &tx,
                &process,
                container,
                CompositionDetail::Sample(detail),
                0.0,
                &[],
            )?;
            wells.push(PlatedWell {
                well: *coord,
                composition: composition.id,
                content: content.clone(),
                check,
            });
        }
        tx.commit()?;
        info!("plated {} wells of '{plate_external_id}'", wells.len());
        Ok(PlatingReport {
            process,
            plate,
            wells,
        })
    }

    /// Extract gDNA from every sample of a plate into a new plate of the
    /// same shape, well for well.
    pub fn extract_gdna(
        &mut self,
        sample_plate: &str,
        gdna_plate: &str,
        parameters: ExtractionParameters,
        operator: &str,
    ) -> StoreResult<StepReport> {
        let tx = self.immediate()?;
        let source = get_plate(&tx, sample_plate)?;
        require_equipment(&tx, &parameters.robot, EquipmentKind::EpMotion)?;
        require_equipment(&tx, &parameters.extraction_robot, EquipmentKind::KingFisher)?;
        require_reagent(&tx, &parameters.kit_lot, ReagentKind::ExtractionKit)?;
        let samples = plate_inputs(&tx, &source, &[CompositionKind::Sample])?;
        if samples.is_empty() {
            return Err(ValidationError::NoInputs("gDNA extraction").into());
        }
        let volume_nl = parameters.volume_nl;
        let ids: Vec<_> = samples.iter().map(|(_, c)| c.id).collect();
        let process = insert_process(
            &tx,
            ProcessKind::GdnaExtraction,
            &ids,
            operator,
            &ProcessParameters::GdnaExtraction(parameters),
        )?;
        let destination = insert_plate(&tx, gdna_plate, source.configuration)?;
        let mut outputs = Vec::with_capacity(samples.len());
        for (coord, sample) in &samples {
            let container = well_container(&tx, &destination, *coord)?;
            let gdna = insert_output_composition(
                &tx,
                &process,
                container,
                CompositionDetail::Gdna,
                volume_nl,
                &[(sample.id, None)],
            )?;
            outputs.push((*coord, gdna.id));
        }
        tx.commit()?;
        Ok(step_report(process, destination, outputs))
    }

    /// Interleave up to four gDNA plates into one plate of four times the
    /// wells. Empty source wells leave their destination well empty.
    pub fn compress_plates(
        &mut self,
        sources: &[&str],
        destination: &str,
        destination_configuration: Option<PlateConfiguration>,
        robot: &str,
        operator: &str,
    ) -> StoreResult<StepReport> {
        let tx = self.immediate()?;
        let plates = sources
            .iter()
            .map(|name| get_plate(&tx, name))
            .collect::<StoreResult<Vec<_>>>()?;
        require_equipment(&tx, robot, EquipmentKind::Mosquito)?;
        let mut contents = HashMap::new();
        let mut layouts = Vec::with_capacity(plates.len());
        let mut ids = Vec::new();
        for (index, plate) in plates.iter().enumerate() {
            let gdna = plate_inputs(&tx, plate, &[CompositionKind::Gdna])?;
            layouts.push(SourcePlate {
                configuration: plate.configuration,
                occupied: gdna.iter().map(|(coord, _)| *coord).collect(),
            });
            for (coord, c) in gdna {
                ids.push(c.id);
                contents.insert((index, coord), c);
            }
        }
        let layout = compression_layout(&layouts)?;
        if let (Some(actual), Some(first)) = (destination_configuration, plates.first()) {
            check_destination(first.configuration, actual)?;
        }
        if ids.is_empty() {
            return Err(ValidationError::NoInputs("compression").into());
        }

        let process = insert_process(
            &tx,
            ProcessKind::Compression,
            &ids,
            operator,
            &ProcessParameters::Compression(CompressionParameters {
                robot: robot.to_string(),
            }),
        )?;
        let plate = insert_plate(&tx, destination, layout.destination)?;
        let mut outputs = Vec::with_capacity(layout.wells.len());
        for well in &layout.wells {
            let Some(source) = contents.get(&(well.source_index, well.source)) else {
                continue;
            };
            let container = well_container(&tx, &plate, well.destination)?;
            let compressed = insert_output_composition(
                &tx,
                &process,
                container,
                CompositionDetail::CompressedGdna,
                source.total_volume_nl,
                &[(source.id, None)],
            )?;
            outputs.push((well.destination, compressed.id));
        }
        tx.commit()?;
        Ok(step_report(process, plate, outputs))
    }

    /// Quantify the wells of a plate from raw instrument readings.
    pub fn quantify_plate(
        &mut self,
        plate_external_id: &str,
        readings: &[(WellCoord, f64)],
        parameters: QuantificationParameters,
        operator: &str,
    ) -> StoreResult<QuantificationReport> {
        let tx = self.immediate()?;
        let plate = get_plate(&tx, plate_external_id)?;
        let compositions: HashMap<_, _> = plate_compositions(&tx, plate.id)?.into_iter().collect();
        let readings = readings
            .iter()
            .map(|(coord, raw)| {
                let c = compositions
                    .get(coord)
                    .ok_or_else(|| StoreError::unknown("well", format!("{plate_external_id}:{coord}")))?;
                Ok((c.id, *raw))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let report = quantify_tx(&tx, &readings, parameters, operator)?;
        tx.commit()?;
        Ok(report)
    }

    /// Quantify pools held in tubes, by tube name.
    pub fn quantify_pools(
        &mut self,
        readings: &[(String, f64)],
        parameters: QuantificationParameters,
        operator: &str,
    ) -> StoreResult<QuantificationReport> {
        let tx = self.immediate()?;
        let readings = readings
            .iter()
            .map(|(name, raw)| {
                let pool = tube_composition(&tx, name)?;
                require_kind(&pool, &[CompositionKind::Pool])?;
                Ok((pool.id, *raw))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let report = quantify_tx(&tx, &readings, parameters, operator)?;
        tx.commit()?;
        Ok(report)
    }

    pub fn current_concentration(
        &self,
        composition: CompositionId,
    ) -> StoreResult<Option<ConcentrationCalculation>> {
        current_concentration(&self.conn, composition)
    }

    /// Every concentration a quantification process recorded.
    pub fn concentrations(&self, quantification: ProcessId) -> StoreResult<Vec<ConcentrationCalculation>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {CONCENTRATION_COLUMNS} FROM concentration_calculation \
             WHERE quantification_process_id = ?1 ORDER BY composition_id"
        ))?;
        let rows = stmt.query_map(params![quantification.0], concentration_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Normalize the gDNA of a plate into a new plate, well for well.
    ///
    /// Concentrations come from `quantification`, or from the latest
    /// quantification of each well when none is given.
    pub fn normalize_plate(
        &mut self,
        plate_external_id: &str,
        destination: &str,
        quantification: Option<ProcessId>,
        parameters: NormalizationParameters,
        water_lot: &str,
        operator: &str,
    ) -> StoreResult<NormalizationReport> {
        let tx = self.immediate()?;
        let source = get_plate(&tx, plate_external_id)?;
        require_reagent(&tx, water_lot, ReagentKind::Water)?;
        let gdna = plate_inputs(
            &tx,
            &source,
            &[CompositionKind::Gdna, CompositionKind::CompressedGdna],
        )?;
        let mut quantifications = BTreeMap::new();
        let mut inputs = Vec::with_capacity(gdna.len());
        for (coord, c) in &gdna {
            let measured = match quantification {
                Some(q) => concentration_from(&tx, c.id, q)?,
                None => current_concentration(&tx, c.id)?,
            };
            let Some((q, concentration)) =
                measured.and_then(|m| m.concentration.map(|v| (m.quantification, v)))
            else {
                return Err(MissingDataError::Concentration {
                    input: format!("{plate_external_id}:{coord}"),
                }
                .into());
            };
            quantifications.insert(c.id, q);
            inputs.push((c.id, Some(concentration)));
        }
        let plan = plan_normalization(&inputs, &parameters)?;
        let by_id: HashMap<_, _> = gdna.iter().map(|(coord, c)| (c.id, (*coord, c))).collect();
        for well in &plan.wells {
            if let Some((_, input)) = by_id.get(&well.input) {
                check_volume(&tx, input.container, well.volumes.dna_volume_nl)?;
            }
        }

        let ids: Vec<_> = gdna.iter().map(|(_, c)| c.id).collect();
        let record = NormalizationRecord {
            parameters,
            quantifications,
            water_lot: water_lot.to_string(),
        };
        let process = insert_process(
            &tx,
            ProcessKind::Normalization,
            &ids,
            operator,
            &ProcessParameters::Normalization(record),
        )?;
        let plate = insert_plate(&tx, destination, source.configuration)?;
        let mut outputs = Vec::with_capacity(plan.wells.len());
        let mut flagged = Vec::new();
        for well in &plan.wells {
            let Some(&(coord, input)) = by_id.get(&well.input) else {
                continue;
            };
            let container = well_container(&tx, &plate, coord)?;
            let volumes = &well.volumes;
            let normalized = insert_output_composition(
                &tx,
                &process,
                container,
                CompositionDetail::NormalizedGdna {
                    dna_volume_nl: volumes.dna_volume_nl,
                    water_volume_nl: volumes.water_volume_nl,
                },
                volumes.dna_volume_nl + volumes.water_volume_nl,
                &[(input.id, Some(volumes.dna_volume_nl))],
            )?;
            consume_volume(&tx, input.container, volumes.dna_volume_nl)?;
            outputs.push((coord, normalized.id));
            if let Some(flag) = volumes.flag {
                warn!("{plate_external_id}:{coord} normalized with volume {flag}");
                flagged.push((coord, flag));
            }
        }
        let skipped = plan
            .skipped
            .iter()
            .filter_map(|s| by_id.get(&s.input).map(|(coord, _)| (*coord, s.reason)))
            .collect::<Vec<_>>();
        for (coord, reason) in &skipped {
            warn!("{plate_external_id}:{coord} skipped: {reason}");
        }
        tx.commit()?;
        info!(
            "normalization process {} filled {} wells of '{destination}' ({} flagged, {} skipped)",
            process.id,
            outputs.len(),
            flagged.len(),
            skipped.len()
        );
        Ok(NormalizationReport {
            process,
            plate,
            outputs,
            flagged,
            skipped,
        })
    }

    /// Recompute a normalization from its persisted parameters and the
    /// concentrations it was planned from.
    pub fn replay_normalization(&self, process: ProcessId) -> StoreResult<NormalizationPlan<CompositionId>> {
        let process = get_process(&self.conn, process)?;
        let record = process
            .parameters
            .as_normalization()
            .ok_or_else(|| ValidationError::MismatchedParameters {
                kind: ProcessKind::Normalization.to_string(),
                given: process.kind.to_string(),
            })?;
        let inputs = process_inputs(&self.conn, process.id)?
            .into_iter()
            .map(|c| {
                let concentration = match record.quantifications.get(&c) {
                    Some(&q) => concentration_from(&self.conn, c, q)?.and_then(|cc| cc.concentration),
                    None => None,
                };
                Ok((c, concentration))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(plan_normalization(&inputs, &record.parameters)?)
    }

    /// Sample volume drawn from each input of a normalization, by input id.
    pub fn normalization_volumes(&self, process: ProcessId) -> StoreResult<Vec<(CompositionId, f64)>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT s.source_composition_id, s.volume
            FROM composition c JOIN composition_source s ON s.composition_id = c.composition_id
            WHERE c.upstream_process_id = ?1 AND s.volume IS NOT NULL
            ORDER BY s.source_composition_id
            "#,
        )?;
        let rows = stmt.query_map(params![process.0], |row| {
            Ok((CompositionId(row.get(0)?), row.get(1)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// 16S library prep: every gDNA well is amplified with the barcoded
    /// primer in the same well of the primer plate.
    pub fn library_prep_16s(
        &mut self,
        gdna_plate: &str,
        destination: &str,
        parameters: AmpliconLibraryParameters,
        operator: &str,
    ) -> StoreResult<StepReport> {
        let tx = self.immediate()?;
        let source = get_plate(&tx, gdna_plate)?;
        let primer_plate = get_plate(&tx, &parameters.primer_plate)?;
        if primer_plate.configuration != source.configuration {
            return Err(ConfigurationError::WrongPlateConfiguration {
                plate: primer_plate.external_id,
                expected: source.configuration,
                actual: primer_plate.configuration,
            }
            .into());
        }
        require_equipment(&tx, &parameters.robot, EquipmentKind::EpMotion)?;
        require_reagent(&tx, &parameters.master_mix_lot, ReagentKind::MasterMix)?;
        require_reagent(&tx, &parameters.water_lot, ReagentKind::Water)?;
        let gdna = plate_inputs(
            &tx,
            &source,
            &[CompositionKind::Gdna, CompositionKind::CompressedGdna],
        )?;
        if gdna.is_empty() {
            return Err(ValidationError::NoInputs("16S library prep").into());
        }
        let primers: HashMap<_, _> = plate_inputs(&tx, &primer_plate, &[CompositionKind::Primer])?
            .into_iter()
            .collect();
        let pairs = gdna
            .iter()
            .map(|(coord, g)| {
                let primer = primers.get(coord).ok_or_else(|| {
                    MissingDataError::PrimerCombination(format!("{gdna_plate}:{coord}"))
                })?;
                Ok((*coord, g, primer))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let ids: Vec<_> = pairs
            .iter()
            .map(|(_, g, _)| g.id)
            .chain(pairs.iter().map(|(_, _, p)| p.id))
            .collect();
        let volume_nl = parameters.volume_nl;
        let process = insert_process(
            &tx,
            ProcessKind::LibraryPrep16S,
            &ids,
            operator,
            &ProcessParameters::LibraryPrep16S(parameters),
        )?;
        let plate = insert_plate(&tx, destination, source.configuration)?;
        let mut outputs = Vec::with_capacity(pairs.len());
        for (coord, g, primer) in pairs {
            let barcode = primer
                .as_primer()
                .map(|p| p.sequence.clone())
                .unwrap_or_default();
            let container = well_container(&tx, &plate, coord)?;
            let library = insert_output_composition(
                &tx,
                &process,
                container,
                CompositionDetail::Library16S {
                    primer: primer.id,
                    barcode,
                },
                volume_nl,
                &[(g.id, None), (primer.id, None)],
            )?;
            outputs.push((coord, library.id));
        }
        tx.commit()?;
        Ok(step_report(process, plate, outputs))
    }

    /// Shotgun library prep: every normalized gDNA well gets the next unused
    /// i5/i7 combination of the primer set.
    pub fn library_prep_shotgun(
        &mut self,
        normalized_plate: &str,
        destination: &str,
        parameters: ShotgunLibraryParameters,
        operator: &str,
    ) -> StoreResult<StepReport> {
        let tx = self.immediate()?;
        let source = get_plate(&tx, normalized_plate)?;
        require_reagent(&tx, &parameters.kapa_lot, ReagentKind::KapaHyperPlus)?;
        require_reagent(&tx, &parameters.stub_lot, ReagentKind::Stubs)?;
        let normalized = plate_inputs(&tx, &source, &[CompositionKind::NormalizedGdna])?;
        if normalized.is_empty() {
            return Err(ValidationError::NoInputs("shotgun library prep").into());
        }
        let combinations = allocate_primer_combinations(&tx, &parameters.primer_set, normalized.len())?;

        let mut seen = HashSet::new();
        let ids: Vec<_> = normalized
            .iter()
            .map(|(_, c)| c.id)
            .chain(combinations.iter().flat_map(|&(i5, i7)| [i5, i7]))
            .filter(|id| seen.insert(*id))
            .collect();
        let volume_nl = parameters.volume_nl;
        let process = insert_process(
            &tx,
            ProcessKind::LibraryPrepShotgun,
            &ids,
            operator,
            &ProcessParameters::LibraryPrepShotgun(parameters),
        )?;
        let plate = insert_plate(&tx, destination, source.configuration)?;
        let mut outputs = Vec::with_capacity(normalized.len());
        for ((coord, input), (i5, i7)) in normalized.iter().zip(combinations) {
            let container = well_container(&tx, &plate, *coord)?;
            let library = insert_output_composition(
                &tx,
                &process,
                container,
                CompositionDetail::LibraryShotgun { i5, i7 },
                volume_nl,
                &[(input.id, None), (i5, None), (i7, None)],
            )?;
            outputs.push((*coord, library.id));
        }
        tx.commit()?;
        Ok(step_report(process, plate, outputs))
    }

    /// Pool every library of the given plates into a new tube named
    /// `pool_name`.
    pub fn pool_plates(
        &mut self,
        pool_name: &str,
        plates: &[&str],
        strategy: &PoolingStrategy,
        operator: &str,
    ) -> StoreResult<PoolingReport> {
        if strategy.combines_pools() {
            return Err(ValidationError::WrongPoolingInputs {
                algorithm: strategy.name().to_string(),
                inputs: "library wells",
            }
            .into());
        }
        let tx = self.immediate()?;
        let mut inputs = Vec::new();
        for name in plates {
            let plate = get_plate(&tx, name)?;
            let libraries = plate_inputs(
                &tx,
                &plate,
                &[CompositionKind::Library16S, CompositionKind::LibraryShotgun],
            )?;
            inputs.extend(libraries.into_iter().map(|(_, c)| c));
        }
        let report = pool_tx(&tx, pool_name, inputs, strategy, operator)?;
        tx.commit()?;
        Ok(report)
    }

    /// Combine existing pools, by tube name, into a pool of pools.
    pub fn pool_pools(
        &mut self,
        pool_name: &str,
        pools: &[&str],
        strategy: &PoolingStrategy,
        operator: &str,
    ) -> StoreResult<PoolingReport> {
        if !strategy.combines_pools() {
            return Err(ValidationError::WrongPoolingInputs {
                algorithm: strategy.name().to_string(),
                inputs: "existing pools",
            }
            .into());
        }
        let tx = self.immediate()?;
        let inputs = pools
            .iter()
            .map(|name| {
                let pool = tube_composition(&tx, name)?;
                require_kind(&pool, &[CompositionKind::Pool])?;
                Ok(pool)
            })
            .collect::<StoreResult<Vec<_>>>()?;
        let report = pool_tx(&tx, pool_name, inputs, strategy, operator)?;
        tx.commit()?;
        Ok(report)
    }

    /// Recompute a pooling from its persisted algorithm, parameters and
    /// input concentrations.
    pub fn replay_pooling(&self, process: ProcessId) -> StoreResult<PoolingResult<CompositionId>> {
        let process = get_process(&self.conn, process)?;
        let record = process
            .parameters
            .as_pooling()
            .ok_or_else(|| ValidationError::MismatchedParameters {
                kind: ProcessKind::Pooling.to_string(),
                given: process.kind.to_string(),
            })?;
        let strategy = record.strategy()?;
        let inputs: Vec<_> = record
            .inputs
            .iter()
            .map(|i| PoolingInput {
                input: i.composition,
                concentration: Some(i.concentration),
            })
            .collect();
        Ok(compute_pooling(&strategy, &inputs)?)
    }

    /// Components of a pool in pooling order.
    pub fn pool_components(&self, pool: CompositionId) -> StoreResult<Vec<PoolComponentRecord>> {
        get_composition(&self.conn, pool)?;
        pool_components(&self.conn, pool)
    }

    /// Record a sequencing run over pools assigned to lanes.
    pub fn sequence(&mut self, parameters: SequencingParameters, operator: &str) -> StoreResult<Process> {
        let tx = self.immediate()?;
        require_equipment(&tx, &parameters.sequencer, EquipmentKind::Sequencer)?;
        let mut lanes = HashSet::new();
        for lane in &parameters.lanes {
            if !lanes.insert(lane.lane) {
                return Err(ValidationError::Other(format!("lane {} is assigned twice", lane.lane)).into());
            }
            let pool = get_composition(&tx, lane.pool)?;
            require_kind(&pool, &[CompositionKind::Pool])?;
        }
        let pools: Vec<_> = parameters.lanes.iter().map(|l| l.pool).unique().collect();
        let process = insert_process(
            &tx,
            ProcessKind::Sequencing,
            &pools,
            operator,
            &ProcessParameters::Sequencing(parameters.clone()),
        )?;
        let mut stmt = tx.prepare_cached(
            "INSERT INTO sequencing_lane(process_id, lane_number, pool_composition_id) VALUES (?1, ?2, ?3)",
        )?;
        for lane in &parameters.lanes {
            stmt.execute(params![process.id.0, lane.lane, lane.pool.0])?;
        }
        drop(stmt);
        tx.commit()?;
        info!(
            "sequencing run '{}' recorded as process {} over {} lanes",
            parameters.run_name,
            process.id,
            parameters.lanes.len()
        );
        Ok(process)
    }
}

pub(crate) fn pool_components(conn: &Connection, pool: CompositionId) -> StoreResult<Vec<PoolComponentRecord>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT output_composition_id, input_composition_id, input_volume, percentage_of_output
        FROM pool_composition_component WHERE output_composition_id = ?1 ORDER BY rowid
        "#,
    )?;
    let rows = stmt.query_map(params![pool.0], |row| {
        Ok(PoolComponentRecord {
            output: CompositionId(row.get(0)?),
            input: CompositionId(row.get(1)?),
            volume_nl: row.get(2)?,
            percentage: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use lab_calc::concentration::CurveParameters;
    use lab_calc::pooling::{EqualVolumeParams, PoolOfPoolsParams};
    use lims_types::LimsError;
    use pretty_assertions::assert_eq;
    use provenance::QuantificationMethod;
    use std::collections::BTreeMap;

    fn well(s: &str) -> WellCoord {
        s.parse().unwrap()
    }

    fn linear() -> QuantificationParameters {
        QuantificationParameters {
            method: QuantificationMethod::PicoGreen,
            curve: CurveParameters::Linear {
                slope: 0.1,
                intercept: 0.0,
                min_raw: 0.0,
                max_raw: 10_000.0,
            },
            fragment_size_bp: None,
        }
    }

    /// A store with a 96-well gDNA plate "gdna" holding three samples.
    fn gdna_store() -> LimsStore {
        gdna_store_with_volume(70_000.0)
    }

    fn gdna_store_with_volume(volume_nl: f64) -> LimsStore {
        let mut store = LimsStore::open_in_memory().unwrap();
        store.register_equipment("ep1", EquipmentKind::EpMotion).unwrap();
        store.register_equipment("kf1", EquipmentKind::KingFisher).unwrap();
        store.register_reagent("kit1", ReagentKind::ExtractionKit, "test").unwrap();
        store.register_reagent("water1", ReagentKind::Water, "test").unwrap();
        store.create_plate("samples", PlateConfiguration::PLATE_96).unwrap();
        let layout = vec![
            (well("A1"), "1.SKB1.640202".to_string()),
            (well("A2"), "1.SKB2.640194".to_string()),
            (well("B1"), String::new()),
        ];
        store.plate_samples("samples", &layout, "test").unwrap();
        store
            .extract_gdna(
                "samples",
                "gdna",
                ExtractionParameters {
                    robot: "ep1".to_string(),
                    extraction_robot: "kf1".to_string(),
                    kit_lot: "kit1".to_string(),
                    volume_nl,
                },
                "test",
            )
            .unwrap();
        store
    }

    #[test]
    fn test_replating_occupied_well_rejected() {
        let mut store = gdna_store();
        let err = store
            .plate_samples("samples", &[(well("A1"), "x".to_string())], "test")
            .unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::Validation(ValidationError::WellAlreadyPlated { .. }))
        ));
    }

    #[test]
    fn test_plating_conflicts_reported() {
        let mut store = gdna_store();
        store.create_plate("samples2", PlateConfiguration::PLATE_96).unwrap();
        let report = store
            .plate_samples(
                "samples2",
                &[
                    (well("A1"), "1.SKB1.640202".to_string()),
                    (well("A2"), "blank".to_string()),
                    (well("A3"), "new.sample".to_string()),
                    (well("A4"), "new.sample".to_string()),
                ],
                "test",
            )
            .unwrap();
        let conflicts: Vec<_> = report.conflicts().map(|w| w.well.to_string()).collect();
        assert_eq!(conflicts, vec!["A1", "A4"]);
        assert_eq!(report.wells[0].check.previous_plates[0].to_string(), "samples:A1");
        assert_eq!(report.wells[3].check.same_plate[0].to_string(), "samples2:A3");

        // Discarded plates no longer count.
        store.discard_plate("samples").unwrap();
        let check = store
            .check_sample_plating("samples2", well("B1"), "1.SKB1.640202")
            .unwrap();
        assert!(check.previous_plates.is_empty());
        assert_eq!(check.same_plate.len(), 1);
    }

    #[test]
    fn test_extraction_checks_equipment() {
        let mut store = gdna_store();
        store.create_plate("more", PlateConfiguration::PLATE_96).unwrap();
        store
            .plate_samples("more", &[(well("A1"), "s".to_string())], "test")
            .unwrap();
        let err = store
            .extract_gdna(
                "more",
                "gdna2",
                ExtractionParameters {
                    robot: "kf1".to_string(),
                    extraction_robot: "kf1".to_string(),
                    kit_lot: "kit1".to_string(),
                    volume_nl: 70_000.0,
                },
                "test",
            )
            .unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::Configuration(ConfigurationError::WrongEquipment { .. }))
        ));
        assert!(matches!(store.plate("gdna2"), Err(StoreError::UnknownId { .. })));
    }

    #[test]
    fn test_requantification_wins() {
        let mut store = gdna_store();
        let first = store
            .quantify_plate("gdna", &[(well("A1"), 100.0), (well("A2"), 200.0)], linear(), "test")
            .unwrap();
        let second = store
            .quantify_plate("gdna", &[(well("A1"), 300.0)], linear(), "test")
            .unwrap();
        let a1 = first.calculations[0].composition;
        let current = store.current_concentration(a1).unwrap().unwrap();
        assert_eq!(current.quantification, second.process.id);
        assert_approx_eq!(current.concentration.unwrap(), 30.0);
        assert_eq!(store.concentrations(first.process.id).unwrap().len(), 2);
    }

    #[test]
    fn test_out_of_range_reading_writes_nothing() {
        let mut store = gdna_store();
        let err = store
            .quantify_plate("gdna", &[(well("A1"), 100.0), (well("A2"), 1e6)], linear(), "test")
            .unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::Validation(ValidationError::OutOfCalibrationRange { .. }))
        ));
        let gdna = store.plate_compositions("gdna").unwrap();
        assert_eq!(store.current_concentration(gdna[0].1.id).unwrap(), None);
    }

    #[test]
    fn test_normalize_and_replay() {
        let mut store = gdna_store();
        store
            .quantify_plate(
                "gdna",
                &[(well("A1"), 100.0), (well("A2"), 0.0), (well("B1"), 5.0)],
                linear(),
                "test",
            )
            .unwrap();
        let report = store
            .normalize_plate(
                "gdna",
                "norm",
                None,
                NormalizationParameters::default(),
                "water1",
                "test",
            )
            .unwrap();
        assert_eq!(report.outputs.len(), 3);
        assert_eq!(
            report.flagged,
            vec![(well("A2"), VolumeFlag::ClampedToMax), (well("B1"), VolumeFlag::ClampedToMax)]
        );

        let replay = store.replay_normalization(report.process.id).unwrap();
        let replayed: Vec<_> = replay
            .wells
            .iter()
            .map(|w| (w.input, w.volumes.dna_volume_nl))
            .collect();
        assert_eq!(replayed, store.normalization_volumes(report.process.id).unwrap());

        let a1 = store.plate_compositions("gdna").unwrap()[0].1.container;
        assert_approx_eq!(store.remaining_volume(a1).unwrap().unwrap(), 70_000.0 - 500.0);

        let normalized = store.plate_compositions("norm").unwrap();
        assert_eq!(
            normalized[0].1.detail,
            CompositionDetail::NormalizedGdna {
                dna_volume_nl: 500.0,
                water_volume_nl: 3000.0,
            }
        );
    }

    #[test]
    fn test_normalize_after_partial_requantification() {
        let mut store = gdna_store();
        let first = store
            .quantify_plate(
                "gdna",
                &[(well("A1"), 100.0), (well("A2"), 200.0), (well("B1"), 50.0)],
                linear(),
                "test",
            )
            .unwrap();
        let second = store
            .quantify_plate("gdna", &[(well("A1"), 500.0)], linear(), "test")
            .unwrap();
        let report = store
            .normalize_plate(
                "gdna",
                "norm",
                None,
                NormalizationParameters::default(),
                "water1",
                "test",
            )
            .unwrap();
        assert_eq!(report.outputs.len(), 3);

        let gdna = store.plate_compositions("gdna").unwrap();
        let record = report.process.parameters.as_normalization().unwrap();
        assert_eq!(
            record.quantifications,
            BTreeMap::from([
                (gdna[0].1.id, second.process.id),
                (gdna[1].1.id, first.process.id),
                (gdna[2].1.id, first.process.id),
            ])
        );
        // A1 at 50 ng/uL, A2 at 20 ng/uL.
        let volumes = store.normalization_volumes(report.process.id).unwrap();
        assert_approx_eq!(volumes[0].1, 100.0);
        assert_approx_eq!(volumes[1].1, 250.0);

        let replay = store.replay_normalization(report.process.id).unwrap();
        let replayed: Vec<_> = replay
            .wells
            .iter()
            .map(|w| (w.input, w.volumes.dna_volume_nl))
            .collect();
        assert_eq!(replayed, volumes);

        // A later requantification does not change what was replayed.
        store
            .quantify_plate("gdna", &[(well("A2"), 1000.0)], linear(), "test")
            .unwrap();
        assert_eq!(store.replay_normalization(report.process.id).unwrap(), replay);
    }

    #[test]
    fn test_normalization_overdraw_rejected() {
        let mut store = gdna_store_with_volume(1000.0);
        store
            .quantify_plate(
                "gdna",
                &[(well("A1"), 1.0), (well("A2"), 1.0), (well("B1"), 1.0)],
                linear(),
                "test",
            )
            .unwrap();
        let err = store
            .normalize_plate(
                "gdna",
                "norm",
                None,
                NormalizationParameters::default(),
                "water1",
                "test",
            )
            .unwrap_err();
        assert_eq!(
            err.lims(),
            Some(&LimsError::Capacity(CapacityError::InsufficientVolume {
                container: "gdna:A1".to_string(),
                remaining: 1000.0,
                requested: 3500.0,
            }))
        );
        assert!(matches!(store.plate("norm"), Err(StoreError::UnknownId { .. })));
        let a1 = store.plate_compositions("gdna").unwrap()[0].1.container;
        assert_eq!(store.remaining_volume(a1).unwrap(), Some(1000.0));
    }

    #[test]
    fn test_missing_concentration_names_well() {
        let mut store = gdna_store();
        store
            .quantify_plate("gdna", &[(well("A1"), 100.0)], linear(), "test")
            .unwrap();
        let err = store
            .normalize_plate(
                "gdna",
                "norm",
                None,
                NormalizationParameters::default(),
                "water1",
                "test",
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "No concentration is available for gdna:A2");
    }

    #[test]
    fn test_normalize_without_quantification() {
        let mut store = gdna_store();
        let err = store
            .normalize_plate(
                "gdna",
                "norm",
                None,
                NormalizationParameters::default(),
                "water1",
                "test",
            )
            .unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::MissingData(MissingDataError::Concentration { .. }))
        ));
    }

    #[test]
    fn test_reformat_skips_zero_wells() {
        let mut store = gdna_store();
        store
            .quantify_plate(
                "gdna",
                &[(well("A1"), 100.0), (well("A2"), 0.0), (well("B1"), 50.0)],
                linear(),
                "test",
            )
            .unwrap();
        let report = store
            .normalize_plate(
                "gdna",
                "norm",
                None,
                NormalizationParameters {
                    reformat: true,
                    ..NormalizationParameters::default()
                },
                "water1",
                "test",
            )
            .unwrap();
        assert_eq!(report.skipped, vec![(well("A2"), SkipReason::ZeroConcentration)]);
        assert_eq!(store.plate_compositions("norm").unwrap().len(), 2);
    }

    /// A store with two quantified shotgun libraries on plate "libs".
    fn library_store() -> (LimsStore, Vec<CompositionId>) {
        let mut store = LimsStore::open_in_memory().unwrap();
        store.create_plate("libs", PlateConfiguration::PLATE_96).unwrap();
        let plating = store
            .create_process(&[], "test", &ProcessParameters::SamplePlating)
            .unwrap();
        let mut ids = Vec::new();
        for w in ["A1", "A2"] {
            let container = store.well_container("libs", well(w)).unwrap();
            let c = store
                .record_output_composition(
                    plating.id,
                    container,
                    CompositionDetail::LibraryShotgun {
                        i5: CompositionId(0),
                        i7: CompositionId(0),
                    },
                    10_000.0,
                    &[],
                )
                .unwrap();
            ids.push(c.id);
        }
        let libs_readings = [(well("A1"), 40.0), (well("A2"), 80.0)];
        store.quantify_plate("libs", &libs_readings, linear(), "test").unwrap();
        (store, ids)
    }

    fn equal_volume(volume_nl: f64) -> PoolingStrategy {
        PoolingStrategy::EqualVolume(EqualVolumeParams {
            volume_nl,
            average_fragment_size_bp: None,
        })
    }

    #[test]
    fn test_pool_of_pools_uses_estimates() {
        let (mut store, ids) = library_store();
        let first = store
            .pool_plates("pool1", &["libs"], &equal_volume(100.0), "test")
            .unwrap();
        assert_approx_eq!(first.result.estimated_concentration, 6.0);
        assert_eq!(
            store
                .pool_components(first.pool.id)
                .unwrap()
                .iter()
                .map(|c| c.input)
                .collect::<Vec<_>>(),
            ids
        );

        let err = store.pool_pools("pool1", &["pool1"], &pool_of_pools(), "test");
        assert!(err.is_err());
        let pp = store
            .pool_pools("pp", &["pool1"], &pool_of_pools(), "test")
            .unwrap();
        assert_approx_eq!(pp.result.components[0].concentration, 6.0);
        assert_eq!(store.replay_pooling(pp.process.id).unwrap(), pp.result);
        assert!(matches!(
            pp.pool.detail,
            CompositionDetail::Pool {
                is_pool_of_pools: true,
                ..
            }
        ));
        assert!(matches!(
            first.pool.detail,
            CompositionDetail::Pool {
                is_pool_of_pools: false,
                ..
            }
        ));
    }

    #[test]
    fn test_pooling_algorithm_must_match_inputs() {
        let (mut store, _) = library_store();
        let err = store
            .pool_plates("pool1", &["libs"], &pool_of_pools(), "test")
            .unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::Validation(ValidationError::WrongPoolingInputs {
                inputs: "library wells",
                ..
            }))
        ));
        assert!(matches!(store.tube_composition("pool1"), Err(StoreError::UnknownId { .. })));

        store
            .pool_plates("pool1", &["libs"], &equal_volume(100.0), "test")
            .unwrap();
        let err = store
            .pool_pools("pp", &["pool1"], &equal_volume(10.0), "test")
            .unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::Validation(ValidationError::WrongPoolingInputs {
                inputs: "existing pools",
                ..
            }))
        ));
    }

    #[test]
    fn test_pooling_overdraw_rejected() {
        let (mut store, ids) = library_store();
        let err = store
            .pool_plates("pool1", &["libs"], &equal_volume(20_000.0), "test")
            .unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::Capacity(CapacityError::InsufficientVolume { requested, .. }))
                if *requested == 20_000.0
        ));
        assert!(store.tube_composition("pool1").is_err());
        let library = store.composition(ids[0]).unwrap();
        assert_eq!(store.remaining_volume(library.container).unwrap(), Some(10_000.0));
    }

    fn pool_of_pools() -> PoolingStrategy {
        PoolingStrategy::PoolOfPools(PoolOfPoolsParams {
            total_volume_nl: 50.0,
            overrides: BTreeMap::new(),
        })
    }

    #[test]
    fn test_failed_step_leaves_no_process() {
        let mut store = gdna_store();
        let before = store.lineage_graph().unwrap().num_compositions();
        let err = store.normalize_plate(
            "gdna",
            "norm",
            Some(ProcessId(9999)),
            NormalizationParameters::default(),
            "water1",
            "test",
        );
        assert!(err.is_err());
        assert!(store.plate("norm").is_err());
        assert_eq!(store.lineage_graph().unwrap().num_compositions(), before);
    }
}
