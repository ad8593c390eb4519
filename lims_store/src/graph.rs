//! Provenance records: processes, their inputs, output compositions and the
//! per-output source edges the lineage graph is built from.
//!
//! The functions here take a plain connection so they can run inside the
//! transaction of whichever operation calls them.

use crate::errors::{StoreError, StoreResult};
use crate::LimsStore;
use chrono::Utc;
use lims_types::{
    CapacityError, CompositionId, ContainerId, ContainerLocation, PlateId, ProcessId,
    ValidationError, WellCoord, WellRef,
};
use log::{debug, info, warn};
use provenance::{
    Composition, CompositionDetail, CompositionKind, LineageGraph, Process, ProcessKind,
    ProcessParameters, SampleDetail,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;

pub(crate) fn insert_process(
    conn: &Connection,
    kind: ProcessKind,
    inputs: &[CompositionId],
    operator: &str,
    parameters: &ProcessParameters,
) -> StoreResult<Process> {
    parameters.validate(kind)?;
    let mut seen = HashSet::new();
    for &input in inputs {
        if !seen.insert(input) {
            return Err(ValidationError::DuplicateInput(input).into());
        }
        if composition_discarded(conn, input)? {
            return Err(ValidationError::DiscardedInput(input).into());
        }
    }

    let run_date = Utc::now();
    conn.execute(
        "INSERT INTO process(process_type, run_date, operator, parameters_json) VALUES (?1, ?2, ?3, ?4)",
        params![
            kind.to_string(),
            run_date,
            operator,
            serde_json::to_string(parameters)?
        ],
    )?;
    let id = ProcessId(conn.last_insert_rowid());
    let mut stmt =
        conn.prepare_cached("INSERT INTO process_input(process_id, composition_id) VALUES (?1, ?2)")?;
    for input in inputs {
        stmt.execute(params![id.0, input.0])?;
    }
    debug!("process {id} ({kind}) with {} inputs", inputs.len());
    Ok(Process {
        id,
        kind,
        run_date,
        operator: operator.to_string(),
        parameters: parameters.clone(),
    })
}

/// Whether the composition sits on a discarded plate or in a discarded tube.
pub(crate) fn composition_discarded(conn: &Connection, id: CompositionId) -> StoreResult<bool> {
    conn.query_row(
        r#"
        SELECT COALESCE(p.discarded, t.discarded, 0)
        FROM composition c
        LEFT JOIN well w ON w.container_id = c.container_id
        LEFT JOIN plate p ON p.plate_id = w.plate_id
        LEFT JOIN tube t ON t.container_id = c.container_id
        WHERE c.composition_id = ?1
        "#,
        params![id.0],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::unknown("composition", id))
}

/// The composition held by a container, if any.
pub(crate) fn container_composition(
    conn: &Connection,
    container: ContainerId,
) -> StoreResult<Option<CompositionId>> {
    Ok(conn
        .query_row(
            "SELECT composition_id FROM composition WHERE container_id = ?1",
            params![container.0],
            |row| row.get(0).map(CompositionId),
        )
        .optional()?)
}

pub(crate) fn process_inputs(conn: &Connection, process: ProcessId) -> StoreResult<Vec<CompositionId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT composition_id FROM process_input WHERE process_id = ?1 ORDER BY composition_id",
    )?;
    let rows = stmt.query_map(params![process.0], |row| row.get(0).map(CompositionId))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Direct sources of a composition and the volume drawn from each.
pub(crate) fn composition_sources(
    conn: &Connection,
    composition: CompositionId,
) -> StoreResult<Vec<(CompositionId, Option<f64>)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT source_composition_id, volume FROM composition_source WHERE composition_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![composition.0], |row| {
        Ok((CompositionId(row.get(0)?), row.get(1)?))
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

/// Record a new composition in an empty container. Every source must be an
/// input of `process`; a source volume is what was drawn from it.
pub(crate) fn insert_output_composition(
    conn: &Connection,
    process: &Process,
    container: ContainerId,
    detail: CompositionDetail,
    total_volume_nl: f64,
    sources: &[(CompositionId, Option<f64>)],
) -> StoreResult<Composition> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT container_id FROM container WHERE container_id = ?1",
            params![container.0],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::unknown("container", container));
    }
    if container_composition(conn, container)?.is_some() {
        return Err(ValidationError::ContainerOccupied(container).into());
    }
    if !sources.is_empty() {
        let inputs: HashSet<CompositionId> = process_inputs(conn, process.id)?.into_iter().collect();
        if let Some(&(composition, _)) = sources.iter().find(|(c, _)| !inputs.contains(c)) {
            return Err(ValidationError::SourceNotInput {
                composition,
                process: process.id,
            }
            .into());
        }
    }

    let kind = detail.kind();
    let sample_id = match &detail {
        CompositionDetail::Sample(s) => s.sample_id.clone(),
        _ => None,
    };
    conn.execute(
        r#"
        INSERT INTO composition(composition_type, container_id, upstream_process_id, total_volume, sample_id, detail_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            kind.to_string(),
            container.0,
            process.id.0,
            total_volume_nl,
            sample_id,
            serde_json::to_string(&detail)?
        ],
    )?;
    let id = CompositionId(conn.last_insert_rowid());
    let mut stmt = conn.prepare_cached(
        "INSERT INTO composition_source(composition_id, source_composition_id, volume) VALUES (?1, ?2, ?3)",
    )?;
    for (source, volume) in sources {
        stmt.execute(params![id.0, source.0, volume])?;
    }
    conn.execute(
        "UPDATE container SET latest_process_id = ?1, remaining_volume = ?2 WHERE container_id = ?3",
        params![process.id.0, total_volume_nl, container.0],
    )?;
    Ok(Composition {
        id,
        container,
        upstream_process: process.id,
        total_volume_nl,
        detail,
    })
}

/// `plate:well` or tube name of a composition, for messages.
pub(crate) fn composition_label(conn: &Connection, composition: &Composition) -> StoreResult<String> {
    Ok(container_location(conn, composition.container)?.to_string())
}

const VOLUME_TOLERANCE: f64 = 1e-9;

/// Fail unless a container holds at least `volume_nl`. Containers whose
/// volume was never recorded hold any volume.
pub(crate) fn check_volume(conn: &Connection, container: ContainerId, volume_nl: f64) -> StoreResult<()> {
    let remaining: Option<f64> = conn
        .query_row(
            "SELECT remaining_volume FROM container WHERE container_id = ?1",
            params![container.0],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::unknown("container", container))?;
    match remaining {
        Some(remaining) if volume_nl > remaining + VOLUME_TOLERANCE => {
            Err(CapacityError::InsufficientVolume {
                container: container_location(conn, container)?.to_string(),
                remaining,
                requested: volume_nl,
            }
            .into())
        }
        _ => Ok(()),
    }
}

/// Draw `volume_nl` from a container.
pub(crate) fn consume_volume(conn: &Connection, container: ContainerId, volume_nl: f64) -> StoreResult<()> {
    check_volume(conn, container, volume_nl)?;
    conn.execute(
        r#"
        UPDATE container SET remaining_volume = MAX(remaining_volume - ?1, 0)
        WHERE container_id = ?2 AND remaining_volume IS NOT NULL
        "#,
        params![volume_nl, container.0],
    )?;
    Ok(())
}

pub(crate) const COMPOSITION_COLUMNS: &str =
    "c.composition_id, c.container_id, c.upstream_process_id, c.total_volume, c.detail_json";

/// Columns in the order of [`COMPOSITION_COLUMNS`], starting at `offset`.
pub(crate) fn composition_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<(Composition, String)> {
    let detail_json: String = row.get(offset + 4)?;
    Ok((
        Composition {
            id: CompositionId(row.get(offset)?),
            container: ContainerId(row.get(offset + 1)?),
            upstream_process: ProcessId(row.get(offset + 2)?),
            total_volume_nl: row.get(offset + 3)?,
            detail: CompositionDetail::Gdna,
        },
        detail_json,
    ))
}

pub(crate) fn finish_composition((mut c, detail_json): (Composition, String)) -> StoreResult<Composition> {
    c.detail = serde_json::from_str(&detail_json)?;
    Ok(c)
}

pub(crate) fn get_composition(conn: &Connection, id: CompositionId) -> StoreResult<Composition> {
    let row = conn
        .query_row(
            &format!("SELECT {COMPOSITION_COLUMNS} FROM composition c WHERE c.composition_id = ?1"),
            params![id.0],
            |row| composition_row(row, 0),
        )
        .optional()?
        .ok_or_else(|| StoreError::unknown("composition", id))?;
    finish_composition(row)
}

/// Fail unless the composition is one of `expected`.
pub(crate) fn require_kind(composition: &Composition, expected: &[CompositionKind]) -> StoreResult<()> {
    if expected.contains(&composition.kind()) {
        Ok(())
    } else {
        Err(ValidationError::WrongCompositionKind {
            composition: composition.id,
            expected: expected.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(" or "),
            actual: composition.kind().to_string(),
        }
        .into())
    }
}

pub(crate) fn get_process(conn: &Connection, id: ProcessId) -> StoreResult<Process> {
    let (kind, run_date, operator, parameters_json): (String, _, String, String) = conn
        .query_row(
            "SELECT process_type, run_date, operator, parameters_json FROM process WHERE process_id = ?1",
            params![id.0],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::unknown("process", id))?;
    let parameters: ProcessParameters = serde_json::from_str(&parameters_json)?;
    let kind = kind
        .parse::<ProcessKind>()
        .map_err(|_| ValidationError::Other(format!("unknown process type '{kind}'")))?;
    Ok(Process {
        id,
        kind,
        run_date,
        operator,
        parameters,
    })
}

/// Compositions created by a process, in creation order.
pub(crate) fn process_outputs(conn: &Connection, process: ProcessId) -> StoreResult<Vec<Composition>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {COMPOSITION_COLUMNS} FROM composition c WHERE c.upstream_process_id = ?1 ORDER BY c.composition_id"
    ))?;
    let rows = stmt.query_map(params![process.0], |row| composition_row(row, 0))?;
    rows.map(|r| finish_composition(r?)).collect()
}

pub(crate) fn container_location(conn: &Connection, container: ContainerId) -> StoreResult<ContainerLocation> {
    let well = conn
        .query_row(
            r#"
            SELECT p.plate_id, p.external_id, w.row_num, w.col_num
            FROM well w JOIN plate p ON p.plate_id = w.plate_id
            WHERE w.container_id = ?1
            "#,
            params![container.0],
            |row| {
                Ok(ContainerLocation::Well {
                    plate: PlateId(row.get(0)?),
                    plate_external_id: row.get(1)?,
                    coord: WellCoord::new(row.get(2)?, row.get(3)?),
                })
            },
        )
        .optional()?;
    if let Some(location) = well {
        return Ok(location);
    }
    conn.query_row(
        "SELECT external_id FROM tube WHERE container_id = ?1",
        params![container.0],
        |row| Ok(ContainerLocation::Tube { external_id: row.get(0)? }),
    )
    .optional()?
    .ok_or_else(|| StoreError::unknown("container", container))
}

/// Load the full lineage graph.
pub(crate) fn load_lineage(conn: &Connection) -> StoreResult<LineageGraph> {
    let mut graph = LineageGraph::new();
    let mut stmt = conn.prepare_cached("SELECT composition_id, composition_type FROM composition")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id = CompositionId(row.get(0)?);
        let kind: String = row.get(1)?;
        let kind = kind
            .parse::<CompositionKind>()
            .map_err(|_| ValidationError::Other(format!("unknown composition type '{kind}'")))?;
        graph.add_composition(id, kind);
    }
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT s.source_composition_id, s.composition_id, c.upstream_process_id
        FROM composition_source s JOIN composition c ON c.composition_id = s.composition_id
        "#,
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        graph.add_derivation(
            CompositionId(row.get(0)?),
            CompositionId(row.get(1)?),
            ProcessId(row.get(2)?),
        );
    }
    Ok(graph)
}

/// Wells already holding the sample about to be plated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatingCheck {
    /// Live wells on other, non-discarded plates.
    pub previous_plates: Vec<WellRef>,
    /// Other wells of the plate being filled.
    pub same_plate: Vec<WellRef>,
}

impl PlatingCheck {
    pub fn is_clear(&self) -> bool {
        self.previous_plates.is_empty() && self.same_plate.is_empty()
    }
}

pub(crate) fn check_sample_plating(
    conn: &Connection,
    plate: PlateId,
    coord: WellCoord,
    content: &str,
) -> StoreResult<PlatingCheck> {
    let detail = SampleDetail::from_plating_content(content);
    let Some(sample_id) = detail.sample_id else {
        return Ok(PlatingCheck::default());
    };
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT p.plate_id, p.external_id, w.row_num, w.col_num
        FROM composition c
        JOIN well w ON w.container_id = c.container_id
        JOIN plate p ON p.plate_id = w.plate_id
        WHERE c.composition_type = ?1 AND c.sample_id = ?2 AND p.discarded = 0
        ORDER BY p.external_id, w.row_num, w.col_num
        "#,
    )?;
    let rows = stmt.query_map(
        params![CompositionKind::Sample.to_string(), sample_id],
        |row| {
            Ok(WellRef {
                plate: PlateId(row.get(0)?),
                plate_external_id: row.get(1)?,
                coord: WellCoord::new(row.get(2)?, row.get(3)?),
            })
        },
    )?;
    let mut check = PlatingCheck::default();
    for well in rows {
        let well = well?;
        if well.plate == plate {
            if well.coord != coord {
                check.same_plate.push(well);
            }
        } else {
            check.previous_plates.push(well);
        }
    }
    Ok(check)
}

impl LimsStore {
    /// Record a process consuming `inputs`. Fails if an input is discarded,
    /// listed twice, or if `parameters` do not fit the process kind.
    pub fn create_process(
        &mut self,
        inputs: &[CompositionId],
        operator: &str,
        parameters: &ProcessParameters,
    ) -> StoreResult<Process> {
        let tx = self.immediate()?;
        let process = insert_process(&tx, parameters.kind(), inputs, operator, parameters)?;
        tx.commit()?;
        info!("recorded {} process {}", process.kind, process.id);
        Ok(process)
    }

    /// Record what `process` put into an empty container.
    pub fn record_output_composition(
        &mut self,
        process: ProcessId,
        container: ContainerId,
        detail: CompositionDetail,
        total_volume_nl: f64,
        sources: &[CompositionId],
    ) -> StoreResult<Composition> {
        let tx = self.immediate()?;
        let process = get_process(&tx, process)?;
        let sources: Vec<_> = sources.iter().map(|&s| (s, None)).collect();
        let composition =
            insert_output_composition(&tx, &process, container, detail, total_volume_nl, &sources)?;
        tx.commit()?;
        Ok(composition)
    }

    pub fn composition(&self, id: CompositionId) -> StoreResult<Composition> {
        get_composition(&self.conn, id)
    }

    pub fn process(&self, id: ProcessId) -> StoreResult<Process> {
        get_process(&self.conn, id)
    }

    pub fn process_inputs(&self, id: ProcessId) -> StoreResult<Vec<CompositionId>> {
        process_inputs(&self.conn, id)
    }

    pub fn process_outputs(&self, id: ProcessId) -> StoreResult<Vec<Composition>> {
        process_outputs(&self.conn, id)
    }

    pub fn location(&self, composition: &Composition) -> StoreResult<ContainerLocation> {
        container_location(&self.conn, composition.container)
    }

    /// Remaining volume of a container, if one was ever recorded.
    pub fn remaining_volume(&self, container: ContainerId) -> StoreResult<Option<f64>> {
        self.conn
            .query_row(
                "SELECT remaining_volume FROM container WHERE container_id = ?1",
                params![container.0],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::unknown("container", container))
    }

    pub fn lineage_graph(&self) -> StoreResult<LineageGraph> {
        load_lineage(&self.conn)
    }

    fn related(&self, id: CompositionId, ancestors: bool) -> StoreResult<Vec<Composition>> {
        get_composition(&self.conn, id)?;
        let graph = load_lineage(&self.conn)?;
        let nodes = if ancestors {
            graph.ancestors_of(id)
        } else {
            graph.descendants_of(id)
        };
        nodes
            .into_iter()
            .map(|n| get_composition(&self.conn, n.composition))
            .collect()
    }

    /// Every composition `id` was derived from, sorted by id.
    pub fn ancestors_of(&self, id: CompositionId) -> StoreResult<Vec<Composition>> {
        self.related(id, true)
    }

    /// Every composition derived from `id`, sorted by id.
    pub fn descendants_of(&self, id: CompositionId) -> StoreResult<Vec<Composition>> {
        self.related(id, false)
    }

    /// Report where a sample already sits before plating it into `coord`.
    pub fn check_sample_plating(
        &self,
        plate_external_id: &str,
        coord: WellCoord,
        content: &str,
    ) -> StoreResult<PlatingCheck> {
        let plate = crate::labware::get_plate(&self.conn, plate_external_id)?;
        check_sample_plating(&self.conn, plate.id, coord, content)
    }

    /// External ids of every plate holding the sample or anything derived
    /// from it, sorted.
    pub fn plates_for_sample(&self, sample_id: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT composition_id FROM composition WHERE composition_type = ?1 AND sample_id = ?2",
        )?;
        let samples = stmt
            .query_map(
                params![CompositionKind::Sample.to_string(), sample_id],
                |row| row.get(0).map(CompositionId),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        if samples.is_empty() {
            warn!("sample '{sample_id}' was never plated");
            return Ok(Vec::new());
        }

        let graph = load_lineage(&self.conn)?;
        let mut plates = Vec::new();
        for sample in samples {
            let related = std::iter::once(sample)
                .chain(graph.descendants_of(sample).into_iter().map(|n| n.composition));
            for id in related {
                let composition = get_composition(&self.conn, id)?;
                if let ContainerLocation::Well {
                    plate_external_id, ..
                } = container_location(&self.conn, composition.container)?
                {
                    plates.push(plate_external_id);
                }
            }
        }
        plates.sort();
        plates.dedup();
        Ok(plates)
    }
}
