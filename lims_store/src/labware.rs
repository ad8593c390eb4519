//! Plates, wells, tubes and the reference entities (equipment, reagent
//! lots, primer sets) processes consume.

use crate::errors::{StoreError, StoreResult};
use crate::graph::{
    composition_row, finish_composition, insert_output_composition, insert_process,
    COMPOSITION_COLUMNS,
};
use crate::LimsStore;
use chrono::Utc;
use lims_types::{
    CapacityError, CompositionId, ConfigurationError, ContainerId, Equipment, EquipmentId, EquipmentKind, Plate,
    PlateConfiguration, PlateId, PrimerSetId, Reagent, ReagentId, ReagentKind, Tube, TubeId,
    ValidationError, WellCoord,
};
use log::info;
use provenance::{
    Composition, CompositionDetail, PrimerDetail, PrimerPlateParameters, PrimerRead,
    ProcessKind, ProcessParameters, ReagentCreationParameters,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

fn external_id_in_use(conn: &Connection, external_id: &str) -> StoreResult<bool> {
    let n: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM plate WHERE external_id = ?1) + (SELECT COUNT(*) FROM tube WHERE external_id = ?1)",
        params![external_id],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

fn plate_row(row: &Row<'_>) -> rusqlite::Result<Plate> {
    Ok(Plate {
        id: PlateId(row.get(0)?),
        external_id: row.get(1)?,
        configuration: PlateConfiguration::new(row.get(2)?, row.get(3)?),
        discarded: row.get(4)?,
        created_on: row.get(5)?,
    })
}

const PLATE_COLUMNS: &str = "plate_id, external_id, num_rows, num_columns, discarded, created_on";

pub(crate) fn insert_plate(
    conn: &Connection,
    external_id: &str,
    configuration: PlateConfiguration,
) -> StoreResult<Plate> {
    if external_id.trim().is_empty() {
        return Err(ValidationError::Other("a plate needs an external id".to_string()).into());
    }
    if external_id_in_use(conn, external_id)? {
        return Err(ValidationError::DuplicateExternalId(external_id.to_string()).into());
    }
    let created_on = Utc::now();
    conn.execute(
        "INSERT INTO plate(external_id, num_rows, num_columns, discarded, created_on) VALUES (?1, ?2, ?3, 0, ?4)",
        params![
            external_id,
            configuration.num_rows,
            configuration.num_columns,
            created_on
        ],
    )?;
    Ok(Plate {
        id: PlateId(conn.last_insert_rowid()),
        external_id: external_id.to_string(),
        configuration,
        discarded: false,
        created_on,
    })
}

pub(crate) fn get_plate(conn: &Connection, external_id: &str) -> StoreResult<Plate> {
    conn.query_row(
        &format!("SELECT {PLATE_COLUMNS} FROM plate WHERE external_id = ?1"),
        params![external_id],
        plate_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::unknown("plate", external_id))
}

fn insert_container(conn: &Connection) -> StoreResult<ContainerId> {
    conn.execute("INSERT INTO container DEFAULT VALUES", [])?;
    Ok(ContainerId(conn.last_insert_rowid()))
}

/// The container behind a well, creating the well on first use.
pub(crate) fn well_container(conn: &Connection, plate: &Plate, coord: WellCoord) -> StoreResult<ContainerId> {
    plate.configuration.check_well(coord)?;
    let existing = conn
        .query_row(
            "SELECT container_id FROM well WHERE plate_id = ?1 AND row_num = ?2 AND col_num = ?3",
            params![plate.id.0, coord.row, coord.column],
            |row| row.get(0).map(ContainerId),
        )
        .optional()?;
    if let Some(container) = existing {
        return Ok(container);
    }
    let container = insert_container(conn)?;
    conn.execute(
        "INSERT INTO well(plate_id, row_num, col_num, container_id) VALUES (?1, ?2, ?3, ?4)",
        params![plate.id.0, coord.row, coord.column, container.0],
    )?;
    Ok(container)
}

pub(crate) fn insert_tube(conn: &Connection, external_id: &str) -> StoreResult<Tube> {
    if external_id.trim().is_empty() {
        return Err(ValidationError::Other("a tube needs an external id".to_string()).into());
    }
    if external_id_in_use(conn, external_id)? {
        return Err(ValidationError::DuplicateExternalId(external_id.to_string()).into());
    }
    let container = insert_container(conn)?;
    conn.execute(
        "INSERT INTO tube(external_id, container_id, discarded) VALUES (?1, ?2, 0)",
        params![external_id, container.0],
    )?;
    Ok(Tube {
        id: TubeId(conn.last_insert_rowid()),
        external_id: external_id.to_string(),
        container,
        discarded: false,
    })
}

/// Compositions on a plate, in row-major well order.
pub(crate) fn plate_compositions(conn: &Connection, plate: PlateId) -> StoreResult<Vec<(WellCoord, Composition)>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT w.row_num, w.col_num, {COMPOSITION_COLUMNS}
        FROM well w JOIN composition c ON c.container_id = w.container_id
        WHERE w.plate_id = ?1
        ORDER BY w.row_num, w.col_num
        "#
    ))?;
    let rows = stmt.query_map(params![plate.0], |row| {
        Ok((WellCoord::new(row.get(0)?, row.get(1)?), composition_row(row, 2)?))
    })?;
    rows.map(|r| {
        let (coord, c) = r?;
        Ok((coord, finish_composition(c)?))
    })
    .collect()
}

pub(crate) fn tube_composition(conn: &Connection, external_id: &str) -> StoreResult<Composition> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COMPOSITION_COLUMNS} FROM tube t JOIN composition c ON c.container_id = t.container_id WHERE t.external_id = ?1"
            ),
            params![external_id],
            |row| composition_row(row, 0),
        )
        .optional()?
        .ok_or_else(|| StoreError::unknown("tube", external_id))?;
    finish_composition(row)
}

/// Look up equipment by name and check it is of the kind a step needs.
pub(crate) fn require_equipment(
    conn: &Connection,
    external_id: &str,
    kind: EquipmentKind,
) -> StoreResult<Equipment> {
    let (id, actual): (i64, String) = conn
        .query_row(
            "SELECT equipment_id, equipment_type FROM equipment WHERE external_id = ?1",
            params![external_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::unknown("equipment", external_id))?;
    if actual != kind.to_string() {
        return Err(ConfigurationError::WrongEquipment {
            name: external_id.to_string(),
            expected: kind.to_string(),
            actual,
        }
        .into());
    }
    Ok(Equipment {
        id: EquipmentId(id),
        external_id: external_id.to_string(),
        kind,
    })
}

/// Look up a reagent lot and check it is of the kind a step needs.
pub(crate) fn require_reagent(conn: &Connection, lot: &str, kind: ReagentKind) -> StoreResult<Reagent> {
    let (id, actual): (i64, String) = conn
        .query_row(
            "SELECT reagent_id, reagent_type FROM reagent WHERE external_lot_id = ?1",
            params![lot],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::unknown("reagent lot", lot))?;
    if actual != kind.to_string() {
        return Err(ValidationError::Other(format!(
            "reagent lot '{lot}' is {actual}, expected {kind}"
        ))
        .into());
    }
    Ok(Reagent {
        id: ReagentId(id),
        external_lot_id: lot.to_string(),
        kind,
    })
}

fn primer_set_id(conn: &Connection, name: &str) -> StoreResult<Option<PrimerSetId>> {
    Ok(conn
        .query_row(
            "SELECT primer_set_id FROM primer_set WHERE external_id = ?1",
            params![name],
            |row| row.get(0).map(PrimerSetId),
        )
        .optional()?)
}

fn insert_primer_set(conn: &Connection, name: &str) -> StoreResult<PrimerSetId> {
    if primer_set_id(conn, name)?.is_some() {
        return Err(ValidationError::DuplicateExternalId(name.to_string()).into());
    }
    conn.execute("INSERT INTO primer_set(external_id) VALUES (?1)", params![name])?;
    Ok(PrimerSetId(conn.last_insert_rowid()))
}

/// An index primer as printed on the vendor plate map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexPrimer {
    pub name: String,
    pub sequence: String,
}

/// One i5/i7 pairing of a shotgun primer set, in the order they are
/// handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCombination {
    pub i5: IndexPrimer,
    pub i7: IndexPrimer,
}

impl LimsStore {
    pub fn create_plate(&mut self, external_id: &str, configuration: PlateConfiguration) -> StoreResult<Plate> {
        let tx = self.immediate()?;
        let plate = insert_plate(&tx, external_id, configuration)?;
        tx.commit()?;
        info!("created {} plate '{external_id}'", configuration);
        Ok(plate)
    }

    pub fn create_tube(&mut self, external_id: &str) -> StoreResult<Tube> {
        let tx = self.immediate()?;
        let tube = insert_tube(&tx, external_id)?;
        tx.commit()?;
        Ok(tube)
    }

    /// The container of a plate well, creating the well on first use.
    pub fn well_container(&mut self, plate_external_id: &str, coord: WellCoord) -> StoreResult<ContainerId> {
        let tx = self.immediate()?;
        let plate = get_plate(&tx, plate_external_id)?;
        let container = well_container(&tx, &plate, coord)?;
        tx.commit()?;
        Ok(container)
    }

    pub fn plate(&self, external_id: &str) -> StoreResult<Plate> {
        get_plate(&self.conn, external_id)
    }

    pub fn plate_compositions(&self, external_id: &str) -> StoreResult<Vec<(WellCoord, Composition)>> {
        let plate = get_plate(&self.conn, external_id)?;
        plate_compositions(&self.conn, plate.id)
    }

    pub fn tube_composition(&self, external_id: &str) -> StoreResult<Composition> {
        tube_composition(&self.conn, external_id)
    }

    /// Mark a plate discarded. Its compositions can no longer be used as
    /// process inputs and its samples no longer count as plated.
    pub fn discard_plate(&mut self, external_id: &str) -> StoreResult<()> {
        let tx = self.immediate()?;
        let n = tx.execute(
            "UPDATE plate SET discarded = 1 WHERE external_id = ?1",
            params![external_id],
        )?;
        if n == 0 {
            return Err(StoreError::unknown("plate", external_id));
        }
        tx.commit()?;
        info!("discarded plate '{external_id}'");
        Ok(())
    }

    pub fn discard_tube(&mut self, external_id: &str) -> StoreResult<()> {
        let tx = self.immediate()?;
        let n = tx.execute(
            "UPDATE tube SET discarded = 1 WHERE external_id = ?1",
            params![external_id],
        )?;
        if n == 0 {
            return Err(StoreError::unknown("tube", external_id));
        }
        tx.commit()?;
        info!("discarded tube '{external_id}'");
        Ok(())
    }

    pub fn register_equipment(&mut self, external_id: &str, kind: EquipmentKind) -> StoreResult<Equipment> {
        let tx = self.immediate()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT equipment_id FROM equipment WHERE external_id = ?1",
                params![external_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(ValidationError::DuplicateExternalId(external_id.to_string()).into());
        }
        tx.execute(
            "INSERT INTO equipment(external_id, equipment_type) VALUES (?1, ?2)",
            params![external_id, kind.to_string()],
        )?;
        let equipment = Equipment {
            id: EquipmentId(tx.last_insert_rowid()),
            external_id: external_id.to_string(),
            kind,
        };
        tx.commit()?;
        info!("registered {kind} '{external_id}'");
        Ok(equipment)
    }

    /// Register a reagent lot: a tube named after the lot holding a reagent
    /// composition, created by a reagent creation process.
    pub fn register_reagent(&mut self, lot: &str, kind: ReagentKind, operator: &str) -> StoreResult<Reagent> {
        let tx = self.immediate()?;
        let parameters = ProcessParameters::ReagentCreation(ReagentCreationParameters {
            external_lot_id: lot.to_string(),
            reagent_type: kind,
        });
        let process = insert_process(&tx, ProcessKind::ReagentCreation, &[], operator, &parameters)?;
        let tube = insert_tube(&tx, lot)?;
        let reagent_id: i64 =
            tx.query_row("SELECT COALESCE(MAX(reagent_id), 0) + 1 FROM reagent", [], |row| row.get(0))?;
        let composition = insert_output_composition(
            &tx,
            &process,
            tube.container,
            CompositionDetail::Reagent {
                reagent: ReagentId(reagent_id),
                lot: lot.to_string(),
                reagent_type: kind,
            },
            0.0,
            &[],
        )?;
        tx.execute(
            "INSERT INTO reagent(reagent_id, external_lot_id, reagent_type, composition_id) VALUES (?1, ?2, ?3, ?4)",
            params![reagent_id, lot, kind.to_string(), composition.id.0],
        )?;
        tx.commit()?;
        info!("registered {kind} lot '{lot}'");
        Ok(Reagent {
            id: ReagentId(reagent_id),
            external_lot_id: lot.to_string(),
            kind,
        })
    }

    /// Register a shotgun primer set. Distinct i5 and i7 primers are laid
    /// out row-major on two 384-well working plates, `<name> i5` and
    /// `<name> i7`; the combinations are handed out in the given order.
    pub fn register_primer_set(
        &mut self,
        name: &str,
        combinations: &[IndexCombination],
        operator: &str,
    ) -> StoreResult<PrimerSetId> {
        if combinations.is_empty() {
            return Err(ValidationError::NoInputs("primer set registration").into());
        }
        let tx = self.immediate()?;
        let primer_set = insert_primer_set(&tx, name)?;
        let mut placed: [HashMap<&IndexPrimer, CompositionId>; 2] = [HashMap::new(), HashMap::new()];

        for (read, suffix) in [(PrimerRead::I5, "i5"), (PrimerRead::I7, "i7")] {
            let plate_name = format!("{name} {suffix}");
            let parameters = ProcessParameters::PrimerWorkingPlate(PrimerPlateParameters {
                primer_set: name.to_string(),
                plate: plate_name.clone(),
            });
            let process = insert_process(&tx, ProcessKind::PrimerWorkingPlate, &[], operator, &parameters)?;
            let plate = insert_plate(&tx, &plate_name, PlateConfiguration::PLATE_384)?;
            let slot = usize::from(read == PrimerRead::I7);
            let mut wells = plate.configuration.wells();
            for combination in combinations {
                let primer = if read == PrimerRead::I5 {
                    &combination.i5
                } else {
                    &combination.i7
                };
                if placed[slot].contains_key(primer) {
                    continue;
                }
                let coord = wells.next().ok_or(CapacityError::DestinationPlateFull {
                    config: plate.configuration,
                })?;
                let container = well_container(&tx, &plate, coord)?;
                let detail = CompositionDetail::Primer(PrimerDetail {
                    primer_set,
                    index_name: primer.name.clone(),
                    sequence: primer.sequence.clone(),
                    read,
                });
                let composition = insert_output_composition(&tx, &process, container, detail, 0.0, &[])?;
                placed[slot].insert(primer, composition.id);
            }
        }

        let mut stmt = tx.prepare_cached(
            "INSERT INTO primer_set_combination(primer_set_id, combination_index, i5_composition_id, i7_composition_id) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (index, combination) in combinations.iter().enumerate() {
            stmt.execute(params![
                primer_set.0,
                index as i64,
                placed[0][&combination.i5].0,
                placed[1][&combination.i7].0
            ])?;
        }
        drop(stmt);
        tx.commit()?;
        info!(
            "registered primer set '{name}' with {} combinations",
            combinations.len()
        );
        Ok(primer_set)
    }

    /// Register a plate of amplicon (16S) barcoded primers.
    pub fn register_amplicon_primer_plate(
        &mut self,
        plate_external_id: &str,
        primer_set: &str,
        configuration: PlateConfiguration,
        primers: &[(WellCoord, IndexPrimer)],
        operator: &str,
    ) -> StoreResult<Plate> {
        if primers.is_empty() {
            return Err(ValidationError::NoInputs("primer plate registration").into());
        }
        let tx = self.immediate()?;
        let set = match primer_set_id(&tx, primer_set)? {
            Some(id) => id,
            None => insert_primer_set(&tx, primer_set)?,
        };
        let parameters = ProcessParameters::PrimerWorkingPlate(PrimerPlateParameters {
            primer_set: primer_set.to_string(),
            plate: plate_external_id.to_string(),
        });
        let process = insert_process(&tx, ProcessKind::PrimerWorkingPlate, &[], operator, &parameters)?;
        let plate = insert_plate(&tx, plate_external_id, configuration)?;
        for (coord, primer) in primers {
            let container = well_container(&tx, &plate, *coord)?;
            let detail = CompositionDetail::Primer(PrimerDetail {
                primer_set: set,
                index_name: primer.name.clone(),
                sequence: primer.sequence.clone(),
                read: PrimerRead::Amplicon,
            });
            insert_output_composition(&tx, &process, container, detail, 0.0, &[])?;
        }
        tx.commit()?;
        info!(
            "registered amplicon primer plate '{plate_external_id}' with {} primers",
            primers.len()
        );
        Ok(plate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lims_types::LimsError;
    use pretty_assertions::assert_eq;

    fn primer(name: &str, sequence: &str) -> IndexPrimer {
        IndexPrimer {
            name: name.to_string(),
            sequence: sequence.to_string(),
        }
    }

    #[test]
    fn test_duplicate_external_ids() {
        let mut store = LimsStore::open_in_memory().unwrap();
        store.create_plate("p1", PlateConfiguration::PLATE_96).unwrap();
        let err = store.create_plate("p1", PlateConfiguration::PLATE_96).unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::Validation(ValidationError::DuplicateExternalId(_)))
        ));
        assert!(store.create_tube("p1").is_err());
    }

    #[test]
    fn test_wells_created_once() {
        let mut store = LimsStore::open_in_memory().unwrap();
        store.create_plate("p1", PlateConfiguration::PLATE_96).unwrap();
        let a = store.well_container("p1", WellCoord::new(1, 1)).unwrap();
        let b = store.well_container("p1", WellCoord::new(1, 1)).unwrap();
        assert_eq!(a, b);
        assert!(store.well_container("p1", WellCoord::new(9, 1)).is_err());
    }

    #[test]
    fn test_equipment_kind_checked() {
        let mut store = LimsStore::open_in_memory().unwrap();
        store.register_equipment("Carmen", EquipmentKind::Mosquito).unwrap();
        assert!(require_equipment(&store.conn, "Carmen", EquipmentKind::Mosquito).is_ok());
        let err = require_equipment(&store.conn, "Carmen", EquipmentKind::EpMotion).unwrap_err();
        assert!(matches!(
            err.lims(),
            Some(LimsError::Configuration(ConfigurationError::WrongEquipment { .. }))
        ));
        assert!(matches!(
            require_equipment(&store.conn, "nope", EquipmentKind::Echo),
            Err(StoreError::UnknownId { .. })
        ));
    }

    #[test]
    fn test_register_reagent() {
        let mut store = LimsStore::open_in_memory().unwrap();
        let water = store.register_reagent("RNBD9959", ReagentKind::Water, "test").unwrap();
        assert_eq!(water.id, ReagentId(1));
        let composition = store.tube_composition("RNBD9959").unwrap();
        assert_eq!(
            composition.detail,
            CompositionDetail::Reagent {
                reagent: water.id,
                lot: "RNBD9959".to_string(),
                reagent_type: ReagentKind::Water,
            }
        );
        assert!(require_reagent(&store.conn, "RNBD9959", ReagentKind::Water).is_ok());
        assert!(require_reagent(&store.conn, "RNBD9959", ReagentKind::MasterMix).is_err());
    }

    #[test]
    fn test_register_primer_set_shares_primers() {
        let mut store = LimsStore::open_in_memory().unwrap();
        let combos = vec![
            IndexCombination {
                i5: primer("iTru5_01_A", "ACCGACAA"),
                i7: primer("iTru7_101_01", "ACGTTACC"),
            },
            IndexCombination {
                i5: primer("iTru5_01_A", "ACCGACAA"),
                i7: primer("iTru7_101_02", "CTGTGTTG"),
            },
        ];
        store.register_primer_set("iTru", &combos, "test").unwrap();
        assert_eq!(store.plate_compositions("iTru i5").unwrap().len(), 1);
        let i7 = store.plate_compositions("iTru i7").unwrap();
        assert_eq!(
            i7.iter().map(|(w, _)| w.to_string()).collect::<Vec<_>>(),
            vec!["A1", "A2"]
        );
        assert!(store.register_primer_set("iTru", &combos, "test").is_err());
    }
}
