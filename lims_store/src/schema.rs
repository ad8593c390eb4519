//! Relational schema. Composition and process kinds are rows of lookup
//! tables; a new kind is a new row, not a migration.

use crate::errors::StoreResult;
use lims_types::{EquipmentKind, ReagentKind};
use provenance::{CompositionKind, ProcessKind};
use rusqlite::{params, Connection};
use strum::IntoEnumIterator;

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS composition_type (
  name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS process_type (
  name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS equipment_type (
  name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS reagent_type (
  name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS equipment (
  equipment_id INTEGER PRIMARY KEY,
  external_id TEXT NOT NULL UNIQUE,
  equipment_type TEXT NOT NULL REFERENCES equipment_type(name)
);

CREATE TABLE IF NOT EXISTS process (
  process_id INTEGER PRIMARY KEY,
  process_type TEXT NOT NULL REFERENCES process_type(name),
  run_date TEXT NOT NULL,
  operator TEXT NOT NULL,
  parameters_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS container (
  container_id INTEGER PRIMARY KEY,
  latest_process_id INTEGER REFERENCES process(process_id),
  remaining_volume REAL
);

CREATE TABLE IF NOT EXISTS plate (
  plate_id INTEGER PRIMARY KEY,
  external_id TEXT NOT NULL UNIQUE,
  num_rows INTEGER NOT NULL,
  num_columns INTEGER NOT NULL,
  discarded INTEGER NOT NULL DEFAULT 0,
  created_on TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS well (
  well_id INTEGER PRIMARY KEY,
  plate_id INTEGER NOT NULL REFERENCES plate(plate_id),
  row_num INTEGER NOT NULL,
  col_num INTEGER NOT NULL,
  container_id INTEGER NOT NULL UNIQUE REFERENCES container(container_id),
  UNIQUE (plate_id, row_num, col_num)
);

CREATE TABLE IF NOT EXISTS tube (
  tube_id INTEGER PRIMARY KEY,
  external_id TEXT NOT NULL UNIQUE,
  container_id INTEGER NOT NULL UNIQUE REFERENCES container(container_id),
  discarded INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS composition (
  composition_id INTEGER PRIMARY KEY,
  composition_type TEXT NOT NULL REFERENCES composition_type(name),
  container_id INTEGER NOT NULL UNIQUE REFERENCES container(container_id),
  upstream_process_id INTEGER NOT NULL REFERENCES process(process_id),
  total_volume REAL NOT NULL,
  sample_id TEXT,
  detail_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS composition_sample_id ON composition(sample_id);

CREATE TABLE IF NOT EXISTS process_input (
  process_id INTEGER NOT NULL REFERENCES process(process_id),
  composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  PRIMARY KEY (process_id, composition_id)
);

CREATE TABLE IF NOT EXISTS composition_source (
  composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  source_composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  volume REAL,
  PRIMARY KEY (composition_id, source_composition_id)
);
CREATE INDEX IF NOT EXISTS composition_source_source
  ON composition_source(source_composition_id);

CREATE TABLE IF NOT EXISTS reagent (
  reagent_id INTEGER PRIMARY KEY,
  external_lot_id TEXT NOT NULL UNIQUE,
  reagent_type TEXT NOT NULL REFERENCES reagent_type(name),
  composition_id INTEGER NOT NULL REFERENCES composition(composition_id)
);

CREATE TABLE IF NOT EXISTS concentration_calculation (
  composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  quantification_process_id INTEGER NOT NULL REFERENCES process(process_id),
  raw_concentration REAL NOT NULL,
  computed_concentration REAL,
  molar_concentration REAL,
  PRIMARY KEY (composition_id, quantification_process_id)
);

CREATE TABLE IF NOT EXISTS pool_composition_component (
  output_composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  input_composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  input_volume REAL NOT NULL,
  percentage_of_output REAL NOT NULL,
  PRIMARY KEY (output_composition_id, input_composition_id)
);

CREATE TABLE IF NOT EXISTS primer_set (
  primer_set_id INTEGER PRIMARY KEY,
  external_id TEXT NOT NULL UNIQUE,
  next_combination INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS primer_set_combination (
  primer_set_id INTEGER NOT NULL REFERENCES primer_set(primer_set_id),
  combination_index INTEGER NOT NULL,
  i5_composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  i7_composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  PRIMARY KEY (primer_set_id, combination_index)
);

CREATE TABLE IF NOT EXISTS sequencing_lane (
  process_id INTEGER NOT NULL REFERENCES process(process_id),
  lane_number INTEGER NOT NULL,
  pool_composition_id INTEGER NOT NULL REFERENCES composition(composition_id),
  PRIMARY KEY (process_id, lane_number)
);
"#;

fn seed(conn: &Connection, table: &str, names: impl Iterator<Item = String>) -> StoreResult<()> {
    let mut stmt = conn.prepare(&format!("INSERT OR IGNORE INTO {table}(name) VALUES (?1)"))?;
    for name in names {
        stmt.execute(params![name])?;
    }
    Ok(())
}

pub(crate) fn migrate(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    seed(
        conn,
        "composition_type",
        CompositionKind::iter().map(|k| k.to_string()),
    )?;
    seed(conn, "process_type", ProcessKind::iter().map(|k| k.to_string()))?;
    seed(
        conn,
        "equipment_type",
        EquipmentKind::iter().map(|k| k.to_string()),
    )?;
    seed(conn, "reagent_type", ReagentKind::iter().map(|k| k.to_string()))?;
    Ok(())
}
