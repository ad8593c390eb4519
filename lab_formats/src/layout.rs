//! CSV files typed in at the bench: plate layouts (`well,content`),
//! instrument readings (`well,raw` or `pool,raw`), standard series
//! (`raw,concentration`) and index primer tables.

use anyhow::{bail, ensure, Context, Result};
use lab_calc::concentration::Standard;
use lims_types::WellCoord;
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct LayoutRow {
    well: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ReadingRow {
    well: String,
    raw: f64,
}

#[derive(Debug, Deserialize)]
struct PoolReadingRow {
    pool: String,
    raw: f64,
}

#[derive(Debug, Deserialize)]
struct PrimerRow {
    well: String,
    name: String,
    sequence: String,
}

/// One i5/i7 pair of a shotgun primer set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexPair {
    pub i5_name: String,
    pub i5_sequence: String,
    pub i7_name: String,
    pub i7_sequence: String,
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn check_sequence(name: &str, sequence: &str) -> Result<()> {
    ensure!(
        !sequence.is_empty() && bio::alphabets::dna::alphabet().is_word(sequence.as_bytes()),
        "index '{name}' has an invalid sequence '{sequence}'"
    );
    Ok(())
}

fn parse_well(well: &str, line: usize, seen: &mut HashSet<WellCoord>) -> Result<WellCoord> {
    let coord: WellCoord = well
        .parse()
        .with_context(|| format!("row {line} of the layout"))?;
    if !seen.insert(coord) {
        bail!("well {coord} is listed more than once (row {line})");
    }
    Ok(coord)
}

/// Read a plating layout. Empty content is kept as an empty string; it is
/// interpreted as a blank when plated.
pub fn read_plate_layout<R: Read>(reader: R) -> Result<Vec<(WellCoord, String)>> {
    let mut seen = HashSet::new();
    csv_reader(reader)
        .deserialize()
        .enumerate()
        .map(|(i, record)| {
            let record: LayoutRow = record?;
            Ok((parse_well(&record.well, i + 1, &mut seen)?, record.content))
        })
        .collect()
}

/// Read raw instrument readings, one per well.
pub fn read_readings<R: Read>(reader: R) -> Result<Vec<(WellCoord, f64)>> {
    let mut seen = HashSet::new();
    csv_reader(reader)
        .deserialize()
        .enumerate()
        .map(|(i, record)| {
            let record: ReadingRow = record.with_context(|| format!("row {} of the readings", i + 1))?;
            Ok((parse_well(&record.well, i + 1, &mut seen)?, record.raw))
        })
        .collect()
}

/// Read raw readings of pooled tubes, one per pool.
pub fn read_pool_readings<R: Read>(reader: R) -> Result<Vec<(String, f64)>> {
    let mut seen = HashSet::new();
    csv_reader(reader)
        .deserialize()
        .enumerate()
        .map(|(i, record)| {
            let record: PoolReadingRow = record.with_context(|| format!("row {} of the readings", i + 1))?;
            if !seen.insert(record.pool.clone()) {
                bail!("pool '{}' is listed more than once (row {})", record.pool, i + 1);
            }
            Ok((record.pool, record.raw))
        })
        .collect()
}

/// Read a standard series for a calibration curve.
pub fn read_standards<R: Read>(reader: R) -> Result<Vec<Standard>> {
    csv_reader(reader)
        .deserialize()
        .enumerate()
        .map(|(i, record)| record.with_context(|| format!("row {} of the standards", i + 1)))
        .collect()
}

/// Read the i5/i7 pairs of a shotgun primer set, in combination order.
pub fn read_index_pairs<R: Read>(reader: R) -> Result<Vec<IndexPair>> {
    csv_reader(reader)
        .deserialize()
        .enumerate()
        .map(|(i, record)| {
            let pair: IndexPair = record.with_context(|| format!("row {} of the index table", i + 1))?;
            check_sequence(&pair.i5_name, &pair.i5_sequence)?;
            check_sequence(&pair.i7_name, &pair.i7_sequence)?;
            Ok(pair)
        })
        .collect()
}

/// Read the layout of an amplicon primer plate (`well,name,sequence`).
pub fn read_primer_layout<R: Read>(reader: R) -> Result<Vec<(WellCoord, String, String)>> {
    let mut seen = HashSet::new();
    csv_reader(reader)
        .deserialize()
        .enumerate()
        .map(|(i, record)| {
            let record: PrimerRow = record.with_context(|| format!("row {} of the primer layout", i + 1))?;
            check_sequence(&record.name, &record.sequence)?;
            let coord = parse_well(&record.well, i + 1, &mut seen)?;
            Ok((coord, record.name, record.sequence))
        })
        .collect()
}
