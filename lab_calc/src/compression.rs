//! Quadrant interleaving of up to four plates into one plate with twice the
//! rows and twice the columns.
//!
//! Source plate `k` lands on the destination with a row offset of `k / 2` and a
//! column offset of `k % 2`:
//!
//! ```text
//!   A B A B ...
//!   C D C D ...
//! ```
//!
//! where A, B, C, D are source plates 0, 1, 2, 3.

use itertools::Itertools;
use lims_types::{ConfigurationError, LimsResult, PlateConfiguration, ValidationError, WellCoord};
use serde::{Deserialize, Serialize};

/// At most this many plates fit into one compressed plate.
pub const MAX_SOURCE_PLATES: usize = 4;

/// Destination well of `source` on source plate `source_index`.
pub fn destination_well(source_index: usize, source: WellCoord) -> WellCoord {
    let k = source_index as u16;
    WellCoord::new(
        2 * (source.row - 1) + k / 2 + 1,
        2 * (source.column - 1) + k % 2 + 1,
    )
}

/// Inverse of [`destination_well`]: the source plate index and source well
/// that map onto `destination`.
pub fn source_well(destination: WellCoord) -> (usize, WellCoord) {
    let row = destination.row - 1;
    let column = destination.column - 1;
    let index = (row % 2) * 2 + column % 2;
    (
        index as usize,
        WellCoord::new(row / 2 + 1, column / 2 + 1),
    )
}

/// A plate to be compressed: its configuration and the wells that hold
/// something. Empty wells are not carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlate {
    pub configuration: PlateConfiguration,
    pub occupied: Vec<WellCoord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompressedWell {
    pub source_index: usize,
    pub source: WellCoord,
    pub destination: WellCoord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionLayout {
    pub destination: PlateConfiguration,
    /// Sorted by destination well.
    pub wells: Vec<CompressedWell>,
}

/// Check that the source plates can be compressed together and return the
/// configuration the destination plate must have.
pub fn check_sources(configurations: &[PlateConfiguration]) -> LimsResult<PlateConfiguration> {
    let Some(&first) = configurations.first() else {
        return Err(ValidationError::NoInputs("plate compression").into());
    };
    if configurations.len() > MAX_SOURCE_PLATES {
        return Err(ValidationError::TooManySourcePlates {
            given: configurations.len(),
            max: MAX_SOURCE_PLATES,
        }
        .into());
    }
    for (index, &actual) in configurations.iter().enumerate().skip(1) {
        if actual != first {
            return Err(ConfigurationError::MismatchedSourcePlates {
                index,
                expected: first,
                actual,
            }
            .into());
        }
    }
    Ok(first.compressed())
}

/// Fail unless `destination` is exactly the compressed form of `source`.
pub fn check_destination(
    source: PlateConfiguration,
    destination: PlateConfiguration,
) -> LimsResult<()> {
    let expected = source.compressed();
    if destination != expected {
        return Err(ConfigurationError::DestinationMismatch {
            source_config: source,
            expected,
            actual: destination,
        }
        .into());
    }
    Ok(())
}

/// Map every occupied source well onto the destination plate.
pub fn compression_layout(sources: &[SourcePlate]) -> LimsResult<CompressionLayout> {
    let configurations: Vec<_> = sources.iter().map(|s| s.configuration).collect();
    let destination = check_sources(&configurations)?;

    let mut wells = Vec::new();
    for (source_index, plate) in sources.iter().enumerate() {
        for &source in plate.occupied.iter().sorted().dedup() {
            plate.configuration.check_well(source)?;
            wells.push(CompressedWell {
                source_index,
                source,
                destination: destination_well(source_index, source),
            });
        }
    }
    wells.sort_by_key(|w| w.destination);
    Ok(CompressionLayout { destination, wells })
}
