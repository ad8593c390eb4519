//! Physical location primitives: plate configurations, well coordinates,
//! plates, wells, tubes and the containers behind them.

use crate::errors::ValidationError;
use crate::ids::{ContainerId, PlateId, ProcessId, TubeId, WellId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row and column counts of a plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlateConfiguration {
    pub num_rows: u16,
    pub num_columns: u16,
}

impl PlateConfiguration {
    /// Standard 96-well plate, rows A-H and columns 1-12.
    pub const PLATE_96: PlateConfiguration = PlateConfiguration::new(8, 12);
    /// Standard 384-well plate, rows A-P and columns 1-24.
    pub const PLATE_384: PlateConfiguration = PlateConfiguration::new(16, 24);

    pub const fn new(num_rows: u16, num_columns: u16) -> Self {
        PlateConfiguration {
            num_rows,
            num_columns,
        }
    }

    pub fn num_wells(&self) -> usize {
        self.num_rows as usize * self.num_columns as usize
    }

    pub fn contains(&self, coord: WellCoord) -> bool {
        (1..=self.num_rows).contains(&coord.row) && (1..=self.num_columns).contains(&coord.column)
    }

    /// Fail unless `coord` addresses a well of this configuration.
    pub fn check_well(&self, coord: WellCoord) -> Result<(), ValidationError> {
        if self.contains(coord) {
            Ok(())
        } else {
            Err(ValidationError::WellOutOfRange {
                well: coord.to_string(),
                config: *self,
            })
        }
    }

    /// The configuration holding four plates of this one interleaved,
    /// twice the rows and twice the columns.
    pub fn compressed(&self) -> PlateConfiguration {
        PlateConfiguration::new(self.num_rows * 2, self.num_columns * 2)
    }

    /// All wells, row-major (A1, A2, ..., B1, ...).
    pub fn wells(&self) -> impl Iterator<Item = WellCoord> {
        let num_columns = self.num_columns;
        (1..=self.num_rows)
            .flat_map(move |row| (1..=num_columns).map(move |column| WellCoord::new(row, column)))
    }
}

impl fmt::Display for PlateConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            PlateConfiguration::PLATE_96 | PlateConfiguration::PLATE_384 => {
                write!(f, "{}-well", self.num_wells())
            }
            _ => write!(f, "{}x{}", self.num_rows, self.num_columns),
        }
    }
}

impl FromStr for PlateConfiguration {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidPlateConfiguration(s.to_string());
        match s.trim().trim_end_matches("-well") {
            "96" => Ok(PlateConfiguration::PLATE_96),
            "384" => Ok(PlateConfiguration::PLATE_384),
            other => {
                let (rows, columns) = other.split_once(['x', 'X']).ok_or_else(invalid)?;
                let num_rows: u16 = rows.trim().parse().map_err(|_| invalid())?;
                let num_columns: u16 = columns.trim().parse().map_err(|_| invalid())?;
                if num_rows == 0 || num_columns == 0 {
                    return Err(invalid());
                }
                Ok(PlateConfiguration::new(num_rows, num_columns))
            }
        }
    }
}

/// 1-based (row, column) position of a well. Orders by row, then column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WellCoord {
    pub row: u16,
    pub column: u16,
}

impl WellCoord {
    pub const fn new(row: u16, column: u16) -> Self {
        WellCoord { row, column }
    }

    /// Row letters: 1 -> A, 26 -> Z, 27 -> AA.
    pub fn row_label(&self) -> String {
        let mut n = self.row as u32;
        let mut label = Vec::new();
        while n > 0 {
            n -= 1;
            label.push(char::from(b'A' + (n % 26) as u8));
            n /= 26;
        }
        label.iter().rev().collect()
    }
}

impl fmt::Display for WellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row_label(), self.column)
    }
}

impl FromStr for WellCoord {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidWell(s.to_string());
        let s = s.trim();
        let split = s.find(|c: char| c.is_ascii_digit()).ok_or_else(invalid)?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        let row = letters.chars().try_fold(0u32, |acc, c| {
            let next = acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
            (next <= u16::MAX as u32).then_some(next)
        });
        let row = row.ok_or_else(invalid)? as u16;
        let column: u16 = digits.parse().map_err(|_| invalid())?;
        if column == 0 {
            return Err(invalid());
        }
        Ok(WellCoord::new(row, column))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    pub id: PlateId,
    pub external_id: String,
    pub configuration: PlateConfiguration,
    pub discarded: bool,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Well {
    pub id: WellId,
    pub plate: PlateId,
    pub coord: WellCoord,
    pub container: ContainerId,
}

/// A container not bound to a plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tube {
    pub id: TubeId,
    pub external_id: String,
    pub container: ContainerId,
    pub discarded: bool,
}

/// Where a container physically sits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerLocation {
    Well {
        plate: PlateId,
        plate_external_id: String,
        coord: WellCoord,
    },
    Tube {
        external_id: String,
    },
}

impl fmt::Display for ContainerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerLocation::Well {
                plate_external_id,
                coord,
                ..
            } => write!(f, "{plate_external_id}:{coord}"),
            ContainerLocation::Tube { external_id } => write!(f, "{external_id}"),
        }
    }
}

/// Physical vessel. The remaining volume is decremented by consuming
/// processes and is unknown (`None`) until a process records one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub latest_process: Option<ProcessId>,
    pub remaining_volume: Option<f64>,
    pub location: ContainerLocation,
}

/// A well identified for reporting purposes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WellRef {
    pub plate_external_id: String,
    pub plate: PlateId,
    pub coord: WellCoord,
}

impl fmt::Display for WellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plate_external_id, self.coord)
    }
}
