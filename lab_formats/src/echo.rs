//! Pick lists for the Echo acoustic liquid handler.
//!
//! One row per transfer, in the column order the Echo import expects. Rows
//! are sorted by destination plate name, then destination row, then column;
//! the sort is stable, so transfers into one well keep their given order.

use anyhow::Result;
use itertools::Itertools;
use lab_calc::normalization::NormalizationPlan;
use lab_calc::pooling::PoolingResult;
use lims_types::{CapacityError, LimsResult, PlateConfiguration, WellCoord};
use serde::Serialize;
use std::fmt;
use std::io::Write;

/// Column headers, in import order.
pub const PICK_LIST_HEADER: [&str; 8] = [
    "Sample Name",
    "Source Plate Name",
    "Source Plate Type",
    "Source Well",
    "Concentration",
    "Transfer Volume",
    "Destination Plate Name",
    "Destination Well",
];

/// Slack allowed when filling a destination well up to its maximum volume.
const FILL_TOLERANCE: f64 = 1e-9;

/// A source well as the Echo addresses it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EchoWell {
    pub sample_name: String,
    pub plate: String,
    pub well: WellCoord,
}

impl fmt::Display for EchoWell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.plate, self.well, self.sample_name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub sample_name: String,
    pub source_plate: String,
    pub source_well: WellCoord,
    pub concentration: Option<f64>,
    pub volume_nl: f64,
    pub destination_plate: String,
    pub destination_well: WellCoord,
}

/// Where water for dilutions is drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaterSource {
    pub plate: String,
    pub well: WellCoord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickListRow {
    #[serde(rename = "Sample Name")]
    pub sample_name: String,
    #[serde(rename = "Source Plate Name")]
    pub source_plate_name: String,
    #[serde(rename = "Source Plate Type")]
    pub source_plate_type: String,
    #[serde(rename = "Source Well")]
    pub source_well: String,
    #[serde(rename = "Concentration")]
    pub concentration: Option<f64>,
    #[serde(rename = "Transfer Volume")]
    pub transfer_volume: f64,
    #[serde(rename = "Destination Plate Name")]
    pub destination_plate_name: String,
    #[serde(rename = "Destination Well")]
    pub destination_well: String,
}

/// Format transfers as pick list rows. No volume is recomputed here.
pub fn generate_pick_list(transfers: &[Transfer], source_plate_type: &str) -> Vec<PickListRow> {
    transfers
        .iter()
        .sorted_by(|a, b| {
            a.destination_plate
                .cmp(&b.destination_plate)
                .then(a.destination_well.cmp(&b.destination_well))
        })
        .map(|t| PickListRow {
            sample_name: t.sample_name.clone(),
            source_plate_name: t.source_plate.clone(),
            source_plate_type: source_plate_type.to_string(),
            source_well: t.source_well.to_string(),
            concentration: t.concentration,
            transfer_volume: t.volume_nl,
            destination_plate_name: t.destination_plate.clone(),
            destination_well: t.destination_well.to_string(),
        })
        .collect()
}

pub fn write_pick_list<W: Write>(rows: &[PickListRow], writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(PICK_LIST_HEADER)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn pick_list_string(rows: &[PickListRow]) -> Result<String> {
    let mut buf = Vec::new();
    write_pick_list(rows, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

/// Sample then water for every normalized well, into the same coordinate
/// of the destination plate. Water transfers of zero volume are left out.
pub fn normalization_transfers(
    plan: &NormalizationPlan<EchoWell>,
    destination_plate: &str,
    water: &WaterSource,
) -> Vec<Transfer> {
    let mut transfers = Vec::with_capacity(plan.wells.len() * 2);
    for w in &plan.wells {
        transfers.push(Transfer {
            sample_name: w.input.sample_name.clone(),
            source_plate: w.input.plate.clone(),
            source_well: w.input.well,
            concentration: Some(w.concentration),
            volume_nl: w.volumes.dna_volume_nl,
            destination_plate: destination_plate.to_string(),
            destination_well: w.input.well,
        });
        if w.volumes.water_volume_nl > 0.0 {
            transfers.push(Transfer {
                sample_name: w.input.sample_name.clone(),
                source_plate: water.plate.clone(),
                source_well: water.well,
                concentration: None,
                volume_nl: w.volumes.water_volume_nl,
                destination_plate: destination_plate.to_string(),
                destination_well: w.input.well,
            });
        }
    }
    transfers
}

/// Fill destination wells A1, A2, ... in row-major order, moving on when
/// the next transfer would push a well past `max_per_well`.
pub fn assign_destination_wells(
    volumes: &[f64],
    max_per_well: f64,
    configuration: PlateConfiguration,
) -> LimsResult<Vec<WellCoord>> {
    let full = || CapacityError::DestinationPlateFull {
        config: configuration,
    };
    let mut wells = configuration.wells();
    let mut current = wells.next().ok_or_else(full)?;
    let mut filled = 0.0;
    let mut assigned = Vec::with_capacity(volumes.len());
    for &volume in volumes {
        if volume > max_per_well {
            return Err(CapacityError::TransferExceedsWell {
                volume,
                max_volume: max_per_well,
            }
            .into());
        }
        if filled + volume > max_per_well + FILL_TOLERANCE {
            current = wells.next().ok_or_else(full)?;
            filled = 0.0;
        }
        filled += volume;
        assigned.push(current);
    }
    Ok(assigned)
}

/// One transfer per pool component, spread over as many destination wells
/// as the per-well maximum requires.
pub fn pooling_transfers(
    result: &PoolingResult<EchoWell>,
    destination_plate: &str,
    configuration: PlateConfiguration,
    max_per_well: f64,
) -> LimsResult<Vec<Transfer>> {
    let volumes: Vec<f64> = result.components.iter().map(|c| c.volume_nl).collect();
    let destinations = assign_destination_wells(&volumes, max_per_well, configuration)?;
    Ok(result
        .components
        .iter()
        .zip(destinations)
        .map(|(c, destination_well)| Transfer {
            sample_name: c.input.sample_name.clone(),
            source_plate: c.input.plate.clone(),
            source_well: c.input.well,
            concentration: Some(c.concentration),
            volume_nl: c.volume_nl,
            destination_plate: destination_plate.to_string(),
            destination_well,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_calc::normalization::{NormalizedVolumes, NormalizedWell};
    use lims_types::LimsError;
    use pretty_assertions::assert_eq;

    fn well(s: &str) -> WellCoord {
        s.parse().unwrap()
    }

    fn transfer(sample: &str, dest_plate: &str, dest: &str, volume_nl: f64) -> Transfer {
        Transfer {
            sample_name: sample.to_string(),
            source_plate: "src".to_string(),
            source_well: well("A1"),
            concentration: None,
            volume_nl,
            destination_plate: dest_plate.to_string(),
            destination_well: well(dest),
        }
    }

    #[test]
    fn test_rows_sorted_by_destination() {
        let transfers = vec![
            transfer("s1", "norm2", "A1", 1.0),
            transfer("s2", "norm1", "B1", 2.0),
            transfer("s3", "norm1", "A10", 3.0),
            transfer("s4", "norm1", "A2", 4.0),
            transfer("s5", "norm1", "A2", 5.0),
        ];
        let rows = generate_pick_list(&transfers, "384PP_AQ_BP2");
        let order: Vec<_> = rows.iter().map(|r| r.sample_name.as_str()).collect();
        assert_eq!(order, vec!["s4", "s5", "s3", "s2", "s1"]);
        assert!(rows.iter().all(|r| r.source_plate_type == "384PP_AQ_BP2"));
    }

    #[test]
    fn test_csv_layout() {
        let mut t = transfer("1.SKB1", "norm", "P24", 1612.5);
        t.concentration = Some(3.1);
        let text = pick_list_string(&generate_pick_list(&[t], "384PP_AQ_BP2")).unwrap();
        assert_eq!(
            text,
            "Sample Name,Source Plate Name,Source Plate Type,Source Well,Concentration,\
             Transfer Volume,Destination Plate Name,Destination Well\n\
             1.SKB1,src,384PP_AQ_BP2,A1,3.1,1612.5,norm,P24\n"
        );
        let empty = pick_list_string(&[]).unwrap();
        assert_eq!(empty.lines().count(), 1);
    }

    #[test]
    fn test_normalization_transfers() {
        let input = |name: &str, w: &str| EchoWell {
            sample_name: name.to_string(),
            plate: "gdna".to_string(),
            well: well(w),
        };
        let plan = NormalizationPlan {
            wells: vec![
                NormalizedWell {
                    input: input("s1", "A1"),
                    concentration: 0.342,
                    volumes: NormalizedVolumes {
                        dna_volume_nl: 3500.0,
                        water_volume_nl: 0.0,
                        flag: None,
                    },
                },
                NormalizedWell {
                    input: input("s2", "A2"),
                    concentration: 3.1,
                    volumes: NormalizedVolumes {
                        dna_volume_nl: 1612.5,
                        water_volume_nl: 1887.5,
                        flag: None,
                    },
                },
            ],
            skipped: Vec::new(),
        };
        let water = WaterSource {
            plate: "water".to_string(),
            well: well("A1"),
        };
        let transfers = normalization_transfers(&plan, "norm", &water);
        assert_eq!(transfers.len(), 3);
        assert_eq!(transfers[1].source_plate, "gdna");
        assert_eq!(transfers[1].volume_nl, 1612.5);
        assert_eq!(transfers[2].source_plate, "water");
        assert_eq!(transfers[2].concentration, None);
        assert_eq!(transfers[2].destination_well, well("A2"));
    }

    #[test]
    fn test_assign_destination_wells() {
        let wells = assign_destination_wells(
            &[40_000.0, 20_000.0, 10_000.0, 50_000.0],
            60_000.0,
            PlateConfiguration::PLATE_384,
        )
        .unwrap();
        let names: Vec<_> = wells.iter().map(|w| w.to_string()).collect();
        assert_eq!(names, vec!["A1", "A1", "A2", "A2"]);

        assert_eq!(
            assign_destination_wells(&[70_000.0], 60_000.0, PlateConfiguration::PLATE_384)
                .unwrap_err(),
            LimsError::Capacity(CapacityError::TransferExceedsWell {
                volume: 70_000.0,
                max_volume: 60_000.0
            })
        );
        let tiny = PlateConfiguration::new(1, 2);
        assert!(matches!(
            assign_destination_wells(&[1.0, 1.0, 1.0], 1.0, tiny).unwrap_err(),
            LimsError::Capacity(CapacityError::DestinationPlateFull { .. })
        ));
    }
}
