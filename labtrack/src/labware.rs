use crate::utils::open_csv;
use anyhow::{bail, Result};
use clap::Parser;
use lab_formats::layout::{read_index_pairs, read_plate_layout, read_primer_layout};
use lims_store::{IndexCombination, IndexPrimer, LimsStore, StoreError};
use lims_types::{EquipmentKind, PlateConfiguration, ReagentKind};
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub enum Register {
    /// Register a robot or instrument
    #[clap(name = "equipment")]
    Equipment {
        /// External id of the equipment
        external_id: String,
        /// ep_motion, king_fisher, mosquito, echo or sequencer
        #[clap(long, value_name = "KIND")]
        kind: EquipmentKind,
    },

    /// Register a reagent lot; a tube named after the lot holds it
    #[clap(name = "reagent")]
    Reagent {
        lot: String,
        /// extraction_kit, master_mix, water, kapa_hyper_plus or stubs
        #[clap(long, value_name = "KIND")]
        kind: ReagentKind,
    },

    /// Register a shotgun i5/i7 primer set from a CSV of index pairs
    #[clap(name = "primer-set")]
    PrimerSet {
        name: String,
        /// CSV with columns i5_name,i5_sequence,i7_name,i7_sequence
        #[clap(long, value_name = "CSV")]
        pairs: PathBuf,
    },

    /// Register a plate of barcoded 16S primers
    #[clap(name = "primer-plate")]
    PrimerPlate {
        /// External id of the primer plate
        plate: String,
        #[clap(long, value_name = "NAME")]
        primer_set: String,
        /// CSV with columns well,name,sequence
        #[clap(long, value_name = "CSV")]
        layout: PathBuf,
        #[clap(long, value_name = "96|384|RxC", default_value = "96")]
        config: PlateConfiguration,
    },
}

impl Register {
    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        match self {
            Register::Equipment { external_id, kind } => {
                let equipment = store.register_equipment(&external_id, kind)?;
                println!("equipment {} '{}' ({})", equipment.id, equipment.external_id, equipment.kind);
            }
            Register::Reagent { lot, kind } => {
                let reagent = store.register_reagent(&lot, kind, operator)?;
                println!("reagent {} lot '{}' ({})", reagent.id, reagent.external_lot_id, reagent.kind);
            }
            Register::PrimerSet { name, pairs } => {
                let combinations: Vec<_> = read_index_pairs(open_csv(&pairs)?)?
                    .into_iter()
                    .map(|pair| IndexCombination {
                        i5: IndexPrimer {
                            name: pair.i5_name,
                            sequence: pair.i5_sequence,
                        },
                        i7: IndexPrimer {
                            name: pair.i7_name,
                            sequence: pair.i7_sequence,
                        },
                    })
                    .collect();
                let id = store.register_primer_set(&name, &combinations, operator)?;
                println!("primer set {id} '{name}' with {} combinations", combinations.len());
            }
            Register::PrimerPlate {
                plate,
                primer_set,
                layout,
                config,
            } => {
                let primers: Vec<_> = read_primer_layout(open_csv(&layout)?)?
                    .into_iter()
                    .map(|(coord, name, sequence)| (coord, IndexPrimer { name, sequence }))
                    .collect();
                let plate = store.register_amplicon_primer_plate(&plate, &primer_set, config, &primers, operator)?;
                println!("primer plate '{}' with {} primers", plate.external_id, primers.len());
            }
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct PlateSamples {
    /// External id of the sample plate; created if it does not exist
    plate: String,

    /// CSV with columns well,content. Empty content plates a blank.
    #[clap(long, value_name = "CSV")]
    layout: PathBuf,

    /// Configuration of a new plate
    #[clap(long, value_name = "96|384|RxC", default_value = "96")]
    config: PlateConfiguration,
}

impl PlateSamples {
    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        let layout = read_plate_layout(open_csv(&self.layout)?)?;
        match store.plate(&self.plate) {
            Ok(_) => {}
            Err(StoreError::UnknownId { .. }) => {
                store.create_plate(&self.plate, self.config)?;
            }
            Err(err) => return Err(err.into()),
        }
        let report = store.plate_samples(&self.plate, &layout, operator)?;
        println!(
            "process {}: plated {} wells on '{}'",
            report.process.id,
            report.wells.len(),
            report.plate.external_id
        );
        for well in report.conflicts() {
            for other in &well.check.previous_plates {
                println!("{}\t{}\talso plated at {other}", well.well, well.content);
            }
            for other in &well.check.same_plate {
                println!("{}\t{}\trepeated at {other}", well.well, well.content);
            }
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct Discard {
    #[clap(long, value_name = "ID", required_unless_present = "tube", conflicts_with = "tube")]
    plate: Option<String>,

    #[clap(long, value_name = "ID")]
    tube: Option<String>,
}

impl Discard {
    pub fn run(self, store: &mut LimsStore) -> Result<()> {
        match (self.plate, self.tube) {
            (Some(plate), _) => store.discard_plate(&plate)?,
            (None, Some(tube)) => store.discard_tube(&tube)?,
            (None, None) => bail!("either --plate or --tube is required"),
        }
        Ok(())
    }
}
