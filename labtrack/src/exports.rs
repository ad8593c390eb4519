use crate::utils::output;
use anyhow::{bail, Result};
use clap::Parser;
use lab_formats::echo::{write_pick_list, WaterSource};
use lims_store::LimsStore;
use lims_types::{CompositionId, PlateConfiguration, ProcessId, WellCoord};
use provenance::{Composition, ProcessKind};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub struct Picklist {
    /// Normalization or pooling process
    process: i64,

    /// Output CSV; stdout by default
    #[clap(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Labware type of the Echo source plates
    #[clap(long, value_name = "TYPE")]
    source_plate_type: Option<String>,

    /// Plate water is drawn from (normalization)
    #[clap(long, value_name = "ID")]
    water_plate: Option<String>,

    /// Well water is drawn from (normalization)
    #[clap(long, value_name = "WELL")]
    water_well: Option<WellCoord>,

    /// Plate the pool is dispensed into (pooling); the pool name by default
    #[clap(long, value_name = "ID")]
    destination_plate: Option<String>,

    /// Most volume dispensed into one destination well (pooling)
    #[clap(long, value_name = "NL")]
    max_per_well_nl: Option<f64>,
}

impl Picklist {
    pub fn run(self, store: &LimsStore) -> Result<()> {
        let process = store.process(ProcessId(self.process))?;
        let source_plate_type = match &self.source_plate_type {
            Some(t) => t.as_str(),
            None => parameters_toml::echo_source_plate_type()?,
        };
        let rows = match process.kind {
            ProcessKind::Normalization => {
                let water = WaterSource {
                    plate: match self.water_plate {
                        Some(plate) => plate,
                        None => parameters_toml::water_source_plate()?.to_string(),
                    },
                    well: match self.water_well {
                        Some(well) => well,
                        None => parameters_toml::water_source_well()?.parse()?,
                    },
                };
                store.normalization_pick_list(process.id, source_plate_type, &water)?
            }
            ProcessKind::Pooling => {
                let destination = match self.destination_plate {
                    Some(plate) => plate,
                    None => match process.parameters.as_pooling() {
                        Some(record) => record.pool_name.clone(),
                        None => bail!("process {} has no pooling record", process.id),
                    },
                };
                let configuration = PlateConfiguration::new(
                    *parameters_toml::pool_destination_rows()?,
                    *parameters_toml::pool_destination_columns()?,
                );
                let max_per_well_nl = match self.max_per_well_nl {
                    Some(v) => v,
                    None => *parameters_toml::echo_max_volume_per_well_nl()?,
                };
                store.pooling_pick_list(
                    process.id,
                    source_plate_type,
                    &destination,
                    configuration,
                    max_per_well_nl,
                )?
            }
            kind => bail!("process {} is a {kind}; only normalization and pooling have pick lists", process.id),
        };
        write_pick_list(&rows, output(self.output.as_deref())?)?;
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct SampleSheetCmd {
    /// Sequencing process
    process: i64,

    /// Output file; stdout by default
    #[clap(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

impl SampleSheetCmd {
    pub fn run(self, store: &LimsStore) -> Result<()> {
        let sheet = store.sample_sheet(ProcessId(self.process))?;
        sheet.write(output(self.output.as_deref())?)?;
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct Lineage {
    /// Composition id
    #[clap(long, value_name = "ID", conflicts_with_all = ["plate", "tube", "sample"])]
    composition: Option<i64>,

    /// Plate holding the composition; use with --well
    #[clap(long, value_name = "ID", requires = "well", conflicts_with_all = ["tube", "sample"])]
    plate: Option<String>,

    #[clap(long, value_name = "WELL")]
    well: Option<WellCoord>,

    /// Tube holding the composition
    #[clap(long, value_name = "ID", conflicts_with = "sample")]
    tube: Option<String>,

    /// List the plates a sample id went through
    #[clap(long, value_name = "SAMPLE_ID")]
    sample: Option<String>,
}

impl Lineage {
    fn target(&self, store: &LimsStore) -> Result<Composition> {
        if let Some(id) = self.composition {
            return Ok(store.composition(CompositionId(id))?);
        }
        if let Some(tube) = &self.tube {
            return Ok(store.tube_composition(tube)?);
        }
        let (Some(plate), Some(well)) = (&self.plate, self.well) else {
            bail!("one of --composition, --plate/--well, --tube or --sample is required");
        };
        match store
            .plate_compositions(plate)?
            .into_iter()
            .find(|(coord, _)| *coord == well)
        {
            Some((_, composition)) => Ok(composition),
            None => bail!("well {well} of plate '{plate}' is empty"),
        }
    }

    fn write_row(store: &LimsStore, out: &mut dyn Write, relation: &str, c: &Composition) -> Result<()> {
        writeln!(
            out,
            "{relation}\t{}\t{}\t{}\tprocess {}",
            c.id,
            c.kind(),
            store.location(c)?,
            c.upstream_process
        )?;
        Ok(())
    }

    pub fn run(self, store: &LimsStore) -> Result<()> {
        let mut out = output(None)?;
        if let Some(sample) = &self.sample {
            for plate in store.plates_for_sample(sample)? {
                writeln!(out, "{plate}")?;
            }
            return Ok(());
        }
        let target = self.target(store)?;
        for c in store.ancestors_of(target.id)? {
            Self::write_row(store, &mut out, "ancestor", &c)?;
        }
        Self::write_row(store, &mut out, "self", &target)?;
        for c in store.descendants_of(target.id)? {
            Self::write_row(store, &mut out, "descendant", &c)?;
        }
        Ok(())
    }
}
