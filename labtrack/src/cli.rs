use crate::exports::{Lineage, Picklist, SampleSheetCmd};
use crate::labware::{Discard, PlateSamples, Register};
use crate::steps::{Compress, Extract, LibraryPrep, Normalize, Pool, Quantify, Sequence};
use crate::utils::default_operator;
use anyhow::Result;
use clap::Parser;
use lims_store::LimsStore;
use log::info;
use std::path::PathBuf;

const CMD: &str = "labtrack";

/// Track samples through the wet lab, from plating to sequencing
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
pub struct Cli {
    #[clap(subcommand)]
    pub subcmd: SubCommand,

    /// SQLite database holding the provenance graph
    #[clap(long, global = true, value_name = "PATH", default_value = "labtrack.sqlite")]
    pub db: PathBuf,

    /// Operator recorded on every process; defaults to $USER
    #[clap(long, global = true, value_name = "NAME")]
    pub operator: Option<String>,
}

#[derive(Parser, Debug)]
pub enum SubCommand {
    /// Create the database, or bring an existing one up to date
    #[clap(name = "init")]
    Init,

    /// Register equipment, reagent lots and primer plates
    #[clap(name = "register", subcommand)]
    Register(Register),

    /// Plate samples from a layout CSV
    #[clap(name = "plate")]
    Plate(PlateSamples),

    /// Extract gDNA from a sample plate
    #[clap(name = "extract")]
    Extract(Extract),

    /// Compress up to four plates into one
    #[clap(name = "compress")]
    Compress(Compress),

    /// Record concentrations from instrument readings
    #[clap(name = "quantify")]
    Quantify(Quantify),

    /// Normalize a quantified plate to a common DNA mass
    #[clap(name = "normalize")]
    Normalize(Normalize),

    /// Prepare 16S amplicon or shotgun libraries
    #[clap(name = "library-prep", subcommand)]
    LibraryPrep(LibraryPrep),

    /// Pool libraries or pools into a tube
    #[clap(name = "pool")]
    Pool(Pool),

    /// Record a sequencing run
    #[clap(name = "sequence")]
    Sequence(Sequence),

    /// Write the Echo pick list of a normalization or pooling
    #[clap(name = "picklist")]
    Picklist(Picklist),

    /// Write the sample sheet of a sequencing run
    #[clap(name = "sample-sheet")]
    SampleSheet(SampleSheetCmd),

    /// Show where a composition came from and what was made of it
    #[clap(name = "lineage")]
    Lineage(Lineage),

    /// Mark a plate or tube as discarded
    #[clap(name = "discard")]
    Discard(Discard),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let mut store = LimsStore::open(&self.db)?;
        let operator = self.operator.unwrap_or_else(default_operator);
        match self.subcmd {
            SubCommand::Init => {
                info!("database {} is ready", self.db.display());
                Ok(())
            }
            SubCommand::Register(c) => c.run(&mut store, &operator),
            SubCommand::Plate(c) => c.run(&mut store, &operator),
            SubCommand::Extract(c) => c.run(&mut store, &operator),
            SubCommand::Compress(c) => c.run(&mut store, &operator),
            SubCommand::Quantify(c) => c.run(&mut store, &operator),
            SubCommand::Normalize(c) => c.run(&mut store, &operator),
            SubCommand::LibraryPrep(c) => c.run(&mut store, &operator),
            SubCommand::Pool(c) => c.run(&mut store, &operator),
            SubCommand::Sequence(c) => c.run(&mut store, &operator),
            SubCommand::Picklist(c) => c.run(&store),
            SubCommand::SampleSheet(c) => c.run(&store),
            SubCommand::Lineage(c) => c.run(&store),
            SubCommand::Discard(c) => c.run(&mut store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::try_parse_from(["labtrack", "init", "--db", "lab.sqlite"]).unwrap();
        assert_eq!(cli.db, PathBuf::from("lab.sqlite"));
        assert!(matches!(cli.subcmd, SubCommand::Init));
        assert!(Cli::try_parse_from(["labtrack", "launch"]).is_err());
    }
}
