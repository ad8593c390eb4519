use crate::utils::open_csv;
use anyhow::{anyhow, bail, ensure, Context, Result};
use clap::Parser;
use lab_calc::concentration::CurveParameters;
use lab_calc::normalization::NormalizationParameters;
use lab_calc::pooling::PoolingStrategy;
use lab_formats::layout::{read_pool_readings, read_readings, read_standards};
use lims_store::{LimsStore, StepReport};
use lims_types::{InstrumentModel, PlateConfiguration, ProcessId};
use provenance::{
    AmpliconLibraryParameters, Assay, ExtractionParameters, LaneAssignment, QuantificationMethod,
    QuantificationParameters, SequencingParameters, ShotgunLibraryParameters,
};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn print_step(report: &StepReport) {
    println!(
        "process {}: {} wrote {} wells to '{}'",
        report.process.id,
        report.process.kind,
        report.outputs.len(),
        report.plate.external_id
    );
}

#[derive(Parser, Debug)]
pub struct Extract {
    /// Sample plate to extract from
    samples: String,

    /// External id of the new gDNA plate
    #[clap(long, value_name = "ID")]
    output: String,

    /// Liquid handler that set up the extraction
    #[clap(long, value_name = "ID")]
    robot: String,

    /// Magnetic bead robot that ran the extraction
    #[clap(long, value_name = "ID")]
    extraction_robot: String,

    #[clap(long, value_name = "LOT")]
    kit_lot: String,

    /// Elution volume per well
    #[clap(long, value_name = "NL")]
    volume_nl: f64,
}

impl Extract {
    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        let parameters = ExtractionParameters {
            robot: self.robot,
            extraction_robot: self.extraction_robot,
            kit_lot: self.kit_lot,
            volume_nl: self.volume_nl,
        };
        let report = store.extract_gdna(&self.samples, &self.output, parameters, operator)?;
        print_step(&report);
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct Compress {
    /// Source plates in quadrant order; up to four
    #[clap(long = "source", value_name = "ID", required = true, num_args = 1..=4)]
    sources: Vec<String>,

    /// External id of the compressed plate
    #[clap(long, value_name = "ID")]
    output: String,

    #[clap(long, value_name = "ID")]
    robot: String,

    /// Configuration of the compressed plate; by default twice the rows and
    /// columns of the sources
    #[clap(long, value_name = "96|384|RxC")]
    config: Option<PlateConfiguration>,
}

impl Compress {
    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        let sources: Vec<&str> = self.sources.iter().map(String::as_str).collect();
        let report = store.compress_plates(&sources, &self.output, self.config, &self.robot, operator)?;
        print_step(&report);
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct Quantify {
    /// Plate the readings were taken from
    #[clap(long, value_name = "ID", required_unless_present = "pools", conflicts_with = "pools")]
    plate: Option<String>,

    /// Readings are of pooled tubes (CSV columns pool,raw)
    #[clap(long)]
    pools: bool,

    /// CSV with columns well,raw (or pool,raw with --pools)
    #[clap(long, value_name = "CSV")]
    readings: PathBuf,

    /// pico_green or qpcr
    #[clap(long, value_name = "METHOD", default_value = "pico_green")]
    method: QuantificationMethod,

    /// Standard series (CSV columns raw,concentration) to fit the curve from
    #[clap(long, value_name = "CSV", conflicts_with_all = ["slope", "intercept"])]
    standards: Option<PathBuf>,

    #[clap(long, value_name = "NUM", allow_negative_numbers = true)]
    slope: Option<f64>,

    #[clap(long, value_name = "NUM", allow_negative_numbers = true)]
    intercept: Option<f64>,

    /// Lowest raw reading inside the calibration range
    #[clap(long, value_name = "NUM", allow_negative_numbers = true)]
    min_raw: Option<f64>,

    /// Highest raw reading inside the calibration range
    #[clap(long, value_name = "NUM", allow_negative_numbers = true)]
    max_raw: Option<f64>,

    /// Raw readings are crossing points: concentration = 10^((raw - intercept) / slope)
    #[clap(long)]
    log_linear: bool,

    /// Average fragment size, to also record molar concentrations
    #[clap(long, value_name = "BP")]
    fragment_size_bp: Option<f64>,
}

impl Quantify {
    fn curve(&self) -> Result<CurveParameters> {
        if let Some(path) = &self.standards {
            ensure!(!self.log_linear, "--log-linear needs an explicit --slope and --intercept");
            let standards = read_standards(open_csv(path)?).with_context(|| path.display().to_string())?;
            return Ok(CurveParameters::StandardCurve { standards });
        }
        let (Some(slope), Some(intercept)) = (self.slope, self.intercept) else {
            bail!("either --standards or both --slope and --intercept are required");
        };
        let min_raw = self.min_raw.unwrap_or(f64::MIN);
        let max_raw = self.max_raw.unwrap_or(f64::MAX);
        Ok(if self.log_linear {
            CurveParameters::LogLinear {
                slope,
                intercept,
                min_raw,
                max_raw,
            }
        } else {
            CurveParameters::Linear {
                slope,
                intercept,
                min_raw,
                max_raw,
            }
        })
    }

    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        let parameters = QuantificationParameters {
            method: self.method,
            curve: self.curve()?,
            fragment_size_bp: self.fragment_size_bp,
        };
        let report = match &self.plate {
            Some(plate) => {
                let readings = read_readings(open_csv(&self.readings)?)?;
                store.quantify_plate(plate, &readings, parameters, operator)?
            }
            None => {
                let readings = read_pool_readings(open_csv(&self.readings)?)?;
                store.quantify_pools(&readings, parameters, operator)?
            }
        };
        println!(
            "process {}: {} concentrations recorded",
            report.process.id,
            report.calculations.len()
        );
        for calc in &report.calculations {
            let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
            println!(
                "{}\t{}\t{}\t{}",
                calc.composition,
                calc.raw,
                fmt(calc.concentration),
                fmt(calc.molar_concentration)
            );
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct Normalize {
    /// Quantified plate to normalize
    plate: String,

    /// External id of the normalized plate
    #[clap(long, value_name = "ID")]
    output: String,

    /// Quantification process to take concentrations from; the latest one of
    /// the plate by default
    #[clap(long, value_name = "PROCESS")]
    quantification: Option<i64>,

    #[clap(long, value_name = "LOT")]
    water_lot: String,

    #[clap(long, value_name = "NG")]
    target_mass_ng: Option<f64>,

    #[clap(long, value_name = "NL")]
    total_volume_nl: Option<f64>,

    #[clap(long, value_name = "NL")]
    min_volume_nl: Option<f64>,

    #[clap(long, value_name = "NL")]
    max_volume_nl: Option<f64>,

    /// Dispensing resolution of the liquid handler
    #[clap(long, value_name = "NL")]
    resolution_nl: Option<f64>,

    /// Leave zero concentration wells out of the normalized plate
    #[clap(long)]
    reformat: bool,
}

impl Normalize {
    fn parameters(&self) -> Result<NormalizationParameters> {
        Ok(NormalizationParameters {
            target_mass_ng: match self.target_mass_ng {
                Some(v) => v,
                None => *parameters_toml::normalization_target_mass_ng()?,
            },
            total_volume_nl: match self.total_volume_nl {
                Some(v) => v,
                None => *parameters_toml::normalization_total_volume_nl()?,
            },
            min_volume_nl: match self.min_volume_nl {
                Some(v) => v,
                None => *parameters_toml::normalization_min_volume_nl()?,
            },
            max_volume_nl: match self.max_volume_nl {
                Some(v) => v,
                None => *parameters_toml::normalization_max_volume_nl()?,
            },
            resolution_nl: match self.resolution_nl {
                Some(v) => v,
                None => *parameters_toml::normalization_resolution_nl()?,
            },
            reformat: self.reformat,
            zero_concentration_threshold: *parameters_toml::zero_concentration_threshold()?,
        })
    }

    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        let parameters = self.parameters()?;
        let report = store.normalize_plate(
            &self.plate,
            &self.output,
            self.quantification.map(ProcessId),
            parameters,
            &self.water_lot,
            operator,
        )?;
        println!(
            "process {}: normalized {} wells into '{}'",
            report.process.id,
            report.outputs.len(),
            report.plate.external_id
        );
        for (well, flag) in &report.flagged {
            println!("{well}\t{flag}");
        }
        for (well, reason) in &report.skipped {
            println!("{well}\tskipped: {reason}");
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub enum LibraryPrep {
    /// Amplify 16S from a gDNA plate with a barcoded primer plate
    #[clap(name = "16s")]
    Amplicon {
        /// gDNA plate
        plate: String,
        #[clap(long, value_name = "ID")]
        output: String,
        #[clap(long, value_name = "ID")]
        robot: String,
        #[clap(long, value_name = "LOT")]
        master_mix_lot: String,
        #[clap(long, value_name = "LOT")]
        water_lot: String,
        #[clap(long, value_name = "ID")]
        primer_plate: String,
        #[clap(long, value_name = "NL")]
        volume_nl: f64,
    },

    /// Tag normalized gDNA with the next unused i5/i7 combinations
    #[clap(name = "shotgun")]
    Shotgun {
        /// Normalized gDNA plate
        plate: String,
        #[clap(long, value_name = "ID")]
        output: String,
        #[clap(long, value_name = "LOT")]
        kapa_lot: String,
        #[clap(long, value_name = "LOT")]
        stub_lot: String,
        #[clap(long, value_name = "NAME")]
        primer_set: String,
        #[clap(long, value_name = "NL")]
        volume_nl: f64,
    },
}

impl LibraryPrep {
    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        let report = match self {
            LibraryPrep::Amplicon {
                plate,
                output,
                robot,
                master_mix_lot,
                water_lot,
                primer_plate,
                volume_nl,
            } => {
                let parameters = AmpliconLibraryParameters {
                    robot,
                    master_mix_lot,
                    water_lot,
                    primer_plate,
                    volume_nl,
                };
                store.library_prep_16s(&plate, &output, parameters, operator)?
            }
            LibraryPrep::Shotgun {
                plate,
                output,
                kapa_lot,
                stub_lot,
                primer_set,
                volume_nl,
            } => {
                let parameters = ShotgunLibraryParameters {
                    kapa_lot,
                    stub_lot,
                    primer_set,
                    volume_nl,
                };
                store.library_prep_shotgun(&plate, &output, parameters, operator)?
            }
        };
        print_step(&report);
        Ok(())
    }
}

/// `key=value`
fn parse_param(s: &str) -> Result<(String, f64)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{s}'"))?;
    let value = value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for '{key}'"))?;
    Ok((key.trim().to_string(), value))
}

#[derive(Parser, Debug)]
pub struct Pool {
    /// Name of the pool; also the external id of its tube
    name: String,

    /// Plates whose libraries are pooled
    #[clap(long = "plate", value_name = "ID", required_unless_present = "pools", conflicts_with = "pools")]
    plates: Vec<String>,

    /// Pools to combine into a pool of pools
    #[clap(long = "pool", value_name = "NAME")]
    pools: Vec<String>,

    /// equal_volume, minimum_volume or pool_of_pools
    #[clap(long, value_name = "NAME")]
    algorithm: String,

    /// Algorithm parameter, e.g. volume_nl=1000 or override.0=600
    #[clap(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, f64)>,
}

impl Pool {
    /// Validated strategy. Minimum-volume floors fall back to the amplicon
    /// defaults when not given.
    fn strategy(&self) -> Result<PoolingStrategy> {
        let mut params: BTreeMap<String, f64> = BTreeMap::new();
        for (key, value) in &self.params {
            ensure!(
                params.insert(key.clone(), *value).is_none(),
                "parameter '{key}' is given more than once"
            );
        }
        if self.algorithm == "minimum_volume" {
            if !params.contains_key("floor_volume_nl") {
                params.insert("floor_volume_nl".to_string(), *parameters_toml::amplicon_floor_volume_nl()?);
            }
            if !params.contains_key("floor_concentration") {
                params.insert(
                    "floor_concentration".to_string(),
                    *parameters_toml::amplicon_floor_concentration()?,
                );
            }
        }
        Ok(PoolingStrategy::from_flat(&self.algorithm, &params)?)
    }

    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        let strategy = self.strategy()?;
        let report = if self.pools.is_empty() {
            let plates: Vec<&str> = self.plates.iter().map(String::as_str).collect();
            store.pool_plates(&self.name, &plates, &strategy, operator)?
        } else {
            let pools: Vec<&str> = self.pools.iter().map(String::as_str).collect();
            store.pool_pools(&self.name, &pools, &strategy, operator)?
        };
        println!(
            "process {}: pool '{}' of {} inputs, {:.1} nL at an estimated {:.3}",
            report.process.id,
            self.name,
            report.result.components.len(),
            report.result.total_volume_nl,
            report.result.estimated_concentration
        );
        for c in &report.result.components {
            let flag = c.flag.map(|f| f.to_string()).unwrap_or_default();
            println!("{}\t{:.1}\t{:.2}%\t{flag}", c.input, c.volume_nl, c.percentage * 100.0);
        }
        Ok(())
    }
}

/// `lane=pool`
fn parse_lane(s: &str) -> Result<(u8, String)> {
    let (lane, pool) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected LANE=POOL, got '{s}'"))?;
    let lane = lane.trim().parse().with_context(|| format!("invalid lane '{lane}'"))?;
    Ok((lane, pool.trim().to_string()))
}

#[derive(Parser, Debug)]
pub struct Sequence {
    #[clap(long, value_name = "NAME")]
    run_name: String,

    #[clap(long, value_name = "NAME")]
    experiment: String,

    /// External id of the registered sequencer
    #[clap(long, value_name = "ID")]
    sequencer: String,

    /// MiSeq, HiSeq2500, HiSeq4000, NextSeq, MiniSeq or NovaSeq
    #[clap(long, value_name = "MODEL")]
    instrument: InstrumentModel,

    /// amplicon or metagenomics
    #[clap(long, value_name = "ASSAY")]
    assay: Assay,

    #[clap(long, value_name = "NUM")]
    fwd_cycles: u32,

    #[clap(long, value_name = "NUM")]
    rev_cycles: u32,

    /// Principal investigator
    #[clap(long, value_name = "NAME")]
    pi: String,

    #[clap(long = "contact", value_name = "NAME")]
    contacts: Vec<String>,

    /// Pool loaded on a lane, e.g. 1=pool_a
    #[clap(long = "lane", value_name = "LANE=POOL", required = true, value_parser = parse_lane)]
    lanes: Vec<(u8, String)>,
}

impl Sequence {
    pub fn run(self, store: &mut LimsStore, operator: &str) -> Result<()> {
        let lanes = self
            .lanes
            .iter()
            .map(|(lane, pool)| {
                let pool = store.tube_composition(pool).with_context(|| format!("lane {lane}"))?;
                Ok(LaneAssignment {
                    lane: *lane,
                    pool: pool.id,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let parameters = SequencingParameters {
            run_name: self.run_name,
            experiment: self.experiment,
            sequencer: self.sequencer,
            instrument: self.instrument,
            assay: self.assay,
            fwd_cycles: self.fwd_cycles,
            rev_cycles: self.rev_cycles,
            principal_investigator: self.pi,
            contacts: self.contacts,
            lanes,
        };
        let process = store.sequence(parameters, operator)?;
        println!("process {}: sequencing run recorded", process.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_calc::pooling::MinimumVolumeParams;
    use pretty_assertions::assert_eq;

    #[derive(Parser, Debug)]
    struct Wrap {
        #[clap(subcommand)]
        cmd: Cmd,
    }

    #[derive(Parser, Debug)]
    enum Cmd {
        Pool(Pool),
        Quantify(Quantify),
        Sequence(Sequence),
    }

    fn parse(args: &[&str]) -> Cmd {
        Wrap::try_parse_from(std::iter::once("test").chain(args.iter().copied()))
            .unwrap()
            .cmd
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("volume_nl=1000").unwrap(), ("volume_nl".to_string(), 1000.0));
        assert_eq!(parse_param("override.2 = 5").unwrap(), ("override.2".to_string(), 5.0));
        assert!(parse_param("volume_nl").is_err());
        assert!(parse_param("volume_nl=lots").is_err());
    }

    #[test]
    fn test_minimum_volume_defaults() {
        let Cmd::Pool(pool) = parse(&[
            "pool",
            "p1",
            "--plate",
            "libs",
            "--algorithm",
            "minimum_volume",
            "--param",
            "total_quantity_ng=240",
        ]) else {
            panic!("not a pool command");
        };
        assert_eq!(
            pool.strategy().unwrap(),
            PoolingStrategy::MinimumVolume(MinimumVolumeParams {
                total_quantity_ng: 240.0,
                floor_concentration: 16.0,
                floor_volume_nl: 2.0,
            })
        );
    }

    #[test]
    fn test_pool_rejects_unknown_parameter() {
        let Cmd::Pool(pool) = parse(&[
            "pool",
            "p1",
            "--plate",
            "libs",
            "--algorithm",
            "equal_volume",
            "--param",
            "volume_nl=200",
            "--param",
            "speed=3",
        ]) else {
            panic!("not a pool command");
        };
        assert!(pool.strategy().is_err());
    }

    #[test]
    fn test_curve_from_flags() {
        let Cmd::Quantify(q) = parse(&[
            "quantify",
            "--plate",
            "gdna",
            "--readings",
            "r.csv",
            "--slope",
            "0.01",
            "--intercept",
            "-0.5",
            "--max-raw",
            "9000",
        ]) else {
            panic!("not a quantify command");
        };
        assert_eq!(q.method, QuantificationMethod::PicoGreen);
        assert_eq!(
            q.curve().unwrap(),
            CurveParameters::Linear {
                slope: 0.01,
                intercept: -0.5,
                min_raw: f64::MIN,
                max_raw: 9000.0,
            }
        );
    }

    #[test]
    fn test_parse_lanes() {
        let Cmd::Sequence(s) = parse(&[
            "sequence",
            "--run-name",
            "run1",
            "--experiment",
            "exp",
            "--sequencer",
            "seq1",
            "--instrument",
            "NextSeq",
            "--assay",
            "metagenomics",
            "--fwd-cycles",
            "151",
            "--rev-cycles",
            "151",
            "--pi",
            "Dr. Knight",
            "--lane",
            "1=pool_a",
            "--lane",
            "2=pool_b",
        ]) else {
            panic!("not a sequence command");
        };
        assert_eq!(s.instrument, InstrumentModel::NextSeq);
        assert_eq!(s.assay, Assay::Metagenomics);
        assert_eq!(
            s.lanes,
            vec![(1, "pool_a".to_string()), (2, "pool_b".to_string())]
        );
        assert!(parse_lane("one=pool").is_err());
    }
}
