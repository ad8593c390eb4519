//! Processes: recorded lab steps and their persisted parameter blobs.
//!
//! The parameters of every process kind are a typed struct. They are stored
//! as JSON on the process row and validated once, when the process is
//! created, against the kind it is being recorded as.

use chrono::{DateTime, Utc};
use lab_calc::concentration::CurveParameters;
use lab_calc::normalization::NormalizationParameters;
use lab_calc::pooling::PoolingStrategy;
use lims_types::{
    CompositionId, InstrumentModel, LimsResult, ProcessId, ReagentKind, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessKind {
    ReagentCreation,
    PrimerWorkingPlate,
    SamplePlating,
    GdnaExtraction,
    Compression,
    Normalization,
    #[serde(rename = "library_prep_16s")]
    #[strum(to_string = "library_prep_16s")]
    LibraryPrep16S,
    LibraryPrepShotgun,
    Quantification,
    Pooling,
    Sequencing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReagentCreationParameters {
    pub external_lot_id: String,
    pub reagent_type: ReagentKind,
}

/// Registration of a plate of index or barcode primers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimerPlateParameters {
    pub primer_set: String,
    pub plate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionParameters {
    /// Liquid handler that set up the extraction plate.
    pub robot: String,
    /// Magnetic bead robot that ran the extraction.
    pub extraction_robot: String,
    pub kit_lot: String,
    /// Elution volume per well.
    pub volume_nl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionParameters {
    pub robot: String,
}

/// A normalization run, replayable from this record alone together with the
/// concentrations it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationRecord {
    pub parameters: NormalizationParameters,
    /// Quantification each input's concentration was taken from.
    pub quantifications: BTreeMap<CompositionId, ProcessId>,
    pub water_lot: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmpliconLibraryParameters {
    pub robot: String,
    pub master_mix_lot: String,
    pub water_lot: String,
    /// External id of the barcoded primer plate.
    pub primer_plate: String,
    pub volume_nl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotgunLibraryParameters {
    pub kapa_lot: String,
    pub stub_lot: String,
    pub primer_set: String,
    pub volume_nl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuantificationMethod {
    PicoGreen,
    Qpcr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantificationParameters {
    pub method: QuantificationMethod,
    pub curve: CurveParameters,
    /// Average library fragment size; when set, molar concentrations are
    /// recorded as well.
    #[serde(default)]
    pub fragment_size_bp: Option<f64>,
}

/// One input of a pooling run with the concentration it was pooled at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PooledInput {
    pub composition: CompositionId,
    pub concentration: f64,
}

/// A pooling run: the algorithm tag, its flat parameter set and the inputs
/// in pooling order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingRecord {
    pub pool_name: String,
    pub algorithm: String,
    pub parameters: BTreeMap<String, f64>,
    pub inputs: Vec<PooledInput>,
}

impl PoolingRecord {
    pub fn new(pool_name: &str, strategy: &PoolingStrategy, inputs: Vec<PooledInput>) -> Self {
        let (algorithm, parameters) = strategy.to_flat();
        PoolingRecord {
            pool_name: pool_name.to_string(),
            algorithm,
            parameters,
            inputs,
        }
    }

    /// Rebuild the typed strategy from the stored blob.
    pub fn strategy(&self) -> LimsResult<PoolingStrategy> {
        PoolingStrategy::from_flat(&self.algorithm, &self.parameters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Assay {
    Amplicon,
    Metagenomics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LaneAssignment {
    pub lane: u8,
    pub pool: CompositionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingParameters {
    pub run_name: String,
    pub experiment: String,
    pub sequencer: String,
    pub instrument: InstrumentModel,
    pub assay: Assay,
    pub fwd_cycles: u32,
    pub rev_cycles: u32,
    pub principal_investigator: String,
    #[serde(default)]
    pub contacts: Vec<String>,
    pub lanes: Vec<LaneAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "process_type", rename_all = "snake_case")]
pub enum ProcessParameters {
    ReagentCreation(ReagentCreationParameters),
    PrimerWorkingPlate(PrimerPlateParameters),
    SamplePlating,
    GdnaExtraction(ExtractionParameters),
    Compression(CompressionParameters),
    Normalization(NormalizationRecord),
    #[serde(rename = "library_prep_16s")]
    LibraryPrep16S(AmpliconLibraryParameters),
    LibraryPrepShotgun(ShotgunLibraryParameters),
    Quantification(QuantificationParameters),
    Pooling(PoolingRecord),
    Sequencing(SequencingParameters),
}

fn text(kind: ProcessKind, parameter: &'static str, value: &str) -> LimsResult<()> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingParameter {
            kind: kind.to_string(),
            parameter,
        }
        .into())
    } else {
        Ok(())
    }
}

fn volume(what: &'static str, value: f64) -> LimsResult<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::InvalidParameter {
            what,
            requirement: "greater than 0",
            value,
        }
        .into())
    }
}

impl ProcessParameters {
    pub fn kind(&self) -> ProcessKind {
        match self {
            ProcessParameters::ReagentCreation(_) => ProcessKind::ReagentCreation,
            ProcessParameters::PrimerWorkingPlate(_) => ProcessKind::PrimerWorkingPlate,
            ProcessParameters::SamplePlating => ProcessKind::SamplePlating,
            ProcessParameters::GdnaExtraction(_) => ProcessKind::GdnaExtraction,
            ProcessParameters::Compression(_) => ProcessKind::Compression,
            ProcessParameters::Normalization(_) => ProcessKind::Normalization,
            ProcessParameters::LibraryPrep16S(_) => ProcessKind::LibraryPrep16S,
            ProcessParameters::LibraryPrepShotgun(_) => ProcessKind::LibraryPrepShotgun,
            ProcessParameters::Quantification(_) => ProcessKind::Quantification,
            ProcessParameters::Pooling(_) => ProcessKind::Pooling,
            ProcessParameters::Sequencing(_) => ProcessKind::Sequencing,
        }
    }

    /// Check that these parameters belong to a `kind` process and that every
    /// required parameter is present and sane.
    pub fn validate(&self, kind: ProcessKind) -> LimsResult<()> {
        if self.kind() != kind {
            return Err(ValidationError::MismatchedParameters {
                kind: kind.to_string(),
                given: self.kind().to_string(),
            }
            .into());
        }
        match self {
            ProcessParameters::ReagentCreation(p) => text(kind, "external_lot_id", &p.external_lot_id),
            ProcessParameters::PrimerWorkingPlate(p) => {
                text(kind, "primer_set", &p.primer_set)?;
                text(kind, "plate", &p.plate)
            }
            ProcessParameters::SamplePlating => Ok(()),
            ProcessParameters::GdnaExtraction(p) => {
                text(kind, "robot", &p.robot)?;
                text(kind, "extraction_robot", &p.extraction_robot)?;
                text(kind, "kit_lot", &p.kit_lot)?;
                volume("elution volume", p.volume_nl)
            }
            ProcessParameters::Compression(p) => text(kind, "robot", &p.robot),
            ProcessParameters::Normalization(p) => {
                text(kind, "water_lot", &p.water_lot)?;
                p.parameters.validate()
            }
            ProcessParameters::LibraryPrep16S(p) => {
                text(kind, "robot", &p.robot)?;
                text(kind, "master_mix_lot", &p.master_mix_lot)?;
                text(kind, "water_lot", &p.water_lot)?;
                text(kind, "primer_plate", &p.primer_plate)?;
                volume("library volume", p.volume_nl)
            }
            ProcessParameters::LibraryPrepShotgun(p) => {
                text(kind, "kapa_lot", &p.kapa_lot)?;
                text(kind, "stub_lot", &p.stub_lot)?;
                text(kind, "primer_set", &p.primer_set)?;
                volume("library volume", p.volume_nl)
            }
            ProcessParameters::Quantification(p) => {
                if let CurveParameters::StandardCurve { standards } = &p.curve {
                    lab_calc::concentration::fit_standard_curve(standards)?;
                }
                if let Some(size) = p.fragment_size_bp {
                    volume("fragment size", size)?;
                }
                Ok(())
            }
            ProcessParameters::Pooling(p) => {
                text(kind, "pool_name", &p.pool_name)?;
                p.strategy().map(|_| ())
            }
            ProcessParameters::Sequencing(p) => {
                text(kind, "run_name", &p.run_name)?;
                text(kind, "experiment", &p.experiment)?;
                text(kind, "sequencer", &p.sequencer)?;
                text(kind, "principal_investigator", &p.principal_investigator)?;
                if p.lanes.is_empty() {
                    return Err(ValidationError::MissingParameter {
                        kind: kind.to_string(),
                        parameter: "lanes",
                    }
                    .into());
                }
                if p.fwd_cycles == 0 {
                    return Err(ValidationError::InvalidParameter {
                        what: "forward cycles",
                        requirement: "greater than 0",
                        value: 0.0,
                    }
                    .into());
                }
                Ok(())
            }
        }
    }

    pub fn as_normalization(&self) -> Option<&NormalizationRecord> {
        match self {
            ProcessParameters::Normalization(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pooling(&self) -> Option<&PoolingRecord> {
        match self {
            ProcessParameters::Pooling(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_sequencing(&self) -> Option<&SequencingParameters> {
        match self {
            ProcessParameters::Sequencing(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_quantification(&self) -> Option<&QuantificationParameters> {
        match self {
            ProcessParameters::Quantification(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub kind: ProcessKind,
    pub run_date: DateTime<Utc>,
    pub operator: String,
    pub parameters: ProcessParameters,
}

/// A raw reading of one composition and the concentration derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationCalculation {
    pub composition: CompositionId,
    pub quantification: ProcessId,
    pub raw: f64,
    /// ng/µL
    pub concentration: Option<f64>,
    /// nM, recorded when the library fragment size is known.
    pub molar_concentration: Option<f64>,
}

/// How much of one input went into an output pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolComponentRecord {
    pub output: CompositionId,
    pub input: CompositionId,
    pub volume_nl: f64,
    pub percentage: f64,
}
