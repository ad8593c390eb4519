//! Error taxonomy shared by the numeric engines and the store.
//!
//! Every error here is raised before anything is written, so an operation
//! that fails leaves no trace in the provenance graph. Numeric edge cases
//! such as zero concentrations or clamped volumes are not errors; they are
//! reported as flags on the computed results.

use crate::ids::{CompositionId, ContainerId, ProcessId};
use crate::labware::PlateConfiguration;

/// Result type used by the numeric engines.
pub type LimsResult<T> = std::result::Result<T, LimsError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LimsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    MissingData(#[from] MissingDataError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Malformed or missing input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{what} must be {requirement}, got {value}")]
    InvalidParameter {
        what: &'static str,
        requirement: &'static str,
        value: f64,
    },

    #[error("Unable to parse well coordinate '{0}'. Expected a row letter followed by a column number, e.g. 'A1'")]
    InvalidWell(String),

    #[error("Well {well} lies outside a {config} plate")]
    WellOutOfRange {
        well: String,
        config: PlateConfiguration,
    },

    #[error("Unable to parse plate configuration '{0}'. Expected '96', '384' or '<rows>x<columns>'")]
    InvalidPlateConfiguration(String),

    #[error("Composition {0} is discarded and cannot be used as a process input")]
    DiscardedInput(CompositionId),

    #[error("Composition {0} was given more than once as a process input")]
    DuplicateInput(CompositionId),

    #[error("A {kind} process requires the '{parameter}' parameter")]
    MissingParameter {
        kind: String,
        parameter: &'static str,
    },

    #[error("A {kind} process cannot be recorded with {given} parameters")]
    MismatchedParameters { kind: String, given: String },

    #[error("Container {0} already holds a live composition")]
    ContainerOccupied(ContainerId),

    #[error("Composition {composition} is not an input of process {process}")]
    SourceNotInput {
        composition: CompositionId,
        process: ProcessId,
    },

    #[error("Expected a {expected} composition but composition {composition} is {actual}")]
    WrongCompositionKind {
        composition: CompositionId,
        expected: String,
        actual: String,
    },

    #[error("Raw value {raw} lies outside the calibration range [{min}, {max}]")]
    OutOfCalibrationRange { raw: f64, min: f64, max: f64 },

    #[error("At most {max} source plates can be compressed into one plate, got {given}")]
    TooManySourcePlates { given: usize, max: usize },

    #[error("No inputs were provided to {0}")]
    NoInputs(&'static str),

    #[error("Pool percentages must sum to 1, got {0}")]
    PercentagesDoNotSumToOne(f64),

    #[error("Percentage override for input {input} must lie in [0, 1], got {value}")]
    InvalidPercentageOverride { input: usize, value: f64 },

    #[error("Unknown pooling algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("Pooling algorithm '{algorithm}' requires the '{parameter}' parameter")]
    MissingAlgorithmParameter {
        algorithm: String,
        parameter: &'static str,
    },

    #[error("Pooling algorithm '{algorithm}' does not accept the '{parameter}' parameter")]
    UnexpectedAlgorithmParameter { algorithm: String, parameter: String },

    #[error("Pooling algorithm '{algorithm}' cannot pool {inputs}")]
    WrongPoolingInputs {
        algorithm: String,
        inputs: &'static str,
    },

    #[error("'{0}' is already in use as an external identifier")]
    DuplicateExternalId(String),

    #[error("Well {well} of plate '{plate}' is already plated")]
    WellAlreadyPlated { plate: String, well: String },

    #[error("{0}")]
    Other(String),
}

/// A physically impossible volume or concentration request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CapacityError {
    #[error(
        "The requested dilution volume of {total_volume} nL is too small for the \
         {dna_volume} nL of sample required"
    )]
    DilutionVolumeTooSmall { dna_volume: f64, total_volume: f64 },

    #[error("A transfer of {volume} nL exceeds the {max_volume} nL a destination well can hold")]
    TransferExceedsWell { volume: f64, max_volume: f64 },

    #[error("A {config} destination plate has no free well left for the remaining transfers")]
    DestinationPlateFull { config: PlateConfiguration },

    #[error(
        "Primer set '{primer_set}' has {remaining} unused index combinations, {requested} requested"
    )]
    PrimerSetExhausted {
        primer_set: String,
        remaining: usize,
        requested: usize,
    },

    #[error("{container} holds {remaining} nL, but {requested} nL were requested")]
    InsufficientVolume {
        container: String,
        remaining: f64,
        requested: f64,
    },
}

/// Required upstream concentration or calibration data is absent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MissingDataError {
    #[error("No concentration is available for {input}")]
    Concentration { input: String },

    #[error("Concentration {value} of {input} is not a usable measurement")]
    InvalidConcentration { input: String, value: f64 },

    #[error("A standard curve needs at least {required} distinct standards, got {given}")]
    InsufficientStandards { required: usize, given: usize },

    #[error("No primer combination is available for {0}")]
    PrimerCombination(String),
}

/// A mismatch between plate or equipment configurations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error(
        "Source plate {index} is a {actual} plate, but the first source plate is {expected}. \
         All plates compressed together must share one configuration"
    )]
    MismatchedSourcePlates {
        index: usize,
        expected: PlateConfiguration,
        actual: PlateConfiguration,
    },

    #[error(
        "Compressing {source_config} plates requires a {expected} destination plate, got {actual}"
    )]
    DestinationMismatch {
        source_config: PlateConfiguration,
        expected: PlateConfiguration,
        actual: PlateConfiguration,
    },

    #[error("Equipment '{name}' is a {actual}, but this step requires a {expected}")]
    WrongEquipment {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Plate '{plate}' is a {actual} plate, but this step requires a {expected} plate")]
    WrongPlateConfiguration {
        plate: String,
        expected: PlateConfiguration,
        actual: PlateConfiguration,
    },
}

impl From<String> for ValidationError {
    fn from(msg: String) -> Self {
        ValidationError::Other(msg)
    }
}

impl LimsError {
    /// Short class name used when reporting the error category.
    pub fn class(&self) -> &'static str {
        match self {
            LimsError::Validation(_) => "ValidationError",
            LimsError::Capacity(_) => "CapacityError",
            LimsError::MissingData(_) => "MissingDataError",
            LimsError::Configuration(_) => "ConfigurationError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transparent_messages() {
        let err: LimsError = CapacityError::DilutionVolumeTooSmall {
            dna_volume: 3500.0,
            total_volume: 3000.0,
        }
        .into();
        assert_eq!(err.class(), "CapacityError");
        assert_eq!(
            err.to_string(),
            "The requested dilution volume of 3000 nL is too small for the 3500 nL of sample required"
        );
    }

    #[test]
    fn test_configuration_message() {
        let err = ConfigurationError::DestinationMismatch {
            source_config: PlateConfiguration::PLATE_96,
            expected: PlateConfiguration::PLATE_384,
            actual: PlateConfiguration::PLATE_96,
        };
        assert_eq!(
            err.to_string(),
            "Compressing 96-well plates requires a 384-well destination plate, got 96-well"
        );
    }

    #[test]
    fn test_overdraw_message() {
        let err: LimsError = CapacityError::InsufficientVolume {
            container: "gdna:A1".to_string(),
            remaining: 1000.0,
            requested: 3500.0,
        }
        .into();
        assert_eq!(err.class(), "CapacityError");
        assert_eq!(
            err.to_string(),
            "gdna:A1 holds 1000 nL, but 3500 nL were requested"
        );
    }
}
