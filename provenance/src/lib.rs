//! provenance
//!
//! The provenance model: typed compositions (what a container holds),
//! typed processes (the lab steps that produce them) with their persisted
//! parameter blobs, and traversal of the lineage graph they form.

// Warning groups
#![deny(future_incompatible, nonstandard_style, rust_2018_idioms)]

pub mod composition;
pub mod lineage;
pub mod process;

pub use composition::{
    Composition, CompositionDetail, CompositionKind, PrimerDetail, PrimerRead, SampleDetail,
    SampleKind,
};
pub use lineage::{LineageGraph, LineageNode};
pub use process::{
    AmpliconLibraryParameters, Assay, CompressionParameters, ConcentrationCalculation,
    ExtractionParameters, LaneAssignment, NormalizationRecord, PoolComponentRecord, PooledInput,
    PoolingRecord, PrimerPlateParameters, Process, ProcessKind, ProcessParameters,
    QuantificationMethod, QuantificationParameters, ReagentCreationParameters,
    SequencingParameters, ShotgunLibraryParameters,
};
