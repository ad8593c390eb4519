//! Shared vocabulary of the lab tracker: database ids, physical labware
//! (plates, wells, tubes, containers), reagent/equipment references and the
//! error taxonomy used by every other crate.

// Warning groups
#![deny(future_incompatible, nonstandard_style, rust_2018_idioms)]

pub mod errors;
mod ids;
pub mod labware;
pub mod reference;

pub use errors::{
    CapacityError, ConfigurationError, LimsError, LimsResult, MissingDataError, ValidationError,
};
pub use ids::{
    CompositionId, ContainerId, EquipmentId, PlateId, PrimerSetId, ProcessId, ReagentId, TubeId,
    WellId,
};
pub use labware::{Container, ContainerLocation, Plate, PlateConfiguration, Tube, Well, WellCoord, WellRef};
pub use reference::{Equipment, EquipmentKind, InstrumentModel, Reagent, ReagentKind};

/// Volumes are carried in nanoliters.
pub type Nanoliters = f64;

/// Mass concentrations are carried in ng/µL.
pub type NgPerUl = f64;
