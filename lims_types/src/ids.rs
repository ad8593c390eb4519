use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                $name(id)
            }
        }
    };
}

row_id!(
    /// Row id of a plate.
    PlateId
);
row_id!(
    /// Row id of a well.
    WellId
);
row_id!(
    /// Row id of a tube.
    TubeId
);
row_id!(
    /// Row id of a physical container (the vessel behind a well or a tube).
    ContainerId
);
row_id!(
    /// Row id of a composition.
    CompositionId
);
row_id!(
    /// Row id of a process.
    ProcessId
);
row_id!(EquipmentId);
row_id!(ReagentId);
row_id!(PrimerSetId);
