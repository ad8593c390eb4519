use lims_types::{
    CapacityError, ConfigurationError, LimsError, MissingDataError, ValidationError,
};
use std::fmt::Display;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Lims(#[from] LimsError),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error("Unable to encode or decode a stored record")]
    Json(#[from] serde_json::Error),

    #[error("Unknown {entity} '{id}'")]
    UnknownId { entity: &'static str, id: String },
}

impl StoreError {
    pub fn unknown(entity: &'static str, id: impl Display) -> Self {
        StoreError::UnknownId {
            entity,
            id: id.to_string(),
        }
    }

    /// The domain error, if this is one.
    pub fn lims(&self) -> Option<&LimsError> {
        match self {
            StoreError::Lims(e) => Some(e),
            _ => None,
        }
    }
}

macro_rules! from_lims_class {
    ($($t:ty),*) => {
        $(
            impl From<$t> for StoreError {
                fn from(e: $t) -> Self {
                    StoreError::Lims(e.into())
                }
            }
        )*
    };
}

from_lims_class!(ValidationError, CapacityError, MissingDataError, ConfigurationError);
