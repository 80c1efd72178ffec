//! Unified error handling for the paceboard engine.
//!
//! The routing/contract layer sitting above this crate maps every error to a
//! status plus message body, so each variant carries the taxonomy the boundary
//! needs: who failed (credentials vs. rights), what was missing, and what was
//! malformed. Store failures with a recognized status are translated into the
//! matching typed error; anything else propagates untranslated.

use crate::store::StoreError;
use thiserror::Error;

/// Top-level error type returned by all node operations.
#[derive(Error, Debug)]
pub enum PaceboardError {
    /// Missing or invalid credential for the acting user.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The acting user lacks rights on the target record.
    #[error("forbidden: {0}")]
    Authorization(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input, rejected before reaching the core.
    #[error("validation error: {0}")]
    Validation(String),

    /// Infrastructural store failure; not translated, propagates as-is.
    #[error("store error: {0}")]
    Store(StoreError),
}

/// Result type for all node operations.
pub type PaceboardResult<T> = Result<T, PaceboardError>;

impl PaceboardError {
    /// Status code the routing layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            PaceboardError::Authentication(_) => 401,
            PaceboardError::Authorization(_) => 403,
            PaceboardError::NotFound(_) => 404,
            PaceboardError::Validation(_) => 400,
            PaceboardError::Store(_) => 500,
        }
    }
}

impl From<StoreError> for PaceboardError {
    fn from(error: StoreError) -> Self {
        match error {
            // The one store status the boundary recognizes; everything else is
            // infrastructural and stays a store error.
            StoreError::Missing { collection, id } => {
                PaceboardError::NotFound(format!("{}/{}", collection, id))
            }
            other => PaceboardError::Store(other),
        }
    }
}
