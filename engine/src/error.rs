//! Error types for the Trellis engine.

use crate::{ModelName, UniqueId};
use thiserror::Error;

/// All possible errors from the Trellis engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("{model} '{uid}' not found")]
    NotFound { model: ModelName, uid: UniqueId },

    #[error("{model} '{uid}' already exists")]
    AlreadyExists { model: ModelName, uid: UniqueId },

    // Backing-store rejections, attached to a single record
    #[error("validation failed for {model} '{uid}': {reason}")]
    Validation {
        model: ModelName,
        uid: UniqueId,
        reason: String,
    },

    #[error("delete refused for {model} '{uid}': {reason}")]
    ReferentialDelete {
        model: ModelName,
        uid: UniqueId,
        reason: String,
    },

    // Malformed snapshot or diff; aborts the run
    #[error("structural failure: {0}")]
    Structural(String),
}

impl Error {
    /// Whether this error invalidates the rest of a sync run.
    ///
    /// Non-fatal errors are recorded against the record that caused them and
    /// the run continues; structural errors abort.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Structural(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
