//! Crate-wide error type for `va-core`.

use thiserror::Error;

/// Errors raised by core data-model operations and adapter ports.
///
/// Per spec, the real-time engine components (VAD, audio processor, router)
/// never raise outward — this type exists for the adapter ports (§6), which
/// are allowed to fail, and for construction-time validation of the data
/// model (e.g. an out-of-range duration).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("adapter call failed: {0}")]
    AdapterFailed(String),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
