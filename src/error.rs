//! Error types shared across the crate.

use std::io;

use thiserror::Error;

/// Result alias used throughout `crf-core`.
pub type Result<T> = std::result::Result<T, CrfError>;

/// Everything that can go wrong building, training, or applying a model.
///
/// Variant names mirror the `CRFERR_*` kinds of the C library this crate's
/// design is grounded on, so that callers porting code from that world find
/// a familiar shape.
#[derive(Debug, Error)]
pub enum CrfError {
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("incompatible data: {0}")]
    Incompatible(String),

    #[error("numeric overflow: {0}")]
    Overflow(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("internal logic error: {0}")]
    InternalLogic(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CrfError {
    pub fn unknown_param(name: &str) -> Self {
        CrfError::NotSupported(format!("unknown parameter {name:?}"))
    }

    pub fn bad_param_value(name: &str, value: &str) -> Self {
        CrfError::Incompatible(format!("invalid value {value:?} for parameter {name:?}"))
    }
}
