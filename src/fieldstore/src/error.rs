use thiserror::Error;

/// The closed error taxonomy for every fallible operation in this crate.
///
/// `try*` variants never construct one of these for their advertised failure
/// modes; they report failure through `Option`/`bool` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldStoreError {
    #[error("container is disposed")]
    ObjectDisposed,

    #[error("cannot convert {from} to {to} without explicit=true")]
    InvalidCast { from: String, to: String },

    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("argument error: {0}")]
    ArgumentError(String),

    #[error("unknown field {0:?}")]
    KeyNotFound(String),

    #[error("path not found: {0:?}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, FieldStoreError>;
