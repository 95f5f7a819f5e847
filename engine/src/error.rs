//! Engine-wide error kinds.
//!
//! Control-path functions return `Result<T, EngineError>`, while the data
//! path never does: a `netfb_rx` failure counts the error and frees the
//! packet instead of unwinding.

use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no FB by that name or idp")]
    NotFound,
    #[error("name already in use")]
    InUse,
    #[error("refcount too high to remove")]
    Busy,
    #[error("allocation failure")]
    NoMem,
    #[error("malformed message or out-of-range argument")]
    Invalid,
    #[error("caller lacks control privilege")]
    Denied,
    #[error("packet dropped on the data path")]
    Dropped,
    #[error("data-path error")]
    Error,
}

pub type EngineResult<T> = Result<T, EngineError>;
