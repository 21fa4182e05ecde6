use thiserror::Error;

use crate::state::CartoState;

/// Façade-plane errors (spec §7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CartoError {
    #[error("carto call timed out")]
    Timeout,
    #[error("invalid state transition: {op} while in {state:?}")]
    BadState { state: CartoState, op: &'static str },
    #[error("native engine error {code}: {message}")]
    NativeError { code: i32, message: String },
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("the façade worker has already shut down")]
    WorkerGone,
}
