use thiserror::Error;

use carto_facade::CartoError;
use postprocess::PostprocessError;
use sensors::SensorError;

/// Service-plane errors (spec §7). Component errors crossing into the
/// service wrap via `#[from]`, the way `RecordingError` wraps `rerun`/
/// `io`/`json` errors in the teacher's `recording` crate.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("slam service is closed")]
    Closed,

    #[error("cloud SLAM is enabled; this operation requires the local core")]
    UseCloudSlamEnabled,

    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("position response is missing its quaternion")]
    QuaternionMissing,

    #[error("position response carries a malformed quaternion: {0}")]
    QuaternionMalformed(String),

    #[error("unimplemented command: {0}")]
    Unimplemented(String),

    #[error(transparent)]
    Carto(#[from] CartoError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Postprocess(#[from] PostprocessError),
}
