use thiserror::Error;

/// Sensor-plane errors (spec §7).
///
/// `EndOfDataset` is the replay sentinel: drivers signal it instead of a
/// transport error when an offline dataset is exhausted, so callers can
/// branch on it without string matching (spec §9 "Replay sentinel").
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("failed to acquire reading: {0}")]
    Acquire(String),
    #[error("failed to encode reading: {0}")]
    Encode(String),
    #[error("failed to parse replay timestamp: {0}")]
    ReplayTimestampParse(String),
    #[error("timed out getting IMU/odometer data")]
    NoValidReadingObtained,
    #[error("validation timed out")]
    ValidationTimeout,
    #[error("end of dataset")]
    EndOfDataset,
    #[error("cancelled")]
    Cancelled,
}
