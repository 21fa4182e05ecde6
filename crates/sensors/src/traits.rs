use crate::{SensorError, TimedLidarReading, TimedMovementSensorReading};
use types::Properties;

/// A 2D lidar capable of producing timed, PCD-encoded readings.
///
/// Object-safe so the rest of the core holds it as `Arc<dyn TimedLidar>`
/// (spec §9 "Per-sensor polymorphism": a small, totally enumerated
/// capability trait rather than a legacy pointer/interface pattern).
pub trait TimedLidar: Send + Sync {
    fn name(&self) -> &str;

    /// 0 means offline / read as fast as the producer yields.
    fn data_frequency_hz(&self) -> u32;

    /// Acquire, timestamp, and PCD-encode the next reading. Returns
    /// [`SensorError::EndOfDataset`] when an offline dataset is exhausted.
    fn read(&self) -> Result<TimedLidarReading, SensorError>;
}

/// A movement sensor exposing IMU and/or wheel odometer channels.
pub trait TimedMovementSensor: Send + Sync {
    fn name(&self) -> &str;

    fn data_frequency_hz(&self) -> u32;

    /// Fixed at construction: which channels this sensor actually produces.
    fn properties(&self) -> Properties;

    fn read(&self) -> Result<TimedMovementSensorReading, SensorError>;
}
