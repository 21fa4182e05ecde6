use chrono::{DateTime, Utc};
use types::{AngularVelocity, GeoPoint, LinearAcceleration, Orientation};

/// A timed, PCD-encoded lidar reading (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct TimedLidarReading {
    /// Binary PCD point cloud.
    pub reading: Vec<u8>,
    pub reading_time: DateTime<Utc>,
    pub is_replay: bool,
}

/// A paired IMU reading: angular velocity is always radians/s by the time
/// it reaches this type, converted from the driver's degrees/s at the
/// pairing boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedIMUReading {
    pub ang_vel: AngularVelocity,
    pub lin_acc: LinearAcceleration,
    pub reading_time: DateTime<Utc>,
}

/// A paired odometer reading: planar position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedOdometerReading {
    pub position: GeoPoint,
    pub orientation: Orientation,
    pub reading_time: DateTime<Utc>,
}

/// A movement sensor reading. At least one inner reading is present,
/// determined by the sensor's fixed [`types::Properties`].
#[derive(Debug, Clone, PartialEq)]
pub struct TimedMovementSensorReading {
    pub imu: Option<TimedIMUReading>,
    pub odometer: Option<TimedOdometerReading>,
    pub is_replay: bool,
}
