//! Timed sensor abstractions: the "reading + timestamp + replay flag"
//! contract shared by lidar and movement sensor drivers (spec §4.A).
//!
//! This crate is pure logic: PCD encode/decode, channel pairing with
//! tolerance, and the retry-until-ready validation loop. It has no
//! opinion about where readings come from — `lidar` and `movement-sensor`
//! implement [`TimedLidar`] / [`TimedMovementSensor`] against real or
//! replayed drivers.

pub mod error;
pub mod pairing;
pub mod pcd;
pub mod readings;
pub mod traits;
pub mod validate;

pub use error::SensorError;
pub use readings::{
    TimedIMUReading, TimedLidarReading, TimedMovementSensorReading, TimedOdometerReading,
};
pub use traits::{TimedLidar, TimedMovementSensor};
pub use validate::validate;
