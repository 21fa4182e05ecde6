//! Serial IMU + wheel odometer driver for the SLAM core's movement sensor
//! capability, grounded on the `gps` crate's serial-reader shape.

mod driver;
mod timed;

pub use driver::{RawImuFrame, RawOdomFrame};
pub use timed::{LiveMovementSensor, ReplayMovementSensor};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MovementSensorError {
    #[error("Serial port error: {0}")]
    Serial(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Movement sensor serial configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB1".into(),
            baud_rate: 115200,
        }
    }
}
