//! [`sensors::TimedMovementSensor`] implementations: a live serial sensor
//! with tolerance-paired sub-reads (spec §4.A), and a dataset replay
//! sensor for offline sessions.

use crate::driver::{self, RawImuFrame, RawOdomFrame};
use crate::{Config, MovementSensorError};
use chrono::{DateTime, Utc};
use sensors::pairing::{pair_imu, pair_odometer, SubReading};
use sensors::{SensorError, TimedIMUReading, TimedMovementSensor, TimedMovementSensorReading, TimedOdometerReading};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use types::{AngularVelocity, GeoPoint, LinearAcceleration, Orientation, Properties};

/// Live movement sensor over a serial connection. Which channels `read()`
/// populates is fixed at construction via `properties`.
pub struct LiveMovementSensor {
    name: String,
    data_frequency_hz: u32,
    properties: Properties,
    imu_rx: Mutex<watch::Receiver<Option<RawImuFrame>>>,
    odom_rx: Mutex<watch::Receiver<Option<RawOdomFrame>>>,
    _reader_handle: std::thread::JoinHandle<()>,
}

impl LiveMovementSensor {
    pub fn open(
        name: impl Into<String>,
        config: Config,
        data_frequency_hz: u32,
        properties: Properties,
    ) -> Result<Self, MovementSensorError> {
        let (imu_tx, imu_rx) = watch::channel(None);
        let (odom_tx, odom_rx) = watch::channel(None);
        let handle = {
            let config = config.clone();
            std::thread::spawn(move || {
                if let Err(e) = driver::run_reader(config, imu_tx, odom_tx) {
                    tracing::error!(?e, "movement sensor reader error");
                }
            })
        };
        Ok(Self {
            name: name.into(),
            data_frequency_hz,
            properties,
            imu_rx: Mutex::new(imu_rx),
            odom_rx: Mutex::new(odom_rx),
            _reader_handle: handle,
        })
    }

    fn next_imu_frame(&self) -> Result<RawImuFrame, SensorError> {
        let mut rx = self.imu_rx.lock().expect("imu watch lock poisoned");
        loop {
            if let Some(frame) = *rx.borrow_and_update() {
                return Ok(frame);
            }
            if rx.has_changed().is_err() {
                return Err(SensorError::Acquire("movement sensor reader exited".into()));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn next_odom_frame(&self) -> Result<RawOdomFrame, SensorError> {
        let mut rx = self.odom_rx.lock().expect("odom watch lock poisoned");
        loop {
            if let Some(frame) = *rx.borrow_and_update() {
                return Ok(frame);
            }
            if rx.has_changed().is_err() {
                return Err(SensorError::Acquire("movement sensor reader exited".into()));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn read_imu(&self) -> Result<TimedIMUReading, SensorError> {
        pair_imu(
            || {
                let f = self.next_imu_frame()?;
                Ok(SubReading { value: f.lin_acc, timestamp: f.received_at })
            },
            || {
                let f = self.next_imu_frame()?;
                Ok(SubReading { value: f.ang_vel_deg, timestamp: f.received_at })
            },
        )
    }

    fn read_odometer(&self) -> Result<TimedOdometerReading, SensorError> {
        pair_odometer(
            || {
                let f = self.next_odom_frame()?;
                Ok(SubReading { value: f.position, timestamp: f.received_at })
            },
            || {
                let f = self.next_odom_frame()?;
                Ok(SubReading { value: f.orientation, timestamp: f.received_at })
            },
        )
    }
}

impl TimedMovementSensor for LiveMovementSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_frequency_hz(&self) -> u32 {
        self.data_frequency_hz
    }

    fn properties(&self) -> Properties {
        self.properties
    }

    fn read(&self) -> Result<TimedMovementSensorReading, SensorError> {
        let imu = if self.properties.imu_supported {
            Some(self.read_imu()?)
        } else {
            None
        };
        let odometer = if self.properties.odometer_supported {
            Some(self.read_odometer()?)
        } else {
            None
        };
        Ok(TimedMovementSensorReading { imu, odometer, is_replay: false })
    }
}

/// One recorded movement-sensor line: `<rfc3339>,IMU,ax,ay,az,gx,gy,gz` or
/// `<rfc3339>,ODOM,x,y,qw,qx,qy,qz` (degrees/s for the IMU gyro field,
/// matching the live wire format so replay and live share conversion code).
fn parse_line(line: &str) -> Result<TimedMovementSensorReading, SensorError> {
    let fields: Vec<&str> = line.trim().split(',').collect();
    if fields.len() < 2 {
        return Err(SensorError::ReplayTimestampParse(format!("malformed line: {line}")));
    }
    let reading_time: DateTime<Utc> = DateTime::parse_from_rfc3339(fields[0])
        .map_err(|e| SensorError::ReplayTimestampParse(e.to_string()))?
        .with_timezone(&Utc);

    let parse_f64 = |s: &str| -> Result<f64, SensorError> {
        s.parse().map_err(|_| SensorError::ReplayTimestampParse(format!("bad numeric field: {s}")))
    };

    match fields[1] {
        "IMU" if fields.len() == 8 => {
            let ang_vel_deg = AngularVelocity {
                x: parse_f64(fields[5])?,
                y: parse_f64(fields[6])?,
                z: parse_f64(fields[7])?,
            };
            let imu = TimedIMUReading {
                lin_acc: LinearAcceleration {
                    x: parse_f64(fields[2])?,
                    y: parse_f64(fields[3])?,
                    z: parse_f64(fields[4])?,
                },
                ang_vel: sensors::pairing::degrees_to_radians(ang_vel_deg),
                reading_time,
            };
            Ok(TimedMovementSensorReading { imu: Some(imu), odometer: None, is_replay: true })
        }
        "ODOM" if fields.len() == 8 => {
            let odometer = TimedOdometerReading {
                position: GeoPoint { x: parse_f64(fields[2])?, y: parse_f64(fields[3])? },
                orientation: Orientation {
                    real: parse_f64(fields[4])?,
                    imag: parse_f64(fields[5])?,
                    jmag: parse_f64(fields[6])?,
                    kmag: parse_f64(fields[7])?,
                },
                reading_time,
            };
            Ok(TimedMovementSensorReading { imu: None, odometer: Some(odometer), is_replay: true })
        }
        other => Err(SensorError::ReplayTimestampParse(format!("unknown record kind: {other}"))),
    }
}

/// Offline replay of a recorded movement-sensor log. `data_frequency_hz()`
/// is always 0; exhausting the log yields [`SensorError::EndOfDataset`].
pub struct ReplayMovementSensor {
    name: String,
    properties: Properties,
    lines: Mutex<std::vec::IntoIter<String>>,
}

impl ReplayMovementSensor {
    pub fn open(
        name: impl Into<String>,
        log_path: impl AsRef<Path>,
        properties: Properties,
    ) -> Result<Self, MovementSensorError> {
        let file = std::fs::File::open(log_path.as_ref())
            .map_err(|e| MovementSensorError::Serial(e.to_string()))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .filter_map(|l| l.ok())
            .filter(|l| !l.trim().is_empty())
            .collect();
        Ok(Self { name: name.into(), properties, lines: Mutex::new(lines.into_iter()) })
    }
}

impl TimedMovementSensor for ReplayMovementSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_frequency_hz(&self) -> u32 {
        0
    }

    fn properties(&self) -> Properties {
        self.properties
    }

    fn read(&self) -> Result<TimedMovementSensorReading, SensorError> {
        let mut lines = self.lines.lock().expect("replay movement sensor lock poisoned");
        let line = lines.next().ok_or(SensorError::EndOfDataset)?;
        parse_line(&line)
    }
}
