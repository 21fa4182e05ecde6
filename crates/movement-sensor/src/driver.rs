//! Serial protocol for the onboard IMU + wheel odometer board.
//!
//! A small binary framing, parsed the way `gps`'s NMEA reader parses
//! sentences off a serial line, except each frame is fixed-length binary
//! rather than comma-delimited ASCII:
//!
//! ```text
//! [0xA1][ax f32][ay f32][az f32][gx f32][gy f32][gz f32]   (IMU, deg/s gyro)
//! [0xA2][x f64][y f64][qw f32][qx f32][qy f32][qz f32]     (odometer)
//! ```

use crate::{Config, MovementSensorError};
use chrono::{DateTime, Utc};
use std::io::Read;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use types::{AngularVelocity, GeoPoint, LinearAcceleration, Orientation};

const FRAME_IMU: u8 = 0xA1;
const FRAME_ODOM: u8 = 0xA2;
const IMU_BODY_LEN: usize = 24;
const ODOM_BODY_LEN: usize = 32;

/// A raw IMU sub-read: acceleration and angular velocity arrive in the
/// same frame here, but the façade contract still wants each channel
/// timestamped independently, so both carry their own receipt time.
#[derive(Debug, Clone, Copy)]
pub struct RawImuFrame {
    pub lin_acc: LinearAcceleration,
    /// Degrees/s, as the device reports it; converted to rad/s at the
    /// `movement-sensor` / `sensors::pairing` boundary.
    pub ang_vel_deg: AngularVelocity,
    pub received_at: DateTime<Utc>,
}

/// A raw odometer sub-read.
#[derive(Debug, Clone, Copy)]
pub struct RawOdomFrame {
    pub position: GeoPoint,
    pub orientation: Orientation,
    pub received_at: DateTime<Utc>,
}

pub(crate) fn run_reader(
    config: Config,
    imu_tx: watch::Sender<Option<RawImuFrame>>,
    odom_tx: watch::Sender<Option<RawOdomFrame>>,
) -> Result<(), MovementSensorError> {
    info!(port = %config.port, baud = config.baud_rate, "Opening movement sensor serial port");

    let mut port = tokio_serial::new(&config.port, config.baud_rate)
        .timeout(Duration::from_secs(2))
        .open_native()
        .map_err(|e| MovementSensorError::Serial(e.to_string()))?;

    info!("Movement sensor reader started");

    let mut type_byte = [0u8; 1];
    let mut body = [0u8; ODOM_BODY_LEN];

    loop {
        match port.read_exact(&mut type_byte) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                error!(?e, "movement sensor read error");
                break;
            }
        }

        let received_at = Utc::now();
        match type_byte[0] {
            FRAME_IMU => {
                if port.read_exact(&mut body[..IMU_BODY_LEN]).is_err() {
                    warn!("short IMU frame, dropping");
                    continue;
                }
                let frame = RawImuFrame {
                    lin_acc: LinearAcceleration {
                        x: read_f32(&body, 0) as f64,
                        y: read_f32(&body, 4) as f64,
                        z: read_f32(&body, 8) as f64,
                    },
                    ang_vel_deg: AngularVelocity {
                        x: read_f32(&body, 12) as f64,
                        y: read_f32(&body, 16) as f64,
                        z: read_f32(&body, 20) as f64,
                    },
                    received_at,
                };
                trace!(?frame, "IMU frame");
                if imu_tx.send(Some(frame)).is_err() {
                    debug!("IMU receiver dropped, stopping");
                    break;
                }
            }
            FRAME_ODOM => {
                if port.read_exact(&mut body[..ODOM_BODY_LEN]).is_err() {
                    warn!("short odometer frame, dropping");
                    continue;
                }
                let frame = RawOdomFrame {
                    position: GeoPoint {
                        x: read_f64(&body, 0),
                        y: read_f64(&body, 8),
                    },
                    orientation: Orientation {
                        real: read_f32(&body, 16) as f64,
                        imag: read_f32(&body, 20) as f64,
                        jmag: read_f32(&body, 24) as f64,
                        kmag: read_f32(&body, 28) as f64,
                    },
                    received_at,
                };
                trace!(?frame, "odometer frame");
                if odom_tx.send(Some(frame)).is_err() {
                    debug!("odometer receiver dropped, stopping");
                    break;
                }
            }
            other => {
                trace!(byte = other, "unknown frame type, resyncing");
            }
        }
    }

    info!("Movement sensor reader stopped");
    Ok(())
}

fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn read_f64(buf: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}
