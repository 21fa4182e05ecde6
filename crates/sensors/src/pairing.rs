//! Tolerance pairing for multi-channel movement sensor reads (spec §4.A).
//!
//! Each channel (e.g. linear acceleration + angular velocity) is read as two
//! independent sub-reads. They're accepted as one paired reading only if
//! their timestamps fall within 50ms of each other; otherwise the older
//! sub-read is re-acquired, bounded by a 5s outer timeout.

use crate::error::SensorError;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use types::{AngularVelocity, LinearAcceleration};

/// The tolerance window for accepting two sub-reads as one paired reading.
pub const PAIR_TOLERANCE_MS: i64 = 50;
/// The outer bound on how long pairing may keep retrying.
pub const PAIR_OUTER_TIMEOUT: Duration = Duration::from_secs(5);

/// One half of a paired reading: a value plus the timestamp it was taken
/// (or, in replay, the timestamp recovered from sensor metadata).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubReading<T> {
    pub value: T,
    pub timestamp: DateTime<Utc>,
}

/// Repeatedly read both channels until their timestamps are within
/// [`PAIR_TOLERANCE_MS`], re-acquiring whichever sub-read is older. Fails
/// with [`SensorError::NoValidReadingObtained`] once [`PAIR_OUTER_TIMEOUT`]
/// elapses without a valid pair.
pub fn pair_channels<A, B, FA, FB>(
    mut read_a: FA,
    mut read_b: FB,
) -> Result<(SubReading<A>, SubReading<B>), SensorError>
where
    FA: FnMut() -> Result<SubReading<A>, SensorError>,
    FB: FnMut() -> Result<SubReading<B>, SensorError>,
{
    let start = Instant::now();
    let mut a = read_a()?;
    let mut b = read_b()?;

    loop {
        let diff_ms = (a.timestamp - b.timestamp).num_milliseconds().abs();
        if diff_ms < PAIR_TOLERANCE_MS {
            return Ok((a, b));
        }
        if start.elapsed() >= PAIR_OUTER_TIMEOUT {
            return Err(SensorError::NoValidReadingObtained);
        }
        if a.timestamp < b.timestamp {
            a = read_a()?;
        } else {
            b = read_b()?;
        }
    }
}

/// Convert a driver-reported angular velocity from degrees/s to radians/s,
/// the unit the façade boundary requires (spec §3, property 4).
pub fn degrees_to_radians(deg: AngularVelocity) -> AngularVelocity {
    AngularVelocity {
        x: deg.x.to_radians(),
        y: deg.y.to_radians(),
        z: deg.z.to_radians(),
    }
}

/// Pair a linear-acceleration sub-read with an angular-velocity sub-read
/// (reported in degrees/s) into a radians/s [`crate::TimedIMUReading`].
pub fn pair_imu<FAcc, FGyro>(
    read_acc: FAcc,
    read_gyro_deg: FGyro,
) -> Result<crate::TimedIMUReading, SensorError>
where
    FAcc: FnMut() -> Result<SubReading<LinearAcceleration>, SensorError>,
    FGyro: FnMut() -> Result<SubReading<AngularVelocity>, SensorError>,
{
    let (acc, gyro_deg) = pair_channels(read_acc, read_gyro_deg)?;
    let midpoint = acc.timestamp + (gyro_deg.timestamp - acc.timestamp) / 2;
    Ok(crate::TimedIMUReading {
        ang_vel: degrees_to_radians(gyro_deg.value),
        lin_acc: acc.value,
        reading_time: midpoint,
    })
}

/// Pair a position sub-read with an orientation sub-read into a
/// [`crate::TimedOdometerReading`].
pub fn pair_odometer<FPos, FOri>(
    read_pos: FPos,
    read_ori: FOri,
) -> Result<crate::TimedOdometerReading, SensorError>
where
    FPos: FnMut() -> Result<SubReading<types::GeoPoint>, SensorError>,
    FOri: FnMut() -> Result<SubReading<types::Orientation>, SensorError>,
{
    let (pos, ori) = pair_channels(read_pos, read_ori)?;
    let midpoint = pos.timestamp + (ori.timestamp - pos.timestamp) / 2;
    Ok(crate::TimedOdometerReading {
        position: pos.value,
        orientation: ori.value,
        reading_time: midpoint,
    })
}
