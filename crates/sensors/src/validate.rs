//! Retry-until-ready validation (spec §4.A).
//!
//! Used at service construction to confirm a sensor is actually producing
//! readings before wiring it into a sensor-process loop, without caring
//! what the reading looks like — callers discard the value and only
//! care whether `read()` eventually succeeds.

use crate::error::SensorError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Repeatedly invoke `read` until it succeeds, the governing `cancel`
/// token fires, or `max_timeout` elapses.
///
/// [`SensorError::EndOfDataset`] is treated as a clean success: an empty
/// offline dataset is a valid (if uninteresting) session, not a failure
/// to validate against.
pub fn validate(
    mut read: impl FnMut() -> Result<(), SensorError>,
    max_timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), SensorError> {
    let start = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(SensorError::Cancelled);
        }
        match read() {
            Ok(()) => return Ok(()),
            Err(SensorError::EndOfDataset) => return Ok(()),
            Err(_) => {
                let elapsed = start.elapsed();
                if elapsed >= max_timeout {
                    return Err(SensorError::ValidationTimeout);
                }
                let remaining = max_timeout - elapsed;
                std::thread::sleep(interval.min(remaining));
            }
        }
    }
}
