//! [`sensors::TimedLidar`] implementations for the RPLidar A1 driver.
//!
//! Two variants: [`LiveLidar`] wraps [`LidarReader`] over a live serial
//! port (spec §4.A live read algorithm); [`ReplayLidar`] walks a directory
//! of previously recorded scans for offline sessions (spec §4.C offline
//! loop). Both encode through [`sensors::pcd::encode`] so the façade
//! always receives the same binary PCD wire form.

use crate::{Config, LaserScan, LidarError, LidarReader};
use chrono::{DateTime, Utc};
use sensors::{SensorError, TimedLidar, TimedLidarReading};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use types::ColoredPoint;

/// Convert a polar [`LaserScan`] into XYZ points for PCD encoding.
/// Invalid (zero-range) measurements are dropped.
fn scan_to_points(scan: &LaserScan) -> Vec<ColoredPoint> {
    scan.ranges
        .iter()
        .enumerate()
        .filter(|(_, &r)| r > scan.range_min && r < scan.range_max)
        .map(|(i, &range)| {
            let angle = i as f32 * scan.angle_increment;
            ColoredPoint {
                x: range * angle.cos(),
                y: range * angle.sin(),
                z: 0.0,
                rgba: None,
            }
        })
        .collect()
}

/// A live RPLidar A1, polled through a `watch` channel fed by a
/// background serial-reader thread.
pub struct LiveLidar {
    name: String,
    data_frequency_hz: u32,
    rx: Mutex<watch::Receiver<Option<LaserScan>>>,
    _reader_handle: std::thread::JoinHandle<()>,
}

impl LiveLidar {
    /// Open the serial port and spawn the reader thread.
    pub fn open(name: impl Into<String>, config: Config, data_frequency_hz: u32) -> Result<Self, LidarError> {
        let (tx, rx) = watch::channel(None);
        let handle = LidarReader::new(config).spawn(tx)?;
        Ok(Self {
            name: name.into(),
            data_frequency_hz,
            rx: Mutex::new(rx),
            _reader_handle: handle,
        })
    }
}

impl TimedLidar for LiveLidar {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_frequency_hz(&self) -> u32 {
        self.data_frequency_hz
    }

    fn read(&self) -> Result<TimedLidarReading, SensorError> {
        let mut rx = self.rx.lock().expect("lidar watch lock poisoned");
        // Block for the next fresh scan, then record wall clock on arrival
        // (spec §4.A steps 1-2: acquire, then timestamp). The reader thread
        // is synchronous, so we park rather than pull in an async executor.
        loop {
            if rx.borrow().is_some() {
                break;
            }
            if rx.has_changed().is_err() {
                return Err(SensorError::Acquire("lidar reader thread exited".into()));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let scan = rx
            .borrow_and_update()
            .clone()
            .ok_or_else(|| SensorError::Acquire("no scan available yet".into()))?;
        let reading_time = Utc::now();
        let points = scan_to_points(&scan);
        let reading = sensors::pcd::encode(&points);
        Ok(TimedLidarReading {
            reading,
            reading_time,
            is_replay: false,
        })
    }
}

/// One recorded scan on disk: `<RFC3339-nanos>.pcd`, binary PCD content.
fn parse_replay_filename(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    DateTime::parse_from_rfc3339(stem).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Offline replay of a directory of recorded PCD scans, sorted by the
/// RFC 3339 nanosecond timestamp embedded in each filename.
///
/// `data_frequency_hz()` is always 0 (spec §4.C: offline datasets drive
/// a tight loop, not a ticker). Exhausting the directory yields
/// [`SensorError::EndOfDataset`] on every subsequent call.
pub struct ReplayLidar {
    name: String,
    files: Mutex<std::vec::IntoIter<PathBuf>>,
}

impl ReplayLidar {
    pub fn open(name: impl Into<String>, dataset_dir: impl AsRef<Path>) -> Result<Self, LidarError> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dataset_dir.as_ref())
            .map_err(|e| LidarError::Serial(e.to_string()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "pcd"))
            .collect();
        entries.sort_by_key(|p| parse_replay_filename(p));
        Ok(Self {
            name: name.into(),
            files: Mutex::new(entries.into_iter()),
        })
    }
}

impl TimedLidar for ReplayLidar {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_frequency_hz(&self) -> u32 {
        0
    }

    fn read(&self) -> Result<TimedLidarReading, SensorError> {
        let mut files = self.files.lock().expect("replay lidar lock poisoned");
        let path = files.next().ok_or(SensorError::EndOfDataset)?;
        let reading_time = parse_replay_filename(&path).ok_or_else(|| {
            SensorError::ReplayTimestampParse(format!("bad replay filename: {}", path.display()))
        })?;
        let reading = std::fs::read(&path)
            .map_err(|e| SensorError::Acquire(format!("reading {}: {e}", path.display())))?;
        Ok(TimedLidarReading {
            reading,
            reading_time,
            is_replay: true,
        })
    }
}
