//! Shared fixtures for the end-to-end SLAM core scenarios (spec.md §8).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sensors::{SensorError, TimedLidar, TimedLidarReading};
use types::{CartoAlgoConfig, CartoConfig, LidarConfig};

/// A fresh, empty directory under the OS temp dir, unique per call.
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("slam-core-it-{prefix}-{}-{n}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write a recorded lidar scan file named by its RFC 3339 timestamp, the
/// naming convention `lidar::ReplayLidar` walks (spec §4.A replay rule).
pub fn write_replay_scan(dir: &Path, rfc3339: &str, points: &[types::ColoredPoint]) {
    let bytes = sensors::pcd::encode(points);
    std::fs::write(dir.join(format!("{rfc3339}.pcd")), bytes).unwrap();
}

/// A construction-time config with mapping enabled and no existing map
/// (resolves to `SlamMode::Mapping`), the starting point every scenario
/// below tweaks.
pub fn mapping_cfg() -> CartoConfig {
    CartoConfig {
        camera_name: "lidar0".into(),
        movement_sensor_name: String::new(),
        component_reference: "lidar0".into(),
        lidar_config: LidarConfig::TwoD,
        enable_mapping: true,
        existing_map: String::new(),
        use_cloud_slam: false,
    }
}

pub fn default_algo_cfg() -> CartoAlgoConfig {
    CartoAlgoConfig::default()
}

/// An online lidar that always succeeds with an empty point cloud, for
/// scenarios driving the ticker-based loop (spec §4.C online lidar loop)
/// without real hardware. Never signals end-of-dataset.
pub struct AlwaysReadyLidar {
    hz: u32,
    pub reads: Arc<AtomicUsize>,
}

impl AlwaysReadyLidar {
    pub fn new(hz: u32) -> Self {
        Self { hz, reads: Arc::new(AtomicUsize::new(0)) }
    }
}

impl TimedLidar for AlwaysReadyLidar {
    fn name(&self) -> &str {
        "bench-lidar"
    }

    fn data_frequency_hz(&self) -> u32 {
        self.hz
    }

    fn read(&self) -> Result<TimedLidarReading, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(TimedLidarReading {
            reading: sensors::pcd::encode(&[]),
            reading_time: chrono::Utc::now(),
            is_replay: false,
        })
    }
}
