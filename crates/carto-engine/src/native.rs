//! [`carto_facade::NativeEngine`] implementation wrapping [`SlamProcessor`].
//!
//! This is the reference/test engine SPEC_FULL.md's ambient-stack section
//! G calls for: one concrete, swappable implementation exercising the
//! façade contract end to end. Production deployments swap in a real
//! Cartographer binding behind the same trait.

use carto_facade::{CartoError, NativeEngine};
use chrono::{DateTime, Utc};
use sensors::{TimedIMUReading, TimedLidarReading, TimedOdometerReading};
use tracing::debug;
use types::{CartoAlgoConfig, CartoConfig, Orientation, Position, SlamMode};

use crate::scan::{points_to_scan, scan_to_points};
use crate::{SlamConfig, SlamProcessor};

#[derive(serde::Serialize, serde::Deserialize)]
struct StateSnapshot {
    pose: types::Pose,
    keyframe_count: usize,
    loop_closure_count: usize,
}

/// Reference SLAM engine: correlative scan matching + pose-graph
/// optimization, fed lidar scans decoded from PCD and, optionally, fused
/// IMU/odometer motion estimates.
pub struct CartoEngine {
    processor: SlamProcessor,
    algo_cfg: CartoAlgoConfig,
    keyframes_since_optimize: u32,
    last_pose: types::Pose,
    imu_heading: f64,
    last_imu_time: Option<DateTime<Utc>>,
}

impl CartoEngine {
    pub fn new() -> Self {
        Self {
            processor: SlamProcessor::new(SlamConfig::default()),
            algo_cfg: CartoAlgoConfig::default(),
            keyframes_since_optimize: 0,
            last_pose: types::Pose::default(),
            imu_heading: 0.0,
            last_imu_time: None,
        }
    }
}

impl Default for CartoEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn to_native_error(e: crate::SlamError) -> CartoError {
    CartoError::NativeError { code: 1, message: e.to_string() }
}

impl NativeEngine for CartoEngine {
    fn initialize(&mut self, cfg: &CartoConfig, algo_cfg: &CartoAlgoConfig) -> Result<SlamMode, CartoError> {
        let mode = SlamMode::resolve(cfg.enable_mapping, &cfg.existing_map)
            .ok_or_else(|| CartoError::InvalidConfig(format!(
                "enable_mapping={} existing_map={:?} resolves to no valid mode",
                cfg.enable_mapping, cfg.existing_map
            )))?;

        self.algo_cfg = algo_cfg.clone();
        if let Some(initial) = algo_cfg.initial_starting_pose {
            let pose = types::Pose { x: initial.x, y: initial.y, theta: initial.theta };
            self.processor.set_initial_pose(pose);
            self.last_pose = pose;
            self.imu_heading = pose.theta;
        }
        if algo_cfg.optimize_on_start {
            self.processor.optimize().map_err(to_native_error)?;
        }
        Ok(mode)
    }

    fn start(&mut self) -> Result<(), CartoError> {
        Ok(())
    }

    fn add_lidar_reading(&mut self, name: &str, reading: &TimedLidarReading) -> Result<(), CartoError> {
        debug!(sensor = name, bytes = reading.reading.len(), "engine: lidar reading");
        let points = sensors::pcd::decode(&reading.reading)
            .map_err(|e| CartoError::NativeError { code: 2, message: e.to_string() })?;
        let scan = points_to_scan(
            &points,
            self.algo_cfg.min_range_meters as f32,
            self.algo_cfg.max_range_meters as f32,
        );
        if let Some(update) = self.processor.process_scan(&scan) {
            if update.keyframe_added {
                self.keyframes_since_optimize += 1;
                let cadence = self.algo_cfg.optimize_every_n_nodes.max(1);
                if self.keyframes_since_optimize >= cadence {
                    self.processor.optimize().map_err(to_native_error)?;
                    self.keyframes_since_optimize = 0;
                }
            }
        }
        Ok(())
    }

    fn add_imu_reading(&mut self, name: &str, reading: &TimedIMUReading) -> Result<(), CartoError> {
        debug!(sensor = name, "engine: imu reading");
        if !self.algo_cfg.use_imu_data {
            return Ok(());
        }
        let dt = self
            .last_imu_time
            .map(|prev| (reading.reading_time - prev).num_nanoseconds().unwrap_or(0) as f64 / 1e9)
            .unwrap_or(0.0)
            .max(0.0);
        self.last_imu_time = Some(reading.reading_time);
        self.imu_heading += reading.ang_vel.z * dt;
        self.last_pose.theta = transforms::normalize_angle(self.imu_heading);
        self.processor.update_odometry(&self.last_pose);
        Ok(())
    }

    fn add_odometer_reading(&mut self, name: &str, reading: &TimedOdometerReading) -> Result<(), CartoError> {
        debug!(sensor = name, "engine: odometer reading");
        self.last_pose = types::Pose {
            x: reading.position.x,
            y: reading.position.y,
            theta: reading.orientation.yaw(),
        };
        self.imu_heading = self.last_pose.theta;
        self.processor.update_odometry(&self.last_pose);
        Ok(())
    }

    fn position(&mut self) -> Result<Position, CartoError> {
        let pose = self.processor.pose();
        Ok(Position {
            x: pose.x,
            y: pose.y,
            z: 0.0,
            orientation: Some(Orientation::from_yaw(pose.theta)),
        })
    }

    fn point_cloud_map(&mut self) -> Result<Vec<u8>, CartoError> {
        let mut points = Vec::new();
        for kf in self.processor.keyframes() {
            for p in scan_to_points(&kf.scan) {
                let world = kf.pose.transform_point(nalgebra::Vector2::new(p.x as f64, p.y as f64));
                points.push(types::ColoredPoint {
                    x: world.x as f32,
                    y: world.y as f32,
                    z: 0.0,
                    rgba: None,
                });
            }
        }
        Ok(sensors::pcd::encode(&points))
    }

    fn internal_state(&mut self) -> Result<Vec<u8>, CartoError> {
        let snapshot = StateSnapshot {
            pose: self.processor.pose(),
            keyframe_count: self.processor.keyframe_count(),
            loop_closure_count: self.processor.loop_closure_count(),
        };
        serde_json::to_vec(&snapshot).map_err(|e| CartoError::NativeError { code: 3, message: e.to_string() })
    }

    fn run_final_optimization(&mut self) -> Result<(), CartoError> {
        self.processor.optimize().map_err(to_native_error)
    }

    fn stop(&mut self) -> Result<(), CartoError> {
        Ok(())
    }

    fn terminate(&mut self) -> Result<(), CartoError> {
        Ok(())
    }
}
