//! Shared data model for the SLAM core.
//!
//! Every type here is plain data: `Clone + Debug`, and `Serialize`/
//! `Deserialize` on anything that crosses a config or `doCommand` boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 2D pose in the SLAM world frame (meters, radians).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// X position in meters.
    pub x: f64,
    /// Y position in meters.
    pub y: f64,
    /// Heading in radians (positive = counter-clockwise from X axis).
    pub theta: f64,
}

/// Planar position of a movement-sensor odometer reading.
///
/// Sensor-local meters, not WGS84 — this core's notion of "geo" is the flat
/// SLAM coordinate frame, not GPS (see the Open Questions in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
}

/// Unit quaternion orientation, named the way the façade's `position()`
/// response names its fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub real: f64,
    pub imag: f64,
    pub jmag: f64,
    pub kmag: f64,
}

impl Orientation {
    /// Identity orientation (no rotation).
    pub const IDENTITY: Orientation = Orientation {
        real: 1.0,
        imag: 0.0,
        jmag: 0.0,
        kmag: 0.0,
    };

    /// Build a quaternion representing a pure yaw rotation about +Z.
    pub fn from_yaw(theta: f64) -> Self {
        let half = theta * 0.5;
        Orientation {
            real: half.cos(),
            imag: 0.0,
            jmag: 0.0,
            kmag: half.sin(),
        }
    }

    /// Project onto a 2D heading, assuming a pure yaw rotation.
    pub fn yaw(&self) -> f64 {
        2.0 * self.kmag.atan2(self.real)
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Full position response: world-frame translation plus orientation.
///
/// `orientation` is `None` when the native engine omits the quaternion
/// from its response entirely (as opposed to returning a malformed one) —
/// the two are distinct failure modes at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub orientation: Option<Orientation>,
}

/// Angular velocity, always radians/s at the façade boundary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AngularVelocity {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Linear acceleration, meters/s^2.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LinearAcceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Which channels a movement sensor exposes, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Properties {
    pub imu_supported: bool,
    pub odometer_supported: bool,
}

/// Lidar configuration variant. Only `TwoD` is implemented; the type exists
/// so `CartoConfig` has somewhere to name the (excluded) 3D case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LidarConfig {
    #[default]
    TwoD,
}

/// Immutable construction-time configuration for the façade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartoConfig {
    pub camera_name: String,
    pub movement_sensor_name: String,
    pub component_reference: String,
    #[serde(default)]
    pub lidar_config: LidarConfig,
    pub enable_mapping: bool,
    pub existing_map: String,
    /// Pass-through disable flag for cloud-hosted SLAM (non-goal: the core
    /// never talks to a cloud SLAM backend itself, it only refuses
    /// operations with `UseCloudSlamEnabled` when this is set).
    #[serde(default)]
    pub use_cloud_slam: bool,
}

/// Optional initial pose parsed from the `initial_starting_pose` option.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialPose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// Numeric tunables forwarded verbatim to the native engine.
///
/// Defaults mirror the table in spec §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartoAlgoConfig {
    pub optimize_on_start: bool,
    pub optimize_every_n_nodes: u32,
    pub num_range_data: u32,
    pub missing_data_ray_length_meters: f64,
    pub max_range_meters: f64,
    pub min_range_meters: f64,
    pub max_submaps_to_keep: u32,
    pub fresh_submaps_count: u32,
    pub min_covered_area_meters_squared: f64,
    pub min_added_submaps_count: u32,
    pub occupied_space_weight: f64,
    pub translation_weight: f64,
    pub rotation_weight: f64,
    pub initial_starting_pose: Option<InitialPose>,
    /// Whether the engine should fuse IMU angular velocity into its motion
    /// model. Forwarded verbatim from the `use_imu_data` option (spec §3).
    pub use_imu_data: bool,
}

impl Default for CartoAlgoConfig {
    fn default() -> Self {
        Self {
            optimize_on_start: false,
            optimize_every_n_nodes: 3,
            num_range_data: 30,
            missing_data_ray_length_meters: 25.0,
            max_range_meters: 25.0,
            min_range_meters: 0.2,
            max_submaps_to_keep: 3,
            fresh_submaps_count: 3,
            min_covered_area_meters_squared: 1.0,
            min_added_submaps_count: 1,
            occupied_space_weight: 20.0,
            translation_weight: 10.0,
            rotation_weight: 1.0,
            initial_starting_pose: None,
            use_imu_data: false,
        }
    }
}

/// The three modes the engine may resolve to from `(enable_mapping,
/// existing_map)`; a fourth, invalid combination is a construction error
/// rather than a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlamMode {
    Mapping,
    Localizing,
    Updating,
}

impl SlamMode {
    /// Resolve the mode from construction flags, per the table in spec §3.
    pub fn resolve(enable_mapping: bool, existing_map: &str) -> Option<SlamMode> {
        match (enable_mapping, existing_map.is_empty()) {
            (true, true) => Some(SlamMode::Mapping),
            (false, false) => Some(SlamMode::Localizing),
            (true, false) => Some(SlamMode::Updating),
            (false, true) => None,
        }
    }

    pub fn mapping_mode(&self) -> MappingMode {
        match self {
            SlamMode::Mapping => MappingMode::NewMap,
            SlamMode::Updating => MappingMode::UpdateExisting,
            SlamMode::Localizing => MappingMode::LocalizationOnly,
        }
    }
}

/// The mapping-mode value published in `properties()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingMode {
    NewMap,
    UpdateExisting,
    LocalizationOnly,
}

/// The service's `properties()` report (spec §4.D / §6). Named distinctly
/// from the sensor-capability [`Properties`] struct above, which the spec
/// also calls "Properties" but in the narrower `{imuSupported,
/// odometerSupported}` sense.
///
/// `map_timestamp` is fixed at construction time in LOCALIZING mode and
/// otherwise advances on every successful `pointCloudMap` call (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlamProperties {
    pub cloud_slam: bool,
    pub mapping_mode: MappingMode,
    pub map_timestamp: chrono::DateTime<chrono::Utc>,
}

/// An RGBA color tagging a post-processed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const RED: Rgba = Rgba { r: 255, g: 0, b: 0, a: 255 };
}

/// A single point in a post-processing task, XYZ plus optional color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColoredPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub rgba: Option<Rgba>,
}

/// One entry of the ordered post-processing edit list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PostProcessTask {
    Add(Vec<ColoredPoint>),
    Remove(Vec<ColoredPoint>),
}

/// Errors shared across crate boundaries when parsing the `doCommand`
/// options map into typed configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
