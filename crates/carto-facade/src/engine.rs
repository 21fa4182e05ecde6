use sensors::{TimedIMUReading, TimedLidarReading, TimedOdometerReading};
use types::{CartoAlgoConfig, CartoConfig, Position, SlamMode};

use crate::error::CartoError;

/// The contract the façade depends on (spec §4.B, Design Notes §9: "opaque
/// handle plus C-ABI entry points"). A concrete engine owns whatever
/// resources the real Cartographer optimizer needs; the façade only ever
/// calls through this trait, one call at a time, from its worker thread.
///
/// Implementations are not required to be `Sync` — the façade's single-
/// writer worker is the only caller, so `&mut self` is sufficient and
/// avoids forcing interior mutability on implementors.
pub trait NativeEngine: Send {
    /// Construct the engine's internal session and resolve the mode from
    /// `(enable_mapping, existing_map)` (spec §3's mode table).
    fn initialize(
        &mut self,
        cfg: &CartoConfig,
        algo_cfg: &CartoAlgoConfig,
    ) -> Result<SlamMode, CartoError>;

    /// Transition into `RUNNING`.
    fn start(&mut self) -> Result<(), CartoError>;

    fn add_lidar_reading(&mut self, name: &str, reading: &TimedLidarReading) -> Result<(), CartoError>;

    /// `reading.ang_vel` is already radians/s by the time it reaches the
    /// engine (spec §3: converted at the façade boundary).
    fn add_imu_reading(&mut self, name: &str, reading: &TimedIMUReading) -> Result<(), CartoError>;

    fn add_odometer_reading(&mut self, name: &str, reading: &TimedOdometerReading) -> Result<(), CartoError>;

    /// Latest estimated pose.
    fn position(&mut self) -> Result<Position, CartoError>;

    /// Binary PCD snapshot of the current occupancy map.
    fn point_cloud_map(&mut self) -> Result<Vec<u8>, CartoError>;

    /// Opaque blob sufficient to reload the SLAM session.
    fn internal_state(&mut self) -> Result<Vec<u8>, CartoError>;

    /// Force finalization of pending submaps before a clean stop.
    fn run_final_optimization(&mut self) -> Result<(), CartoError>;

    fn stop(&mut self) -> Result<(), CartoError>;

    fn terminate(&mut self) -> Result<(), CartoError>;
}
