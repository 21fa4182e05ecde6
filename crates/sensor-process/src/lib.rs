//! Sensor ingestion pipelines: online ticker-driven loops and the offline
//! tight loop that drives replay datasets to completion (spec §4.C).
//!
//! Each loop runs as its own `tokio::task`, tracked in a [`tokio::task::JoinSet`]
//! and stopped via a shared [`tokio_util::sync::CancellationToken`] — the same
//! two-level cancellation shape the service uses for the façade worker, except
//! here shutdown actually awaits completion rather than firing and forgetting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use carto_facade::CartoFacade;
use sensors::{SensorError, TimedMovementSensorReading, TimedLidar, TimedMovementSensor};

/// Façade timeout used for ingestion calls: longer than the per-query
/// timeout since a dropped lidar/IMU submission is far cheaper to retry
/// on the next tick than a stalled query is to a caller (spec §4.C: "the
/// façade's internal (longer) timeout").
pub const INGESTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Handles for every sensor-process worker the service launched, plus the
/// `job_done` flag an offline lidar loop sets on end-of-dataset.
pub struct SensorProcess {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
    job_done: Arc<AtomicBool>,
}

impl SensorProcess {
    /// Launch the online loops: a lidar ticker always, and a movement
    /// sensor ticker iff `movement` is `Some` (spec §4.C: "exists iff the
    /// corresponding capability flag is set").
    pub fn spawn_online(
        lidar: Arc<dyn TimedLidar>,
        movement: Option<Arc<dyn TimedMovementSensor>>,
        facade: Arc<CartoFacade>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        tasks.spawn(online_lidar_loop(lidar, facade.clone(), cancel.clone()));
        if let Some(movement) = movement {
            tasks.spawn(online_movement_loop(movement, facade, cancel.clone()));
        }

        Self { cancel, tasks, job_done: Arc::new(AtomicBool::new(false)) }
    }

    /// Launch the offline tight loop: lidar drives it, movement sensor
    /// readings (if any) are interleaved on demand (spec §4.C).
    pub fn spawn_offline(
        lidar: Arc<dyn TimedLidar>,
        movement: Option<Arc<dyn TimedMovementSensor>>,
        facade: Arc<CartoFacade>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let job_done = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        tasks.spawn(offline_loop(lidar, movement, facade, cancel.clone(), job_done.clone()));

        Self { cancel, tasks, job_done }
    }

    /// Set once the offline loop observes end-of-dataset and has invoked
    /// `runFinalOptimization`. Read by the service's `doCommand({job_done})`.
    pub fn job_done(&self) -> bool {
        self.job_done.load(Ordering::SeqCst)
    }

    /// Cancel every loop and join its task. Idempotent: cancelling an
    /// already-cancelled token is a no-op.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(?e, "sensor-process task panicked");
            }
        }
        info!("sensor-process workers joined");
    }
}

async fn online_lidar_loop(lidar: Arc<dyn TimedLidar>, facade: Arc<CartoFacade>, cancel: CancellationToken) {
    let hz = lidar.data_frequency_hz().max(1);
    let period = Duration::from_millis(1000 / hz as u64);
    let mut ticker = tokio::time::interval(period);
    info!(sensor = lidar.name(), hz, "online lidar loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let lidar = lidar.clone();
                let reading = match tokio::task::spawn_blocking(move || lidar.read()).await {
                    Ok(Ok(reading)) => reading,
                    Ok(Err(e)) => {
                        warn!(error = %e, "lidar read failed, dropping tick");
                        continue;
                    }
                    Err(e) => {
                        warn!(?e, "lidar read task panicked, dropping tick");
                        continue;
                    }
                };
                debug!(time = %reading.reading_time, "lidar reading acquired");
                if let Err(e) = facade.add_lidar_reading("lidar", reading, INGESTION_TIMEOUT).await {
                    warn!(error = %e, "failed to submit lidar reading");
                }
            }
        }
    }
    info!("online lidar loop stopped");
}

async fn online_movement_loop(
    movement: Arc<dyn TimedMovementSensor>,
    facade: Arc<CartoFacade>,
    cancel: CancellationToken,
) {
    let hz = movement.data_frequency_hz().max(1);
    let period = Duration::from_millis(1000 / hz as u64);
    let mut ticker = tokio::time::interval(period);
    info!(sensor = movement.name(), hz, "online movement sensor loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let movement = movement.clone();
                let reading = match tokio::task::spawn_blocking(move || movement.read()).await {
                    Ok(Ok(reading)) => reading,
                    Ok(Err(e)) => {
                        warn!(error = %e, "movement sensor read failed, dropping tick");
                        continue;
                    }
                    Err(e) => {
                        warn!(?e, "movement sensor read task panicked, dropping tick");
                        continue;
                    }
                };
                submit_movement_reading(&facade, reading).await;
            }
        }
    }
    info!("online movement sensor loop stopped");
}

async fn offline_loop(
    lidar: Arc<dyn TimedLidar>,
    movement: Option<Arc<dyn TimedMovementSensor>>,
    facade: Arc<CartoFacade>,
    cancel: CancellationToken,
    job_done: Arc<AtomicBool>,
) {
    info!(sensor = lidar.name(), "offline ingestion loop started");
    let mut t_prev = None;
    let mut pending_movement: Option<TimedMovementSensorReading> = None;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let lidar_for_read = lidar.clone();
        let lidar_result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::task::spawn_blocking(move || lidar_for_read.read()) => result,
        };

        let reading = match lidar_result {
            Ok(Ok(reading)) => reading,
            Ok(Err(SensorError::EndOfDataset)) => {
                info!("offline dataset exhausted, running final optimization");
                if let Err(e) = facade.run_final_optimization(INGESTION_TIMEOUT).await {
                    warn!(error = %e, "run_final_optimization failed");
                }
                job_done.store(true, Ordering::SeqCst);
                cancel.cancel();
                break;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "lidar read failed, skipping iteration");
                continue;
            }
            Err(e) => {
                warn!(?e, "lidar read task panicked, skipping iteration");
                continue;
            }
        };

        let t_l2 = reading.reading_time;

        if let (Some(movement), Some(t_l1)) = (&movement, t_prev) {
            replay_movement_between(movement, &facade, t_l1, t_l2, &mut pending_movement).await;
        }

        if let Err(e) = facade.add_lidar_reading("lidar", reading, INGESTION_TIMEOUT).await {
            warn!(error = %e, "failed to submit lidar reading");
        }
        t_prev = Some(t_l2);
    }

    info!("offline ingestion loop stopped");
}

/// Replay every movement sensor reading whose timestamp lies in
/// `[t_l1, t_l2)`, preserving the recorded cross-channel ordering (spec
/// §4.C interleaving rule). A reading that falls at or after `t_l2` is
/// buffered in `pending` for the next lidar interval rather than dropped.
async fn replay_movement_between(
    movement: &Arc<dyn TimedMovementSensor>,
    facade: &Arc<CartoFacade>,
    t_l1: chrono::DateTime<chrono::Utc>,
    t_l2: chrono::DateTime<chrono::Utc>,
    pending: &mut Option<TimedMovementSensorReading>,
) {
    loop {
        let reading = if let Some(reading) = pending.take() {
            reading
        } else {
            let movement = movement.clone();
            match tokio::task::spawn_blocking(move || movement.read()).await {
                Ok(Ok(reading)) => reading,
                Ok(Err(SensorError::EndOfDataset)) => return,
                Ok(Err(e)) => {
                    warn!(error = %e, "movement sensor read failed during interleave");
                    return;
                }
                Err(e) => {
                    warn!(?e, "movement sensor read task panicked during interleave");
                    return;
                }
            }
        };

        let t = reading_time(&reading);
        if t < t_l1 {
            // Stale relative to the previous lidar submission; drop and
            // keep draining toward t_l2.
            continue;
        }
        if t >= t_l2 {
            *pending = Some(reading);
            return;
        }

        submit_movement_reading(facade, reading).await;
    }
}

fn reading_time(reading: &TimedMovementSensorReading) -> chrono::DateTime<chrono::Utc> {
    reading
        .imu
        .as_ref()
        .map(|i| i.reading_time)
        .or_else(|| reading.odometer.as_ref().map(|o| o.reading_time))
        .expect("TimedMovementSensorReading must carry at least one inner reading")
}

async fn submit_movement_reading(facade: &Arc<CartoFacade>, reading: TimedMovementSensorReading) {
    if let Some(imu) = reading.imu {
        if let Err(e) = facade.add_imu_reading("movement-sensor", imu, INGESTION_TIMEOUT).await {
            warn!(error = %e, "failed to submit IMU reading");
        }
    }
    if let Some(odometer) = reading.odometer {
        if let Err(e) = facade.add_odometer_reading("movement-sensor", odometer, INGESTION_TIMEOUT).await {
            warn!(error = %e, "failed to submit odometer reading");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use carto_facade::{CartoState, NativeEngine};
    use chrono::Utc;
    use sensors::{TimedIMUReading, TimedLidarReading, TimedOdometerReading};
    use types::{
        AngularVelocity, CartoAlgoConfig, CartoConfig, GeoPoint, LidarConfig, LinearAcceleration,
        Orientation, Position, Properties, SlamMode,
    };

    struct RecordingEngine {
        lidar_calls: Arc<Mutex<Vec<()>>>,
        imu_calls: Arc<Mutex<Vec<f64>>>,
        final_optimizations: Arc<Mutex<usize>>,
    }

    impl NativeEngine for RecordingEngine {
        fn initialize(&mut self, _cfg: &CartoConfig, _algo: &CartoAlgoConfig) -> Result<SlamMode, carto_facade::CartoError> {
            Ok(SlamMode::Mapping)
        }
        fn start(&mut self) -> Result<(), carto_facade::CartoError> {
            Ok(())
        }
        fn add_lidar_reading(&mut self, _name: &str, _r: &TimedLidarReading) -> Result<(), carto_facade::CartoError> {
            self.lidar_calls.lock().unwrap().push(());
            Ok(())
        }
        fn add_imu_reading(&mut self, _name: &str, r: &TimedIMUReading) -> Result<(), carto_facade::CartoError> {
            self.imu_calls.lock().unwrap().push(r.ang_vel.z);
            Ok(())
        }
        fn add_odometer_reading(&mut self, _name: &str, _r: &TimedOdometerReading) -> Result<(), carto_facade::CartoError> {
            Ok(())
        }
        fn position(&mut self) -> Result<Position, carto_facade::CartoError> {
            Ok(Position::default())
        }
        fn point_cloud_map(&mut self) -> Result<Vec<u8>, carto_facade::CartoError> {
            Ok(vec![])
        }
        fn internal_state(&mut self) -> Result<Vec<u8>, carto_facade::CartoError> {
            Ok(vec![])
        }
        fn run_final_optimization(&mut self) -> Result<(), carto_facade::CartoError> {
            *self.final_optimizations.lock().unwrap() += 1;
            Ok(())
        }
        fn stop(&mut self) -> Result<(), carto_facade::CartoError> {
            Ok(())
        }
        fn terminate(&mut self) -> Result<(), carto_facade::CartoError> {
            Ok(())
        }
    }

    fn fake_cfg() -> CartoConfig {
        CartoConfig {
            camera_name: "cam".into(),
            movement_sensor_name: "ms".into(),
            component_reference: "cam".into(),
            lidar_config: LidarConfig::TwoD,
            enable_mapping: true,
            existing_map: String::new(),
            use_cloud_slam: false,
        }
    }

    async fn started_facade(
        lidar_calls: Arc<Mutex<Vec<()>>>,
        imu_calls: Arc<Mutex<Vec<f64>>>,
        final_optimizations: Arc<Mutex<usize>>,
    ) -> Arc<CartoFacade> {
        let engine = RecordingEngine { lidar_calls, imu_calls, final_optimizations };
        let facade = CartoFacade::new(Box::new(engine));
        facade
            .initialize(fake_cfg(), CartoAlgoConfig::default(), Duration::from_secs(1))
            .await
            .unwrap();
        facade.start(Duration::from_secs(1)).await.unwrap();
        facade
    }

    /// A replay-style lidar that yields `n` readings then `EndOfDataset`.
    struct ScriptedLidar {
        remaining: Mutex<usize>,
    }
    impl TimedLidar for ScriptedLidar {
        fn name(&self) -> &str {
            "scripted-lidar"
        }
        fn data_frequency_hz(&self) -> u32 {
            0
        }
        fn read(&self) -> Result<TimedLidarReading, SensorError> {
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining == 0 {
                return Err(SensorError::EndOfDataset);
            }
            *remaining -= 1;
            Ok(TimedLidarReading { reading: vec![], reading_time: Utc::now(), is_replay: true })
        }
    }

    #[tokio::test]
    async fn test_offline_loop_runs_final_optimization_once_and_sets_job_done() {
        let lidar_calls = Arc::new(Mutex::new(Vec::new()));
        let imu_calls = Arc::new(Mutex::new(Vec::new()));
        let final_optimizations = Arc::new(Mutex::new(0));
        let facade = started_facade(lidar_calls.clone(), imu_calls.clone(), final_optimizations.clone()).await;

        let lidar = Arc::new(ScriptedLidar { remaining: Mutex::new(5) });
        let process = SensorProcess::spawn_offline(lidar, None, facade.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !process.job_done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("offline loop did not finish in time");

        assert_eq!(lidar_calls.lock().unwrap().len(), 5);
        assert_eq!(*final_optimizations.lock().unwrap(), 1);
        process.shutdown().await;
        facade.join_worker().await;
    }

    /// A movement sensor that always reports a fixed reading time, used
    /// only to confirm the interleave path calls through to the façade
    /// without needing real clock interaction.
    struct FixedMovementSensor {
        ang_vel_deg_s: f64,
    }
    impl TimedMovementSensor for FixedMovementSensor {
        fn name(&self) -> &str {
            "fixed-movement"
        }
        fn data_frequency_hz(&self) -> u32 {
            0
        }
        fn properties(&self) -> Properties {
            Properties { imu_supported: true, odometer_supported: false }
        }
        fn read(&self) -> Result<TimedMovementSensorReading, SensorError> {
            Ok(TimedMovementSensorReading {
                imu: Some(TimedIMUReading {
                    ang_vel: AngularVelocity { x: 0.0, y: 0.0, z: self.ang_vel_deg_s.to_radians() },
                    lin_acc: LinearAcceleration { x: 0.0, y: 0.0, z: 0.0 },
                    reading_time: Utc::now(),
                }),
                odometer: None,
                is_replay: true,
            })
        }
    }

    #[tokio::test]
    async fn test_reading_time_prefers_imu_then_odometer() {
        let imu = TimedMovementSensorReading {
            imu: Some(TimedIMUReading {
                ang_vel: AngularVelocity { x: 0.0, y: 0.0, z: 0.0 },
                lin_acc: LinearAcceleration { x: 0.0, y: 0.0, z: 0.0 },
                reading_time: Utc::now(),
            }),
            odometer: None,
            is_replay: false,
        };
        let t = reading_time(&imu);

        let odom_time = Utc::now();
        let odom = TimedMovementSensorReading {
            imu: None,
            odometer: Some(TimedOdometerReading {
                position: GeoPoint { x: 0.0, y: 0.0 },
                orientation: Orientation::IDENTITY,
                reading_time: odom_time,
            }),
            is_replay: false,
        };
        assert_eq!(reading_time(&odom), odom_time);
        assert!(t <= Utc::now());
    }

    #[tokio::test]
    async fn test_online_movement_loop_forwards_converted_angular_velocity() {
        let lidar_calls = Arc::new(Mutex::new(Vec::new()));
        let imu_calls = Arc::new(Mutex::new(Vec::new()));
        let final_optimizations = Arc::new(Mutex::new(0));
        let facade = started_facade(lidar_calls, imu_calls.clone(), final_optimizations).await;

        let movement: Arc<dyn TimedMovementSensor> = Arc::new(FixedMovementSensor { ang_vel_deg_s: 90.0 });
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(online_movement_loop(movement, facade.clone(), task_cancel));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let _ = handle.await;

        let calls = imu_calls.lock().unwrap();
        assert!(!calls.is_empty());
        assert!((calls[0] - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
        facade.join_worker().await;
    }
}
