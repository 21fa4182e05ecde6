//! The top-level `Service` object (spec §4.D): mediates every caller-facing
//! query, owns the map timestamp, the post-processing task list, and the
//! closed/cloud-slam flags, and drives the strict shutdown ordering that
//! untangles the façade/sensor-process/service reference cycle (spec §9
//! "cyclic resource shutdown").

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use carto_facade::{CartoFacade, NativeEngine};
use postprocess::PostProcessor;
use sensor_process::SensorProcess;
use sensors::{TimedLidar, TimedMovementSensor};
use types::{CartoAlgoConfig, CartoConfig, Pose, SlamMode, SlamProperties};

use crate::chunk::ChunkIterator;
use crate::command::{self, DoCommand, JobDoneReply};
use crate::error::ServiceError;

/// Timeout for the one-shot lifecycle calls (`initialize`/`start`/`stop`/
/// `terminate`) made while constructing or closing a service.
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for caller-facing queries (`position`, `pointCloudMap`,
/// `internalState`) — short, since a query should fail fast rather than
/// make a caller wait behind a stuck native call (spec §5).
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on construction-time sensor validation (spec §4.A).
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);
const VALIDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Mutable state guarded by the service's shared mutex (spec §5: "a shared
/// service mutex guards the post-processing list, the closed flag, and
/// mode-dependent flags").
struct Inner {
    postprocess: PostProcessor,
    map_timestamp: chrono::DateTime<Utc>,
    closed: bool,
    /// Cached post-processed map for LOCALIZING mode, so a frozen map
    /// timestamp doesn't imply recomputing the edit list on every call.
    localized_cache: Option<Vec<u8>>,
}

pub struct Service {
    facade: Arc<CartoFacade>,
    sensor_process: Mutex<Option<SensorProcess>>,
    inner: Mutex<Inner>,
    mode: SlamMode,
    cloud_slam: bool,
    component_reference: String,
    /// Edited map pre-loaded from the existing-map package directory at
    /// construction (spec §8 S3), distinct from a map loaded later via the
    /// `postprocess_path` `doCommand` (`PostProcessor::edited_map`).
    preloaded_edited_map: Option<Vec<u8>>,
}

impl Service {
    /// Validate sensors, initialize and start the façade, and launch the
    /// appropriate sensor-process worker(s) (online vs. offline, decided by
    /// the lidar's reported frequency).
    pub async fn new(
        cfg: CartoConfig,
        algo_cfg: CartoAlgoConfig,
        engine: Box<dyn NativeEngine + Send>,
        lidar: Arc<dyn TimedLidar>,
        movement: Option<Arc<dyn TimedMovementSensor>>,
    ) -> Result<Arc<Service>, ServiceError> {
        if cfg.use_cloud_slam {
            return Err(ServiceError::UseCloudSlamEnabled);
        }

        let resolved = SlamMode::resolve(cfg.enable_mapping, &cfg.existing_map).ok_or_else(|| {
            ServiceError::InvalidConfig(
                "enable_mapping=false requires a non-empty existing_map".into(),
            )
        })?;

        validate_sensor(lidar.clone()).await?;
        if let Some(movement) = movement.clone() {
            validate_movement_sensor(movement).await?;
        }

        let preloaded_edited_map = load_preloaded_edited_map(&cfg.existing_map)?;

        let facade = CartoFacade::new(engine);
        let engine_mode = facade
            .initialize(cfg.clone(), algo_cfg, LIFECYCLE_TIMEOUT)
            .await?;
        facade.start(LIFECYCLE_TIMEOUT).await?;

        if engine_mode != resolved {
            warn!(?engine_mode, ?resolved, "native engine resolved a different mode than construction flags");
        }

        let sensor_process = if lidar.data_frequency_hz() == 0 {
            info!("launching offline sensor-process loop");
            SensorProcess::spawn_offline(lidar, movement, facade.clone())
        } else {
            info!("launching online sensor-process loops");
            SensorProcess::spawn_online(lidar, movement, facade.clone())
        };

        let now = Utc::now();
        Ok(Arc::new(Service {
            facade,
            sensor_process: Mutex::new(Some(sensor_process)),
            inner: Mutex::new(Inner {
                postprocess: PostProcessor::new(),
                map_timestamp: now,
                closed: false,
                localized_cache: None,
            }),
            mode: engine_mode,
            cloud_slam: cfg.use_cloud_slam,
            component_reference: cfg.component_reference,
            preloaded_edited_map,
        }))
    }

    fn ensure_open(&self) -> Result<(), ServiceError> {
        if self.inner.lock().expect("service mutex poisoned").closed {
            Err(ServiceError::Closed)
        } else {
            Ok(())
        }
    }

    /// `position() → (Pose, componentReference)`.
    pub async fn position(&self) -> Result<(Pose, String), ServiceError> {
        self.ensure_open()?;
        let position = self.facade.position(QUERY_TIMEOUT).await?;
        let q = position.orientation.ok_or(ServiceError::QuaternionMissing)?;

        if !q.real.is_finite() || !q.imag.is_finite() || !q.jmag.is_finite() || !q.kmag.is_finite() {
            return Err(ServiceError::QuaternionMalformed("non-finite component".into()));
        }
        let norm_sq = q.real * q.real + q.imag * q.imag + q.jmag * q.jmag + q.kmag * q.kmag;
        if (norm_sq - 1.0).abs() > 1e-3 {
            return Err(ServiceError::QuaternionMalformed(format!("non-unit norm: {norm_sq}")));
        }

        let pose = Pose { x: position.x, y: position.y, theta: q.yaw() };
        Ok((pose, self.component_reference.clone()))
    }

    /// `pointCloudMap(returnEditedMap) → ChunkIterator`, per the decision
    /// cascade in spec §4.D.
    pub async fn point_cloud_map(&self, return_edited_map: bool) -> Result<ChunkIterator, ServiceError> {
        self.ensure_open()?;

        if return_edited_map {
            if let Some(bytes) = &self.preloaded_edited_map {
                return Ok(ChunkIterator::new(bytes.clone()));
            }
        }

        if self.mode == SlamMode::Localizing {
            let cached = {
                let inner = self.inner.lock().expect("service mutex poisoned");
                if inner.postprocess.enabled() {
                    inner.localized_cache.clone()
                } else {
                    None
                }
            };
            if let Some(bytes) = cached {
                return Ok(ChunkIterator::new(bytes));
            }
        }

        let raw = self.facade.point_cloud_map(QUERY_TIMEOUT).await?;
        let applied = {
            let mut inner = self.inner.lock().expect("service mutex poisoned");
            let applied = inner.postprocess.apply(&raw)?;
            if self.mode == SlamMode::Localizing {
                inner.localized_cache = Some(applied.clone());
            } else {
                inner.map_timestamp = Utc::now();
            }
            applied
        };

        Ok(ChunkIterator::new(applied))
    }

    /// `internalState() → ChunkIterator`, chunked the same way.
    pub async fn internal_state(&self) -> Result<ChunkIterator, ServiceError> {
        self.ensure_open()?;
        let bytes = self.facade.internal_state(QUERY_TIMEOUT).await?;
        Ok(ChunkIterator::new(bytes))
    }

    /// `properties() → {cloudSlam, mappingMode, mapTimestamp}`.
    pub fn properties(&self) -> Result<SlamProperties, ServiceError> {
        self.ensure_open()?;
        let map_timestamp = self.inner.lock().expect("service mutex poisoned").map_timestamp;
        Ok(SlamProperties {
            cloud_slam: self.cloud_slam,
            mapping_mode: self.mode.mapping_mode(),
            map_timestamp,
        })
    }

    /// `doCommand(req) → reply`, dispatched by verb name (spec §6).
    pub async fn do_command(&self, name: &str, args: Value) -> Result<Value, ServiceError> {
        self.ensure_open()?;
        let cmd = command::parse(name, args)?;

        match cmd {
            DoCommand::JobDone => {
                let job_done = self
                    .sensor_process
                    .lock()
                    .expect("service mutex poisoned")
                    .as_ref()
                    .map(|sp| sp.job_done())
                    .unwrap_or(true);
                Ok(serde_json::to_value(JobDoneReply { job_done })
                    .expect("JobDoneReply always serializes"))
            }
            DoCommand::PostprocessToggle => {
                let mut inner = self.inner.lock().expect("service mutex poisoned");
                inner.postprocess.toggle();
                inner.localized_cache = None;
                Ok(Value::Null)
            }
            DoCommand::PostprocessUndo => {
                let mut inner = self.inner.lock().expect("service mutex poisoned");
                inner.postprocess.undo()?;
                inner.localized_cache = None;
                Ok(Value::Null)
            }
            DoCommand::PostprocessAdd(points) => {
                let mut inner = self.inner.lock().expect("service mutex poisoned");
                inner.postprocess.add(points)?;
                inner.localized_cache = None;
                Ok(Value::Null)
            }
            DoCommand::PostprocessRemove(points) => {
                let mut inner = self.inner.lock().expect("service mutex poisoned");
                inner.postprocess.remove(points)?;
                inner.localized_cache = None;
                Ok(Value::Null)
            }
            DoCommand::PostprocessPath(path) => {
                let mut inner = self.inner.lock().expect("service mutex poisoned");
                inner.postprocess.set_path(path)?;
                inner.localized_cache = None;
                Ok(Value::Null)
            }
        }
    }

    /// Ordered, idempotent shutdown (spec §4.D):
    /// 1. cancel the sensor-process context and join its workers,
    /// 2. `stop()` then `terminate()` the façade under its own timeout,
    /// 3. cancel the façade worker context and join the worker thread,
    /// 4. mark the service closed so further calls return `Closed`.
    pub async fn close(&self) {
        if self.inner.lock().expect("service mutex poisoned").closed {
            return;
        }

        let sensor_process = self.sensor_process.lock().expect("service mutex poisoned").take();
        if let Some(sensor_process) = sensor_process {
            sensor_process.shutdown().await;
        }

        if let Err(e) = self.facade.stop(LIFECYCLE_TIMEOUT).await {
            warn!(error = %e, "facade stop() failed during shutdown");
        }
        if let Err(e) = self.facade.terminate(LIFECYCLE_TIMEOUT).await {
            warn!(error = %e, "facade terminate() failed during shutdown");
        }
        self.facade.join_worker().await;

        self.inner.lock().expect("service mutex poisoned").closed = true;
        info!("slam service closed");
    }
}

async fn validate_sensor(lidar: Arc<dyn TimedLidar>) -> Result<(), ServiceError> {
    let cancel = CancellationToken::new();
    tokio::task::spawn_blocking(move || {
        sensors::validate(
            || lidar.read().map(|_| ()),
            VALIDATE_TIMEOUT,
            VALIDATE_INTERVAL,
            &cancel,
        )
    })
    .await
    .map_err(|_| ServiceError::InvalidConfig("lidar validation task panicked".into()))??;
    Ok(())
}

async fn validate_movement_sensor(movement: Arc<dyn TimedMovementSensor>) -> Result<(), ServiceError> {
    let cancel = CancellationToken::new();
    tokio::task::spawn_blocking(move || {
        sensors::validate(
            || movement.read().map(|_| ()),
            VALIDATE_TIMEOUT,
            VALIDATE_INTERVAL,
            &cancel,
        )
    })
    .await
    .map_err(|_| ServiceError::InvalidConfig("movement sensor validation task panicked".into()))??;
    Ok(())
}

/// Look for `edited-map.pcd` next to the existing-map package: if
/// `existing_map` names a directory, inside it; if it names a file (e.g.
/// `map.bin`), inside its parent (spec §8 S3).
fn load_preloaded_edited_map(existing_map: &str) -> Result<Option<Vec<u8>>, ServiceError> {
    if existing_map.is_empty() {
        return Ok(None);
    }
    let path = Path::new(existing_map);
    let dir = if path.is_dir() {
        path
    } else {
        path.parent().unwrap_or_else(|| Path::new("."))
    };
    let candidate = dir.join("edited-map.pcd");
    if candidate.is_file() {
        let bytes = std::fs::read(&candidate)
            .map_err(|e| ServiceError::InvalidConfig(format!("{}: {e}", candidate.display())))?;
        Ok(Some(bytes))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carto_engine::CartoEngine;
    use sensors::{SensorError, TimedLidarReading};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A replay lidar that yields `n` empty readings then `EndOfDataset`,
    /// at `hz` (0 for offline).
    struct ScriptedLidar {
        remaining: Mutex<usize>,
        hz: u32,
        reads: Arc<AtomicUsize>,
    }

    impl TimedLidar for ScriptedLidar {
        fn name(&self) -> &str {
            "scripted-lidar"
        }
        fn data_frequency_hz(&self) -> u32 {
            self.hz
        }
        fn read(&self) -> Result<TimedLidarReading, SensorError> {
            let mut remaining = self.remaining.lock().unwrap();
            self.reads.fetch_add(1, Ordering::SeqCst);
            if *remaining == 0 {
                return Err(SensorError::EndOfDataset);
            }
            *remaining -= 1;
            Ok(TimedLidarReading { reading: vec![], reading_time: Utc::now(), is_replay: true })
        }
    }

    /// A native engine whose `position()` omits the quaternion entirely,
    /// the way the real engine's C binding leaves it unset when the scan
    /// matcher hasn't converged on an orientation yet.
    struct QuaternionlessEngine(CartoEngine);

    impl NativeEngine for QuaternionlessEngine {
        fn initialize(
            &mut self,
            cfg: &CartoConfig,
            algo_cfg: &CartoAlgoConfig,
        ) -> Result<SlamMode, carto_facade::CartoError> {
            self.0.initialize(cfg, algo_cfg)
        }
        fn start(&mut self) -> Result<(), carto_facade::CartoError> {
            self.0.start()
        }
        fn add_lidar_reading(
            &mut self,
            name: &str,
            reading: &sensors::TimedLidarReading,
        ) -> Result<(), carto_facade::CartoError> {
            self.0.add_lidar_reading(name, reading)
        }
        fn add_imu_reading(
            &mut self,
            name: &str,
            reading: &sensors::TimedIMUReading,
        ) -> Result<(), carto_facade::CartoError> {
            self.0.add_imu_reading(name, reading)
        }
        fn add_odometer_reading(
            &mut self,
            name: &str,
            reading: &sensors::TimedOdometerReading,
        ) -> Result<(), carto_facade::CartoError> {
            self.0.add_odometer_reading(name, reading)
        }
        fn position(&mut self) -> Result<types::Position, carto_facade::CartoError> {
            Ok(types::Position { orientation: None, ..self.0.position()? })
        }
        fn point_cloud_map(&mut self) -> Result<Vec<u8>, carto_facade::CartoError> {
            self.0.point_cloud_map()
        }
        fn internal_state(&mut self) -> Result<Vec<u8>, carto_facade::CartoError> {
            self.0.internal_state()
        }
        fn run_final_optimization(&mut self) -> Result<(), carto_facade::CartoError> {
            self.0.run_final_optimization()
        }
        fn stop(&mut self) -> Result<(), carto_facade::CartoError> {
            self.0.stop()
        }
        fn terminate(&mut self) -> Result<(), carto_facade::CartoError> {
            self.0.terminate()
        }
    }

    #[tokio::test]
    async fn test_position_fails_with_quaternion_missing_when_engine_omits_it() {
        let lidar: Arc<dyn TimedLidar> = Arc::new(ScriptedLidar {
            remaining: Mutex::new(0),
            hz: 0,
            reads: Arc::new(AtomicUsize::new(0)),
        });
        let service = Service::new(
            mapping_cfg(),
            CartoAlgoConfig::default(),
            Box::new(QuaternionlessEngine(CartoEngine::new())),
            lidar,
            None,
        )
        .await
        .unwrap();

        assert!(matches!(service.position().await, Err(ServiceError::QuaternionMissing)));
        service.close().await;
    }

    fn mapping_cfg() -> CartoConfig {
        CartoConfig {
            camera_name: "lidar".into(),
            movement_sensor_name: "".into(),
            component_reference: "lidar".into(),
            lidar_config: types::LidarConfig::TwoD,
            enable_mapping: true,
            existing_map: String::new(),
            use_cloud_slam: false,
        }
    }

    #[tokio::test]
    async fn test_construction_rejects_invalid_mode_combination() {
        let cfg = CartoConfig { enable_mapping: false, existing_map: String::new(), ..mapping_cfg() };
        let lidar: Arc<dyn TimedLidar> = Arc::new(ScriptedLidar {
            remaining: Mutex::new(0),
            hz: 0,
            reads: Arc::new(AtomicUsize::new(0)),
        });
        let err = Service::new(cfg, CartoAlgoConfig::default(), Box::new(CartoEngine::new()), lidar, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_offline_mapping_session_reaches_job_done() {
        let lidar: Arc<dyn TimedLidar> = Arc::new(ScriptedLidar {
            remaining: Mutex::new(10),
            hz: 0,
            reads: Arc::new(AtomicUsize::new(0)),
        });
        let service = Service::new(
            mapping_cfg(),
            CartoAlgoConfig::default(),
            Box::new(CartoEngine::new()),
            lidar,
            None,
        )
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let reply = service.do_command("job_done", Value::Null).await.unwrap();
                let reply: JobDoneReply = serde_json::from_value(reply).unwrap();
                if reply.job_done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("offline session did not complete in time");

        let (pose, reference) = service.position().await.unwrap();
        assert_eq!(reference, "lidar");
        assert!(pose.x.is_finite());

        service.close().await;
        assert!(matches!(service.position().await, Err(ServiceError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let lidar: Arc<dyn TimedLidar> = Arc::new(ScriptedLidar {
            remaining: Mutex::new(0),
            hz: 0,
            reads: Arc::new(AtomicUsize::new(0)),
        });
        let service = Service::new(
            mapping_cfg(),
            CartoAlgoConfig::default(),
            Box::new(CartoEngine::new()),
            lidar,
            None,
        )
        .await
        .unwrap();

        service.close().await;
        service.close().await;
        assert!(matches!(service.properties(), Err(ServiceError::Closed)));
    }

    #[tokio::test]
    async fn test_postprocessing_toggle_affects_point_cloud_map() {
        let lidar: Arc<dyn TimedLidar> = Arc::new(ScriptedLidar {
            remaining: Mutex::new(0),
            hz: 0,
            reads: Arc::new(AtomicUsize::new(0)),
        });
        let service = Service::new(
            mapping_cfg(),
            CartoAlgoConfig::default(),
            Box::new(CartoEngine::new()),
            lidar,
            None,
        )
        .await
        .unwrap();

        let base = service.point_cloud_map(false).await.unwrap().collect_all();

        let args = serde_json::json!({"points": [{"x": 1.0, "y": 2.0, "z": 3.0}]});
        service.do_command("postprocess_add", args).await.unwrap();
        let with_add = service.point_cloud_map(false).await.unwrap().collect_all();
        assert_ne!(base, with_add);

        service.do_command("postprocess_toggle", Value::Null).await.unwrap();
        let toggled_off = service.point_cloud_map(false).await.unwrap().collect_all();
        assert_eq!(toggled_off, base);

        service.close().await;
    }
}
