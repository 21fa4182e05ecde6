use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use sensors::{TimedIMUReading, TimedLidarReading, TimedOdometerReading};
use types::{CartoAlgoConfig, CartoConfig, Position, SlamMode};

use crate::engine::NativeEngine;
use crate::error::CartoError;
use crate::request::CartoRequest;
use crate::state::CartoState;

/// Thread-safe, timeout-bounded façade in front of a blocking
/// [`NativeEngine`] (spec §4.B).
///
/// A single dedicated OS thread (not a `tokio` task — the native engine is
/// blocking, and parking it on an async worker would starve the runtime)
/// drains a work queue and is the only thing ever touching the engine.
/// Callers submit requests over a `std::sync::mpsc` channel and `.await` a
/// `tokio::sync::oneshot` reply with a `tokio::time::timeout` wrapped
/// around it, so a slow caller never blocks the next queued request.
pub struct CartoFacade {
    tx: mpsc::Sender<CartoRequest>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl CartoFacade {
    /// Spawn the worker thread around `engine` and return the façade ready
    /// to accept requests (still in `UNINITIALIZED` state).
    pub fn new(engine: Box<dyn NativeEngine + Send>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<CartoRequest>();
        let handle = std::thread::Builder::new()
            .name("carto-facade-worker".into())
            .spawn(move || run_worker(engine, rx))
            .expect("failed to spawn carto-facade worker thread");
        Arc::new(Self {
            tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CartoError>>) -> CartoRequest,
        timeout: Duration,
    ) -> Result<T, CartoError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| CartoError::WorkerGone)?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CartoError::WorkerGone),
            Err(_) => Err(CartoError::Timeout),
        }
    }

    pub async fn initialize(
        &self,
        cfg: CartoConfig,
        algo_cfg: CartoAlgoConfig,
        timeout: Duration,
    ) -> Result<SlamMode, CartoError> {
        self.call(|reply| CartoRequest::Initialize { cfg, algo_cfg, reply }, timeout)
            .await
    }

    pub async fn start(&self, timeout: Duration) -> Result<(), CartoError> {
        self.call(|reply| CartoRequest::Start { reply }, timeout).await
    }

    pub async fn add_lidar_reading(
        &self,
        name: impl Into<String>,
        reading: TimedLidarReading,
        timeout: Duration,
    ) -> Result<(), CartoError> {
        let name = name.into();
        self.call(|reply| CartoRequest::AddLidarReading { name, reading, reply }, timeout)
            .await
    }

    pub async fn add_imu_reading(
        &self,
        name: impl Into<String>,
        reading: TimedIMUReading,
        timeout: Duration,
    ) -> Result<(), CartoError> {
        let name = name.into();
        self.call(|reply| CartoRequest::AddImuReading { name, reading, reply }, timeout)
            .await
    }

    pub async fn add_odometer_reading(
        &self,
        name: impl Into<String>,
        reading: TimedOdometerReading,
        timeout: Duration,
    ) -> Result<(), CartoError> {
        let name = name.into();
        self.call(|reply| CartoRequest::AddOdometerReading { name, reading, reply }, timeout)
            .await
    }

    pub async fn position(&self, timeout: Duration) -> Result<Position, CartoError> {
        self.call(|reply| CartoRequest::Position { reply }, timeout).await
    }

    pub async fn point_cloud_map(&self, timeout: Duration) -> Result<Vec<u8>, CartoError> {
        self.call(|reply| CartoRequest::PointCloudMap { reply }, timeout).await
    }

    pub async fn internal_state(&self, timeout: Duration) -> Result<Vec<u8>, CartoError> {
        self.call(|reply| CartoRequest::InternalState { reply }, timeout).await
    }

    pub async fn run_final_optimization(&self, timeout: Duration) -> Result<(), CartoError> {
        self.call(|reply| CartoRequest::RunFinalOptimization { reply }, timeout)
            .await
    }

    pub async fn stop(&self, timeout: Duration) -> Result<(), CartoError> {
        self.call(|reply| CartoRequest::Stop { reply }, timeout).await
    }

    /// Idempotent after success: once the worker reaches `TERMINATED`,
    /// further calls succeed trivially rather than erroring.
    pub async fn terminate(&self, timeout: Duration) -> Result<(), CartoError> {
        self.call(|reply| CartoRequest::Terminate { reply }, timeout).await
    }

    /// Tell the worker loop to exit and join its thread. Only meaningful
    /// after `terminate()` has completed; called once, from the service's
    /// shutdown sequence (spec §4.D step 3).
    pub async fn join_worker(&self) {
        let _ = self.tx.send(CartoRequest::Shutdown);
        let handle = self.worker.lock().expect("carto-facade worker mutex poisoned").take();
        if let Some(handle) = handle {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            match joined {
                Ok(Ok(())) => debug!("carto-facade worker joined"),
                Ok(Err(_)) => warn!("carto-facade worker thread panicked"),
                Err(e) => warn!(?e, "failed to join carto-facade worker thread"),
            }
        }
    }
}

fn run_worker(mut engine: Box<dyn NativeEngine + Send>, rx: mpsc::Receiver<CartoRequest>) {
    info!("carto-facade worker started");
    let mut state = CartoState::Uninitialized;

    for req in rx {
        match req {
            CartoRequest::Initialize { cfg, algo_cfg, reply } => {
                let result = state.advance("initialize").and_then(|next| {
                    let mode = engine.initialize(&cfg, &algo_cfg)?;
                    state = next;
                    Ok(mode)
                });
                let _ = reply.send(result);
            }
            CartoRequest::Start { reply } => {
                let result = state.advance("start").and_then(|next| {
                    engine.start()?;
                    state = next;
                    Ok(())
                });
                let _ = reply.send(result);
            }
            CartoRequest::AddLidarReading { name, reading, reply } => {
                let result = require_active(state, "add_lidar_reading")
                    .and_then(|_| engine.add_lidar_reading(&name, &reading));
                let _ = reply.send(result);
            }
            CartoRequest::AddImuReading { name, reading, reply } => {
                let result = require_active(state, "add_imu_reading")
                    .and_then(|_| engine.add_imu_reading(&name, &reading));
                let _ = reply.send(result);
            }
            CartoRequest::AddOdometerReading { name, reading, reply } => {
                let result = require_active(state, "add_odometer_reading")
                    .and_then(|_| engine.add_odometer_reading(&name, &reading));
                let _ = reply.send(result);
            }
            CartoRequest::Position { reply } => {
                let result = require_active(state, "position").and_then(|_| engine.position());
                let _ = reply.send(result);
            }
            CartoRequest::PointCloudMap { reply } => {
                let result = require_active(state, "point_cloud_map").and_then(|_| engine.point_cloud_map());
                let _ = reply.send(result);
            }
            CartoRequest::InternalState { reply } => {
                let result = require_active(state, "internal_state").and_then(|_| engine.internal_state());
                let _ = reply.send(result);
            }
            CartoRequest::RunFinalOptimization { reply } => {
                let result = require_active(state, "run_final_optimization")
                    .and_then(|_| engine.run_final_optimization());
                let _ = reply.send(result);
            }
            CartoRequest::Stop { reply } => {
                let result = state.advance("stop").and_then(|next| {
                    engine.stop()?;
                    state = next;
                    Ok(())
                });
                let _ = reply.send(result);
            }
            CartoRequest::Terminate { reply } => {
                let result = state.advance("terminate").and_then(|next| {
                    engine.terminate()?;
                    state = next;
                    Ok(())
                });
                let _ = reply.send(result);
            }
            CartoRequest::Shutdown => break,
        }
    }

    info!("carto-facade worker stopped");
}

fn require_active(state: CartoState, op: &'static str) -> Result<(), CartoError> {
    if state.is_active() {
        Ok(())
    } else {
        Err(CartoError::BadState { state, op })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// A fake engine whose `position()` call can be made to block forever,
    /// and which counts concurrent in-flight calls to verify the
    /// single-writer property.
    struct FakeEngine {
        concurrent: Arc<AtomicUsize>,
        max_concurrent: Arc<AtomicUsize>,
        block_position: bool,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FakeEngine {
        fn enter(&self) -> usize {
            let n = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(n, Ordering::SeqCst);
            n
        }
        fn exit(&self) {
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl NativeEngine for FakeEngine {
        fn initialize(&mut self, _cfg: &CartoConfig, _algo: &CartoAlgoConfig) -> Result<SlamMode, CartoError> {
            Ok(SlamMode::Mapping)
        }
        fn start(&mut self) -> Result<(), CartoError> {
            Ok(())
        }
        fn add_lidar_reading(&mut self, _name: &str, _r: &TimedLidarReading) -> Result<(), CartoError> {
            self.enter();
            self.order.lock().unwrap().push("lidar");
            self.exit();
            Ok(())
        }
        fn add_imu_reading(&mut self, _name: &str, _r: &TimedIMUReading) -> Result<(), CartoError> {
            Ok(())
        }
        fn add_odometer_reading(&mut self, _name: &str, _r: &TimedOdometerReading) -> Result<(), CartoError> {
            Ok(())
        }
        fn position(&mut self) -> Result<Position, CartoError> {
            self.enter();
            if self.block_position {
                // Long enough to outlast the caller's timeout below, but
                // finite: the worker thread must still drain this call and
                // move on to the next queued request.
                std::thread::sleep(Duration::from_millis(300));
            }
            self.exit();
            Ok(Position::default())
        }
        fn point_cloud_map(&mut self) -> Result<Vec<u8>, CartoError> {
            Ok(vec![1, 2, 3])
        }
        fn internal_state(&mut self) -> Result<Vec<u8>, CartoError> {
            Ok(vec![9, 9])
        }
        fn run_final_optimization(&mut self) -> Result<(), CartoError> {
            Ok(())
        }
        fn stop(&mut self) -> Result<(), CartoError> {
            Ok(())
        }
        fn terminate(&mut self) -> Result<(), CartoError> {
            Ok(())
        }
    }

    fn fake_cfg() -> CartoConfig {
        CartoConfig {
            camera_name: "cam".into(),
            movement_sensor_name: "imu".into(),
            component_reference: "cam".into(),
            lidar_config: types::LidarConfig::TwoD,
            enable_mapping: true,
            existing_map: String::new(),
            use_cloud_slam: false,
        }
    }

    async fn started_facade(block_position: bool) -> (Arc<CartoFacade>, Arc<AtomicUsize>) {
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let engine = FakeEngine {
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent: max_concurrent.clone(),
            block_position,
            order: Arc::new(Mutex::new(Vec::new())),
        };
        let facade = CartoFacade::new(Box::new(engine));
        facade
            .initialize(fake_cfg(), CartoAlgoConfig::default(), Duration::from_secs(1))
            .await
            .unwrap();
        facade.start(Duration::from_secs(1)).await.unwrap();
        (facade, max_concurrent)
    }

    #[tokio::test]
    async fn test_lifecycle_resolves_mode() {
        let (facade, _) = started_facade(false).await;
        let map = facade.point_cloud_map(Duration::from_secs(1)).await.unwrap();
        assert_eq!(map, vec![1, 2, 3]);
        facade.join_worker().await;
    }

    #[tokio::test]
    async fn test_bad_state_before_initialize() {
        let engine = FakeEngine {
            concurrent: Arc::new(AtomicUsize::new(0)),
            max_concurrent: Arc::new(AtomicUsize::new(0)),
            block_position: false,
            order: Arc::new(Mutex::new(Vec::new())),
        };
        let facade = CartoFacade::new(Box::new(engine));
        let err = facade.start(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, CartoError::BadState { .. }));
        facade.join_worker().await;
    }

    #[tokio::test]
    async fn test_single_writer_under_concurrent_callers() {
        let (facade, max_concurrent) = started_facade(false).await;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let facade = facade.clone();
            handles.push(tokio::spawn(async move {
                facade
                    .add_lidar_reading(
                        "cam",
                        sensors::TimedLidarReading {
                            reading: vec![],
                            reading_time: chrono::Utc::now(),
                            is_replay: false,
                        },
                        Duration::from_secs(1),
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
        facade.join_worker().await;
    }

    #[tokio::test]
    async fn test_timeout_does_not_block_next_request() {
        let (facade, _) = started_facade(true).await;
        let start = Instant::now();
        let err = facade.position(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, CartoError::Timeout);
        assert!(start.elapsed() < Duration::from_millis(150));

        // The first `position` call is still running on the worker thread
        // (300ms) when this one is submitted; it must still complete
        // within its own generous timeout rather than being starved.
        let map = facade.point_cloud_map(Duration::from_secs(2)).await.unwrap();
        assert_eq!(map, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_terminate_idempotent_after_success() {
        let (facade, _) = started_facade(false).await;
        facade.stop(Duration::from_secs(1)).await.unwrap();
        facade.terminate(Duration::from_secs(1)).await.unwrap();
        facade.terminate(Duration::from_secs(1)).await.unwrap();
        facade.join_worker().await;
    }
}
