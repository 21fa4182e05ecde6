use tokio::sync::oneshot;

use sensors::{TimedIMUReading, TimedLidarReading, TimedOdometerReading};
use types::{CartoAlgoConfig, CartoConfig, Position, SlamMode};

use crate::error::CartoError;

type Reply<T> = oneshot::Sender<Result<T, CartoError>>;

/// One unit of work submitted to the façade worker. Carries the operation,
/// its parameters, and a reply channel the worker answers on once the
/// native call returns (spec §4.B: request/response + reply channel).
pub(crate) enum CartoRequest {
    Initialize {
        cfg: CartoConfig,
        algo_cfg: CartoAlgoConfig,
        reply: Reply<SlamMode>,
    },
    Start {
        reply: Reply<()>,
    },
    AddLidarReading {
        name: String,
        reading: TimedLidarReading,
        reply: Reply<()>,
    },
    AddImuReading {
        name: String,
        reading: TimedIMUReading,
        reply: Reply<()>,
    },
    AddOdometerReading {
        name: String,
        reading: TimedOdometerReading,
        reply: Reply<()>,
    },
    Position {
        reply: Reply<Position>,
    },
    PointCloudMap {
        reply: Reply<Vec<u8>>,
    },
    InternalState {
        reply: Reply<Vec<u8>>,
    },
    RunFinalOptimization {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    Terminate {
        reply: Reply<()>,
    },
    /// Not a native call: tells the worker loop to exit. Sent once, during
    /// service shutdown, after `terminate()` has already completed.
    Shutdown,
}
