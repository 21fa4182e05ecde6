use crate::error::CartoError;

/// Façade lifecycle state machine (spec §4.B).
///
/// `Terminated` has no outgoing transitions; `terminate()` from
/// `Terminated` is accepted rather than rejected so shutdown is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartoState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Terminated,
}

impl CartoState {
    /// Validate and apply the state transition `op` would cause, per the
    /// table `UNINITIALIZED -> INITIALIZED -> RUNNING -> STOPPED ->
    /// TERMINATED`.
    pub fn advance(self, op: &'static str) -> Result<CartoState, CartoError> {
        use CartoState::*;
        let next = match (self, op) {
            (Uninitialized, "initialize") => Initialized,
            (Initialized, "start") => Running,
            (Running, "stop") => Stopped,
            (Stopped, "terminate") => Terminated,
            (Terminated, "terminate") => Terminated,
            _ => return Err(CartoError::BadState { state: self, op }),
        };
        Ok(next)
    }

    /// Whether ingestion/query calls are meaningful in this state.
    pub fn is_active(self) -> bool {
        matches!(self, CartoState::Running)
    }
}
