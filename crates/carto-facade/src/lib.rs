//! Thread-safe, timeout-bounded façade in front of a blocking native SLAM
//! engine (spec §4.B).
//!
//! All operations are serialized through a single dedicated worker thread,
//! so the native engine — a non-reentrant, mutably-exclusive resource — is
//! never touched by more than one caller at a time. Each public call
//! blocks its caller until reply or timeout; a timed-out call's native
//! work still runs to completion on the worker, but its result is
//! discarded rather than delivered.

mod engine;
mod error;
mod facade;
mod request;
mod state;

pub use engine::NativeEngine;
pub use error::CartoError;
pub use facade::CartoFacade;
pub use state::CartoState;
