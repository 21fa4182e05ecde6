//! Top-level SLAM service (spec §4.D): mode selection at construction,
//! chunked map/state streaming, the post-processing control surface, and
//! the strict shutdown ordering that untangles the façade/sensor-process/
//! service reference cycle.

mod chunk;
mod command;
mod config;
mod error;
mod service;

pub use chunk::{ChunkIterator, CHUNK_SIZE};
pub use command::{parse as parse_command, CommandPoint, DoCommand, JobDoneReply};
pub use config::{parse_algo_config, FileConfig};
pub use error::ServiceError;
pub use service::Service;
