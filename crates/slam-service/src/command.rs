//! `doCommand` verb dispatch (spec §4.D, §6).
//!
//! Parsed into a small enum up front rather than string-matched in the hot
//! path, the way `state::Event` drives the teacher's state machine instead
//! of raw string commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::{ColoredPoint, Rgba};

use crate::error::ServiceError;

/// A single point as carried in the `postprocess_add`/`postprocess_remove`
/// JSON payload: `{x, y, z, r?, g?, b?, a?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default)]
    pub r: Option<u8>,
    #[serde(default)]
    pub g: Option<u8>,
    #[serde(default)]
    pub b: Option<u8>,
    #[serde(default)]
    pub a: Option<u8>,
}

impl From<CommandPoint> for ColoredPoint {
    fn from(p: CommandPoint) -> Self {
        let rgba = match (p.r, p.g, p.b) {
            (Some(r), Some(g), Some(b)) => Some(Rgba { r, g, b, a: p.a.unwrap_or(255) }),
            _ => None,
        };
        ColoredPoint { x: p.x, y: p.y, z: p.z, rgba }
    }
}

/// Verbs dispatched through `doCommand` (spec §6).
#[derive(Debug, Clone)]
pub enum DoCommand {
    JobDone,
    PostprocessToggle,
    PostprocessAdd(Vec<ColoredPoint>),
    PostprocessRemove(Vec<ColoredPoint>),
    PostprocessUndo,
    PostprocessPath(String),
}

/// Parse the `{name, args}` JSON shape named in spec §6 into a typed verb.
/// Unknown names fail with [`ServiceError::Unimplemented`] per spec §6.
pub fn parse(name: &str, args: Value) -> Result<DoCommand, ServiceError> {
    match name {
        "job_done" => Ok(DoCommand::JobDone),
        "postprocess_toggle" => Ok(DoCommand::PostprocessToggle),
        "postprocess_undo" => Ok(DoCommand::PostprocessUndo),
        "postprocess_add" => Ok(DoCommand::PostprocessAdd(parse_points(args)?)),
        "postprocess_remove" => Ok(DoCommand::PostprocessRemove(parse_points(args)?)),
        "postprocess_path" => {
            let path: PathArgs = serde_json::from_value(args)
                .map_err(|e| ServiceError::InvalidConfig(format!("postprocess_path args: {e}")))?;
            Ok(DoCommand::PostprocessPath(path.path))
        }
        other => Err(ServiceError::Unimplemented(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct PointsArgs {
    points: Vec<CommandPoint>,
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

fn parse_points(args: Value) -> Result<Vec<ColoredPoint>, ServiceError> {
    let parsed: PointsArgs = serde_json::from_value(args)
        .map_err(|e| ServiceError::InvalidConfig(format!("bad postprocessing points: {e}")))?;
    Ok(parsed.points.into_iter().map(ColoredPoint::from).collect())
}

/// Reply payload for `job_done` (spec §6: `{job_done: bool}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDoneReply {
    pub job_done: bool,
}
