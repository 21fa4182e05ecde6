//! Post-processing: an ordered list of additive/subtractive edits applied
//! to the published point-cloud map without re-injecting them into the
//! SLAM engine (spec §4.E). Pure logic, independently testable without a
//! running façade — the same reasoning that keeps `transforms` free of
//! any sensor or engine dependency.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use types::{ColoredPoint, PostProcessTask};

/// Per-point distance tolerance for `REMOVE`: a published point is excised
/// if it lies within this many meters of a requested removal point. Picked
/// to cover PCD binary float32 roundoff without erasing neighboring real
/// points (see DESIGN.md Open Question on removal tolerance).
pub const REMOVE_TOLERANCE_METERS: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum PostprocessError {
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("bad post-processing points: {0}")]
    BadPostprocessingPoints(String),
    #[error("bad post-processing path: {0}")]
    BadPostprocessingPath(String),
    #[error("failed to decode map for post-processing: {0}")]
    Decode(#[from] sensors::SensorError),
}

/// The ordered edit list plus the "apply post-processing" toggle and an
/// optional externally-prepared edited map that bypasses the list
/// entirely (spec §4.E `PATH`).
#[derive(Debug, Default)]
pub struct PostProcessor {
    tasks: Vec<PostProcessTask>,
    enabled: bool,
    edited_map: Option<Vec<u8>>,
}

impl PostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ADD(points[])`: append an additive task, enabling post-processing.
    pub fn add(&mut self, points: Vec<ColoredPoint>) -> Result<(), PostprocessError> {
        if points.is_empty() {
            return Err(PostprocessError::BadPostprocessingPoints("empty point list".into()));
        }
        self.tasks.push(PostProcessTask::Add(points));
        self.enabled = true;
        Ok(())
    }

    /// `REMOVE(points[])`: append a subtractive task, enabling post-processing.
    pub fn remove(&mut self, points: Vec<ColoredPoint>) -> Result<(), PostprocessError> {
        if points.is_empty() {
            return Err(PostprocessError::BadPostprocessingPoints("empty point list".into()));
        }
        self.tasks.push(PostProcessTask::Remove(points));
        self.enabled = true;
        Ok(())
    }

    /// `UNDO`: drop the most recently appended task.
    pub fn undo(&mut self) -> Result<(), PostprocessError> {
        if self.tasks.pop().is_none() {
            return Err(PostprocessError::NothingToUndo);
        }
        Ok(())
    }

    /// `TOGGLE`: flip whether edits are applied, without clearing the list.
    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// `PATH(filepath)`: load an externally prepared edited map from disk,
    /// bypassing the task list entirely, and enable post-processing.
    pub fn set_path(&mut self, path: impl AsRef<Path>) -> Result<(), PostprocessError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)
            .map_err(|e| PostprocessError::BadPostprocessingPath(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), bytes = bytes.len(), "loaded externally edited map");
        self.edited_map = Some(bytes);
        self.enabled = true;
        Ok(())
    }

    /// Apply the current edit state to `base` (raw PCD bytes from the
    /// engine). If an externally loaded edited map is set, it is returned
    /// verbatim regardless of the task list. Otherwise the task list is
    /// applied in insertion order iff `enabled`; disabled or empty, `base`
    /// passes through unchanged.
    pub fn apply(&self, base: &[u8]) -> Result<Vec<u8>, PostprocessError> {
        if let Some(edited) = &self.edited_map {
            return Ok(edited.clone());
        }
        if !self.enabled || self.tasks.is_empty() {
            return Ok(base.to_vec());
        }

        let mut points = sensors::pcd::decode(base)?;
        for task in &self.tasks {
            match task {
                PostProcessTask::Add(added) => points.extend(added.iter().copied()),
                PostProcessTask::Remove(removed) => {
                    points.retain(|p| !removed.iter().any(|r| close(p, r)));
                }
            }
        }
        Ok(sensors::pcd::encode(&points))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// The externally loaded edited map, if `PATH` has been issued.
    pub fn edited_map(&self) -> Option<&[u8]> {
        self.edited_map.as_deref()
    }
}

fn close(a: &ColoredPoint, b: &ColoredPoint) -> bool {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt() <= REMOVE_TOLERANCE_METERS
}
