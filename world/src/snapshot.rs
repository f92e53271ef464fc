use std::{
    fs, io,
    path::{Path, PathBuf},
};

use dreamflap_core::{
    Action, Frame, RecurrentState, CHANNELS, CONTEXT_LEN, FRAME_HEIGHT, FRAME_LEN, FRAME_WIDTH,
    HIDDEN_DIM,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::TemporalContext;

/// Initial environment state exchanged as JSON.
///
/// Missing dimension fields default to the compiled-in constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitSnapshot {
    /// Context length `T`.
    #[serde(rename = "T", default = "default_context_len")]
    pub context_len: usize,
    /// Channels per frame `C`.
    #[serde(rename = "C", default = "default_channels")]
    pub channels: usize,
    /// Frame height `H`.
    #[serde(rename = "H", default = "default_height")]
    pub height: usize,
    /// Frame width `W`.
    #[serde(rename = "W", default = "default_width")]
    pub width: usize,
    /// `T` planar frames, oldest-first.
    pub obs_buffer: Vec<f32>,
    /// `T` action codes, oldest-first.
    pub act_buffer: Vec<Action>,
    /// Recurrent hidden vector.
    pub hx: Vec<f32>,
    /// Recurrent cell vector.
    pub cx: Vec<f32>,
}

fn default_context_len() -> usize {
    CONTEXT_LEN
}

fn default_channels() -> usize {
    CHANNELS
}

fn default_height() -> usize {
    FRAME_HEIGHT
}

fn default_width() -> usize {
    FRAME_WIDTH
}

impl InitSnapshot {
    /// Parses a snapshot from JSON text.
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(text).map_err(SnapshotError::Json)
    }

    /// Serialises the snapshot to JSON text.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(SnapshotError::Json)
    }

    pub(crate) fn restore(self) -> Result<RestoredState, FallbackReason> {
        let dimensions = [
            ("T", CONTEXT_LEN, self.context_len),
            ("C", CHANNELS, self.channels),
            ("H", FRAME_HEIGHT, self.height),
            ("W", FRAME_WIDTH, self.width),
        ];
        for (field, expected, actual) in dimensions {
            if expected != actual {
                return Err(FallbackReason::DimensionMismatch {
                    field,
                    expected,
                    actual,
                });
            }
        }

        let lengths = [
            ("obs_buffer", CONTEXT_LEN * FRAME_LEN, self.obs_buffer.len()),
            ("act_buffer", CONTEXT_LEN, self.act_buffer.len()),
            ("hx", HIDDEN_DIM, self.hx.len()),
            ("cx", HIDDEN_DIM, self.cx.len()),
        ];
        for (field, expected, actual) in lengths {
            if expected != actual {
                return Err(FallbackReason::LengthMismatch {
                    field,
                    expected,
                    actual,
                });
            }
        }

        let mut frames = Vec::with_capacity(CONTEXT_LEN);
        for chunk in self.obs_buffer.chunks_exact(FRAME_LEN) {
            frames.push(Frame::from_vec(chunk.to_vec()).map_err(|error| {
                FallbackReason::LengthMismatch {
                    field: "obs_buffer",
                    expected: error.expected,
                    actual: error.actual,
                }
            })?);
        }
        let context = TemporalContext::from_parts(frames, self.act_buffer).ok_or(
            FallbackReason::LengthMismatch {
                field: "obs_buffer",
                expected: CONTEXT_LEN * FRAME_LEN,
                actual: self.obs_buffer.len(),
            },
        )?;
        let recurrent = RecurrentState::from_parts(self.hx, self.cx).map_err(|error| {
            FallbackReason::LengthMismatch {
                field: "hx/cx",
                expected: error.expected,
                actual: error.actual,
            }
        })?;

        Ok(RestoredState { context, recurrent })
    }
}

/// Context and recurrent state recovered from a valid snapshot.
#[derive(Debug)]
pub(crate) struct RestoredState {
    pub(crate) context: TemporalContext,
    pub(crate) recurrent: RecurrentState,
}

/// Failures raised while fetching or decoding a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot file could not be read.
    #[error("failed to read snapshot at {}: {source}", path.display())]
    Io {
        /// Location that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The snapshot JSON could not be encoded or decoded.
    #[error("invalid snapshot json: {0}")]
    Json(#[source] serde_json::Error),
}

/// Why a reset fell back to the zeroed state.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FallbackReason {
    /// No snapshot was offered.
    #[error("no snapshot provided")]
    Absent,
    /// The snapshot could not be loaded.
    #[error("snapshot unreadable: {0}")]
    Unreadable(String),
    /// A dimension header disagrees with the compiled-in shape.
    #[error("snapshot {field} is {actual}, expected {expected}")]
    DimensionMismatch {
        /// Header field that disagreed.
        field: &'static str,
        /// Compiled-in value.
        expected: usize,
        /// Value found in the snapshot.
        actual: usize,
    },
    /// A data field has the wrong number of entries.
    #[error("snapshot {field} holds {actual} values, expected {expected}")]
    LengthMismatch {
        /// Field with the wrong length.
        field: &'static str,
        /// Required number of values.
        expected: usize,
        /// Number of values found.
        actual: usize,
    },
}

/// Result of a reset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The snapshot was applied as-is.
    Restored,
    /// The environment starts from zero frames, no-op actions and zero state.
    ZeroFilled(FallbackReason),
}

impl ResetOutcome {
    /// Whether the snapshot was applied.
    #[must_use]
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored)
    }
}

/// Somewhere a reset can fetch its initial state from.
pub trait SnapshotSource {
    /// Loads the snapshot, `Ok(None)` when the source has nothing to offer.
    fn load(&self) -> Result<Option<InitSnapshot>, SnapshotError>;
}

/// Source that never offers a snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSnapshot;

impl SnapshotSource for NoSnapshot {
    fn load(&self) -> Result<Option<InitSnapshot>, SnapshotError> {
        Ok(None)
    }
}

impl SnapshotSource for InitSnapshot {
    fn load(&self) -> Result<Option<InitSnapshot>, SnapshotError> {
        Ok(Some(self.clone()))
    }
}

/// JSON snapshot stored on disk.
#[derive(Clone, Debug)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    /// Points at the snapshot file located at `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SnapshotSource for JsonFile {
    fn load(&self) -> Result<Option<InitSnapshot>, SnapshotError> {
        let text = fs::read_to_string(&self.path).map_err(|source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        })?;
        InitSnapshot::from_json(&text).map(Some)
    }
}

/// Loads and validates the state a reset should adopt.
pub(crate) fn restore_from(source: &impl SnapshotSource) -> Result<RestoredState, FallbackReason> {
    match source.load() {
        Ok(Some(snapshot)) => snapshot.restore(),
        Ok(None) => Err(FallbackReason::Absent),
        Err(error) => Err(FallbackReason::Unreadable(error.to_string())),
    }
}
