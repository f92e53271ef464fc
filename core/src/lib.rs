#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the dreamflap world-model engine.
//!
//! This crate defines the data that flows between the simulation engine and
//! the neural inference backends it drives. Frames and recurrent state have
//! fixed, compiled-in shapes; every neural network is reached through the
//! asynchronous capability traits re-exported from [`capability`], which
//! hosts inject into the sampler and the environment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod capability;

pub use capability::{
    CapabilityError, DenoiseRequest, Denoiser, RecurrentOutput, RecurrentPredictor,
    TransitionRequest,
};

/// Number of frames (and actions) held in the conditioning context.
pub const CONTEXT_LEN: usize = 4;
/// Colour channels per frame.
pub const CHANNELS: usize = 3;
/// Frame height in pixels.
pub const FRAME_HEIGHT: usize = 64;
/// Frame width in pixels.
pub const FRAME_WIDTH: usize = 64;
/// Number of scalar values in a single planar frame.
pub const FRAME_LEN: usize = CHANNELS * FRAME_HEIGHT * FRAME_WIDTH;
/// Dimension of the recurrent hidden and cell vectors.
pub const HIDDEN_DIM: usize = 512;

/// Shape of a frame expressed as `[channels, height, width]`.
pub const FRAME_SHAPE: [usize; 3] = [CHANNELS, FRAME_HEIGHT, FRAME_WIDTH];

/// Discrete player input fed to the world model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Action {
    /// No input this step.
    #[default]
    Noop,
    /// The bird flaps.
    Flap,
}

impl Action {
    /// Integer code used by the inference backends.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Noop => 0,
            Self::Flap => 1,
        }
    }

    /// Decodes an action from its integer code.
    pub const fn from_code(code: i64) -> Result<Self, UnknownActionCode> {
        match code {
            0 => Ok(Self::Noop),
            1 => Ok(Self::Flap),
            other => Err(UnknownActionCode(other)),
        }
    }
}

impl From<Action> for i64 {
    fn from(action: Action) -> Self {
        action.code()
    }
}

impl TryFrom<i64> for Action {
    type Error = UnknownActionCode;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

/// Raised when an integer does not map onto a known [`Action`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("unknown action code {0}")]
pub struct UnknownActionCode(pub i64);

/// Raised when a buffer does not have the length its shape requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("expected {expected} values but received {actual}")]
pub struct ShapeError {
    /// Number of values the shape requires.
    pub expected: usize,
    /// Number of values that were supplied.
    pub actual: usize,
}

/// A single `[C, H, W]` planar frame of values nominally in `[-1, 1]`.
///
/// Values are not clamped; sampler output may transiently leave the nominal
/// range and clamping is left to whoever displays the frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    values: Box<[f32]>,
}

impl Frame {
    /// Creates a frame filled with zeros.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            values: vec![0.0; FRAME_LEN].into_boxed_slice(),
        }
    }

    /// Wraps planar values, rejecting buffers of the wrong length.
    pub fn from_vec(values: Vec<f32>) -> Result<Self, ShapeError> {
        if values.len() != FRAME_LEN {
            return Err(ShapeError {
                expected: FRAME_LEN,
                actual: values.len(),
            });
        }
        Ok(Self {
            values: values.into_boxed_slice(),
        })
    }

    /// Borrows the frame as a shaped view.
    #[must_use]
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            values: &self.values,
        }
    }

    /// Planar values in channel-major order.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Consumes the frame, yielding its planar values.
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.values.into_vec()
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Borrowed `[C, H, W]` view of a frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameView<'a> {
    values: &'a [f32],
}

impl<'a> FrameView<'a> {
    /// Logical shape of the view.
    #[must_use]
    pub const fn shape(&self) -> [usize; 3] {
        FRAME_SHAPE
    }

    /// Planar values in channel-major order.
    #[must_use]
    pub fn as_slice(&self) -> &'a [f32] {
        self.values
    }

    /// Returns the value at channel `c`, row `y`, column `x`.
    #[must_use]
    pub fn value(&self, c: usize, y: usize, x: usize) -> Option<f32> {
        if c >= CHANNELS || y >= FRAME_HEIGHT || x >= FRAME_WIDTH {
            return None;
        }
        self.values
            .get((c * FRAME_HEIGHT + y) * FRAME_WIDTH + x)
            .copied()
    }

    /// Copies the view into an owned frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame {
            values: self.values.into(),
        }
    }
}

/// Hidden and cell vectors carried by the recurrent reward/termination model.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentState {
    hidden: Box<[f32]>,
    cell: Box<[f32]>,
}

impl RecurrentState {
    /// Creates an all-zero state.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            hidden: vec![0.0; HIDDEN_DIM].into_boxed_slice(),
            cell: vec![0.0; HIDDEN_DIM].into_boxed_slice(),
        }
    }

    /// Assembles a state from its parts, rejecting vectors that are not
    /// [`HIDDEN_DIM`] long.
    pub fn from_parts(hidden: Vec<f32>, cell: Vec<f32>) -> Result<Self, ShapeError> {
        for part in [&hidden, &cell] {
            if part.len() != HIDDEN_DIM {
                return Err(ShapeError {
                    expected: HIDDEN_DIM,
                    actual: part.len(),
                });
            }
        }
        Ok(Self {
            hidden: hidden.into_boxed_slice(),
            cell: cell.into_boxed_slice(),
        })
    }

    /// Hidden vector `h`.
    #[must_use]
    pub fn hidden(&self) -> &[f32] {
        &self.hidden
    }

    /// Cell vector `c`.
    #[must_use]
    pub fn cell(&self) -> &[f32] {
        &self.cell
    }
}

impl Default for RecurrentState {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Reward/termination logits produced alongside each recurrent update.
///
/// The engine forwards the signal to callers without interpreting it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuxSignal {
    logits: Vec<f32>,
}

impl AuxSignal {
    /// Wraps raw logits.
    #[must_use]
    pub fn new(logits: Vec<f32>) -> Self {
        Self { logits }
    }

    /// Raw logits as emitted by the predictor.
    #[must_use]
    pub fn logits(&self) -> &[f32] {
        &self.logits
    }
}
