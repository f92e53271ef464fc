//! Asynchronous contracts for the neural inference backends.
//!
//! The engine never constructs a backend itself. Hosts initialise their
//! inference runtime once and hand the resulting handles to the sampler and
//! the environment, which keeps tests free to substitute deterministic mocks.
//! Every request runs at batch size one.

use std::future::Future;

use thiserror::Error;

use crate::{Action, AuxSignal, Frame, RecurrentState};

/// Failures reported by an inference capability.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The backend has not finished loading or has been torn down.
    #[error("{capability} capability is not available")]
    Unavailable {
        /// Name of the capability that was invoked.
        capability: &'static str,
    },
    /// The backend answered with a tensor of the wrong size.
    #[error("{capability} returned {actual} values, expected {expected}")]
    MalformedOutput {
        /// Name of the capability that was invoked.
        capability: &'static str,
        /// Number of values the contract requires.
        expected: usize,
        /// Number of values that were returned.
        actual: usize,
    },
    /// Any other backend failure, forwarded verbatim.
    #[error("{capability} failed: {message}")]
    Backend {
        /// Name of the capability that was invoked.
        capability: &'static str,
        /// Backend supplied description of the failure.
        message: String,
    },
}

/// Inputs for a single denoiser evaluation.
#[derive(Clone, Copy, Debug)]
pub struct DenoiseRequest<'a> {
    /// Noisy estimate of the next frame, `[C, H, W]`.
    pub noisy: &'a [f32],
    /// Noise level the estimate is assumed to carry.
    pub sigma: f32,
    /// Conditioning frames stacked oldest-first, `[T * C, H, W]`.
    pub history_frames: &'a [f32],
    /// Conditioning actions, oldest-first, `[T]`.
    pub history_actions: &'a [Action],
}

/// Predicts the clean next frame from a noisy estimate and its history.
pub trait Denoiser {
    /// Returns the denoised `[C, H, W]` frame for the request.
    fn denoise(
        &self,
        request: DenoiseRequest<'_>,
    ) -> impl Future<Output = Result<Frame, CapabilityError>>;
}

impl<T: Denoiser + ?Sized> Denoiser for &T {
    fn denoise(
        &self,
        request: DenoiseRequest<'_>,
    ) -> impl Future<Output = Result<Frame, CapabilityError>> {
        (**self).denoise(request)
    }
}

/// Inputs for a single recurrent reward/termination update.
#[derive(Clone, Copy, Debug)]
pub struct TransitionRequest<'a> {
    /// Frame the transition starts from, `[1, 1, C, H, W]`.
    pub obs: &'a [f32],
    /// Action attributed to the transition, `[1, 1]`.
    pub action: Action,
    /// Frame the transition ends in, `[1, 1, C, H, W]`.
    pub next_obs: &'a [f32],
    /// Hidden and cell state before the transition, `[1, 1, D]` each.
    pub state: &'a RecurrentState,
}

/// Result of a recurrent update.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentOutput {
    /// Hidden and cell state after the transition.
    pub state: RecurrentState,
    /// Reward/termination logits; not consumed by the engine.
    pub signal: AuxSignal,
}

/// Recurrent reward/termination model carrying hidden state across steps.
pub trait RecurrentPredictor {
    /// Advances the recurrent state across one transition.
    fn predict(
        &self,
        request: TransitionRequest<'_>,
    ) -> impl Future<Output = Result<RecurrentOutput, CapabilityError>>;
}

impl<T: RecurrentPredictor + ?Sized> RecurrentPredictor for &T {
    fn predict(
        &self,
        request: TransitionRequest<'_>,
    ) -> impl Future<Output = Result<RecurrentOutput, CapabilityError>> {
        (**self).predict(request)
    }
}
