#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative world-model environment for dreamflap.
//!
//! [`WorldModelEnv`] owns the rolling frame/action context and the recurrent
//! reward/termination state. Each [`WorldModelEnv::step`] conditions the
//! diffusion sampler on a copy of the context, feeds the resulting transition
//! to the recurrent predictor and only then commits: the recurrent state is
//! replaced, the consumed input is recorded and the buffers roll by one
//! frame, and the sampler adopts the noise it consumed. Every await happens
//! before the commit, so a failed or abandoned step leaves the environment,
//! noise stream included, exactly as it was.
//!
//! Steps must be serialised by the caller; `step` takes `&mut self`, so the
//! borrow checker enforces that only one is in flight.

mod buffer;
mod context;
mod latch;
mod recurrent;
mod snapshot;

use std::sync::Arc;

use dreamflap_core::{
    Action, AuxSignal, CapabilityError, Denoiser, Frame, FrameView, RecurrentPredictor,
    RecurrentState, CHANNELS, CONTEXT_LEN, FRAME_HEIGHT, FRAME_WIDTH,
};
use dreamflap_system_sampler::{
    DiffusionSampler, SampleContext, SampleError, SamplerConfig, ScheduleError,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use buffer::RollingBuffer;
pub use context::TemporalContext;
pub use latch::FlapLatch;
pub use recurrent::{RecurrentActionPolicy, RecurrentStateTracker};
pub use snapshot::{
    FallbackReason, InitSnapshot, JsonFile, NoSnapshot, ResetOutcome, SnapshotError,
    SnapshotSource,
};

const EPISODE_SEED_LABEL: &str = "dreamflap/episode-noise";

/// Configuration of a [`WorldModelEnv`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvConfig {
    /// Diffusion sampler tuning.
    pub sampler: SamplerConfig,
    /// Action reported to the recurrent predictor.
    pub recurrent_action: RecurrentActionPolicy,
}

/// Lifecycle phase of the environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvPhase {
    /// Constructed but never reset; stepping is refused.
    Uninitialized,
    /// Holds a full context and can be stepped.
    Ready,
}

/// Summary of a completed step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepReport {
    /// One-based index of the step within the current episode.
    pub step: u64,
    /// Input consumed by the step.
    pub action: Action,
    /// Reward/termination logits returned by the recurrent predictor.
    pub signal: AuxSignal,
    /// Denoiser invocations spent generating the frame.
    pub denoiser_calls: usize,
}

/// Failures that abort a step. A failed step commits nothing.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum StepError {
    /// `step` was called before the first `reset`.
    #[error("environment has not been reset")]
    NotReady,
    /// Generating the next frame failed.
    #[error(transparent)]
    Sample(#[from] SampleError),
    /// The recurrent predictor failed.
    #[error(transparent)]
    Recurrent(#[from] CapabilityError),
}

/// World-model environment driving frame-by-frame generation.
#[derive(Debug)]
pub struct WorldModelEnv<D, P> {
    phase: EnvPhase,
    sampler: DiffusionSampler,
    denoiser: D,
    predictor: P,
    context: TemporalContext,
    recurrent: RecurrentStateTracker,
    latch: FlapLatch,
    base_seed: u64,
    episode: u64,
    step_index: u64,
}

impl<D: Denoiser, P: RecurrentPredictor> WorldModelEnv<D, P> {
    /// Creates an uninitialised environment around injected capabilities.
    pub fn new(config: EnvConfig, denoiser: D, predictor: P) -> Result<Self, ScheduleError> {
        let base_seed = config.sampler.seed;
        let sampler = DiffusionSampler::new(config.sampler)?;
        Ok(Self {
            phase: EnvPhase::Uninitialized,
            sampler,
            denoiser,
            predictor,
            context: TemporalContext::zeroed(),
            recurrent: RecurrentStateTracker::new(config.recurrent_action),
            latch: FlapLatch::default(),
            base_seed,
            episode: 0,
            step_index: 0,
        })
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> EnvPhase {
        self.phase
    }

    /// Adopts the snapshot offered by `source`, or zero state when it is
    /// missing, unreadable or shaped differently. Never fails.
    pub fn reset(&mut self, source: &impl SnapshotSource) -> ResetOutcome {
        let outcome = match snapshot::restore_from(source) {
            Ok(restored) => {
                self.context = restored.context;
                self.recurrent.commit(restored.recurrent);
                ResetOutcome::Restored
            }
            Err(reason) => {
                if reason == FallbackReason::Absent {
                    debug!("no snapshot offered, starting from zeroed context");
                } else {
                    warn!(%reason, "snapshot rejected, starting from zeroed context");
                }
                self.context = TemporalContext::zeroed();
                self.recurrent.commit(RecurrentState::zeroed());
                ResetOutcome::ZeroFilled(reason)
            }
        };

        self.latch = FlapLatch::default();
        self.step_index = 0;
        self.sampler
            .reseed(derive_episode_seed(self.base_seed, self.episode));
        info!(
            episode = self.episode,
            restored = outcome.is_restored(),
            "environment reset"
        );
        self.episode += 1;
        self.phase = EnvPhase::Ready;
        outcome
    }

    /// Latches a flap for the next step.
    pub fn input_flap(&mut self) {
        self.latch.register();
    }

    /// Action the next step will consume.
    #[must_use]
    pub fn pending_action(&self) -> Action {
        self.latch.peek()
    }

    /// Borrowed `[C, H, W]` view of the newest frame.
    #[must_use]
    pub fn current_obs(&self) -> FrameView<'_> {
        self.context.newest_frame().view()
    }

    /// Shared handle to the newest frame, safe to hold across later steps.
    #[must_use]
    pub fn shared_obs(&self) -> Arc<Frame> {
        Arc::clone(self.context.newest_frame())
    }

    /// Rolling frame/action window.
    #[must_use]
    pub fn context(&self) -> &TemporalContext {
        &self.context
    }

    /// Hidden/cell state carried into the next step.
    #[must_use]
    pub fn recurrent_state(&self) -> &RecurrentState {
        self.recurrent.state()
    }

    /// Steps completed since the last reset.
    #[must_use]
    pub fn steps_taken(&self) -> u64 {
        self.step_index
    }

    /// Exports the current context and recurrent state.
    ///
    /// A pending flap is not part of the snapshot.
    #[must_use]
    pub fn capture_snapshot(&self) -> InitSnapshot {
        InitSnapshot {
            context_len: CONTEXT_LEN,
            channels: CHANNELS,
            height: FRAME_HEIGHT,
            width: FRAME_WIDTH,
            obs_buffer: self.context.stacked_frames(),
            act_buffer: self.context.actions().to_vec(),
            hx: self.recurrent.state().hidden().to_vec(),
            cx: self.recurrent.state().cell().to_vec(),
        }
    }

    /// Generates the next frame and advances the environment by one step.
    pub async fn step(&mut self) -> Result<StepReport, StepError> {
        if self.phase != EnvPhase::Ready {
            return Err(StepError::NotReady);
        }

        let action = self.latch.peek();
        let (frames, actions) = self.context.conditioning(action);
        let draft = self
            .sampler
            .draft(
                &self.denoiser,
                SampleContext {
                    frames: &frames,
                    actions: &actions,
                },
            )
            .await?;

        let update = self
            .recurrent
            .predict(
                &self.predictor,
                self.context.newest_frame(),
                action,
                &draft.output().frame,
            )
            .await?;

        let sample = self.sampler.commit(draft);
        self.recurrent.commit(update.state);
        self.context.record_action(action);
        self.context.append(Arc::new(sample.frame), Action::Noop);
        let consumed = self.latch.take();
        debug_assert_eq!(consumed, action, "latch changed during step");
        self.step_index += 1;

        info!(
            step = self.step_index,
            action = action.code(),
            denoiser_calls = sample.denoiser_calls,
            "step committed"
        );

        Ok(StepReport {
            step: self.step_index,
            action,
            signal: update.signal,
            denoiser_calls: sample.denoiser_calls,
        })
    }
}

fn derive_episode_seed(base: u64, episode: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base.to_le_bytes());
    hasher.update(EPISODE_SEED_LABEL.as_bytes());
    hasher.update(episode.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
