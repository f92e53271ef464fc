#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Diffusion sampler that turns a conditioning context into the next frame.
//!
//! The sampler integrates the probability-flow ODE from a lightly perturbed
//! copy of the newest context frame down to noise level zero, calling the
//! injected [`Denoiser`] once per Euler step or twice per Heun step. The
//! terminal transition always falls back to Euler so no derivative is ever
//! divided by a zero sigma. Integration is carried out in `f32` and never
//! clamps; the first non-finite value aborts the sample instead.

mod config;
mod noise;
mod schedule;

use dreamflap_core::{
    Action, CapabilityError, DenoiseRequest, Denoiser, Frame, ShapeError, CONTEXT_LEN, FRAME_LEN,
};
use thiserror::Error;
use tracing::debug;

pub use config::{ChurnConfig, NoiseDistribution, Order, SamplerConfig, DEFAULT_NOISE_SEED};
pub use schedule::{ScheduleError, SigmaSchedule};

use noise::NoiseSource;

/// Borrowed conditioning context for one sample.
#[derive(Clone, Copy, Debug)]
pub struct SampleContext<'a> {
    /// `T` frames stacked oldest-first.
    pub frames: &'a [f32],
    /// `T` actions oldest-first; the newest is the action taken at the newest
    /// frame.
    pub actions: &'a [Action],
}

impl SampleContext<'_> {
    fn validate(&self) -> Result<(), ShapeError> {
        if self.frames.len() != CONTEXT_LEN * FRAME_LEN {
            return Err(ShapeError {
                expected: CONTEXT_LEN * FRAME_LEN,
                actual: self.frames.len(),
            });
        }
        if self.actions.len() != CONTEXT_LEN {
            return Err(ShapeError {
                expected: CONTEXT_LEN,
                actual: self.actions.len(),
            });
        }
        Ok(())
    }

    fn newest_frame(&self) -> &[f32] {
        &self.frames[(CONTEXT_LEN - 1) * FRAME_LEN..]
    }
}

/// Frame produced by a sample together with bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleOutput {
    /// Newly generated frame; values are not clamped.
    pub frame: Frame,
    /// Number of denoiser invocations the sample required.
    pub denoiser_calls: usize,
}

/// Sample whose noise consumption has not been applied to the sampler yet.
///
/// Dropping a draft leaves the sampler exactly as it was before
/// [`DiffusionSampler::draft`]; [`DiffusionSampler::commit`] adopts it.
#[derive(Debug)]
pub struct SampleDraft {
    output: SampleOutput,
    noise: NoiseSource,
}

impl SampleDraft {
    /// Frame and bookkeeping the draft will yield on commit.
    #[must_use]
    pub fn output(&self) -> &SampleOutput {
        &self.output
    }
}

/// Failures raised while sampling.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum SampleError {
    /// The conditioning context does not have the compiled-in shape.
    #[error("invalid sampling context: {0}")]
    Shape(#[from] ShapeError),
    /// The denoiser failed; the sample is abandoned.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// The trajectory produced a NaN or infinity.
    #[error("trajectory diverged at step {step} (next sigma {sigma})")]
    NumericDivergence {
        /// Zero-based integration step that produced the value.
        step: usize,
        /// Noise level the step was integrating towards.
        sigma: f32,
    },
}

/// Karras-style ODE sampler with optional stochastic churn.
#[derive(Debug)]
pub struct DiffusionSampler {
    config: SamplerConfig,
    schedule: SigmaSchedule,
    noise: NoiseSource,
}

impl DiffusionSampler {
    /// Creates a sampler, building its schedule from the configuration.
    pub fn new(config: SamplerConfig) -> Result<Self, ScheduleError> {
        let schedule = config.schedule()?;
        let noise = NoiseSource::new(config.seed, config.noise);
        Ok(Self {
            config,
            schedule,
            noise,
        })
    }

    /// Configuration the sampler was built from.
    #[must_use]
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Noise levels visited by every sample.
    #[must_use]
    pub fn schedule(&self) -> &SigmaSchedule {
        &self.schedule
    }

    /// Restarts the noise stream from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.noise.reseed(seed);
    }

    /// Generates the frame that follows `context` and advances the noise
    /// stream. A failed sample leaves the stream untouched.
    pub async fn sample<D: Denoiser>(
        &mut self,
        denoiser: &D,
        context: SampleContext<'_>,
    ) -> Result<SampleOutput, SampleError> {
        let draft = self.draft(denoiser, context).await?;
        Ok(self.commit(draft))
    }

    /// Adopts the noise stream consumed by `draft` and returns its output.
    ///
    /// The draft must come from this sampler with no reseed in between.
    pub fn commit(&mut self, draft: SampleDraft) -> SampleOutput {
        self.noise = draft.noise;
        draft.output
    }

    /// Generates the frame that follows `context` on a private copy of the
    /// noise stream.
    ///
    /// The context is only read. Calls within a Heun step are issued strictly
    /// in order because the corrector evaluates the predictor's output.
    pub async fn draft<D: Denoiser>(
        &self,
        denoiser: &D,
        context: SampleContext<'_>,
    ) -> Result<SampleDraft, SampleError> {
        context.validate()?;

        let mut noise = self.noise.clone();
        let mut x = context.newest_frame().to_vec();
        noise.perturb(&mut x, self.config.init_noise_scale);

        let steps = self.schedule.steps();
        let mut denoiser_calls = 0;

        for (step, (sigma, next_sigma)) in self.schedule.transitions().enumerate() {
            let gamma = self.config.churn.gamma(sigma, steps);
            let sigma_hat = sigma * (gamma + 1.0);
            if gamma > 0.0 {
                let churn_scale =
                    self.config.churn.s_noise * (sigma_hat * sigma_hat - sigma * sigma).sqrt();
                noise.perturb(&mut x, churn_scale);
            }

            let denoised = evaluate(denoiser, &x, sigma_hat, &context).await?;
            denoiser_calls += 1;
            let derivative = slope(&x, &denoised, sigma_hat);
            let dt = next_sigma - sigma_hat;

            if self.config.order == Order::Euler || next_sigma == 0.0 {
                advance(&mut x, &derivative, dt);
            } else {
                let mut predicted = x.clone();
                advance(&mut predicted, &derivative, dt);
                let corrected = evaluate(denoiser, &predicted, next_sigma, &context).await?;
                denoiser_calls += 1;
                let predicted_derivative = slope(&predicted, &corrected, next_sigma);
                for ((value, d), d2) in x.iter_mut().zip(&derivative).zip(&predicted_derivative)
                {
                    *value += (d + d2) / 2.0 * dt;
                }
            }

            if x.iter().any(|value| !value.is_finite()) {
                return Err(SampleError::NumericDivergence {
                    step,
                    sigma: next_sigma,
                });
            }
            debug!(step, sigma_hat, next_sigma, gamma, "sampler step integrated");
        }

        Ok(SampleDraft {
            output: SampleOutput {
                frame: Frame::from_vec(x)?,
                denoiser_calls,
            },
            noise,
        })
    }
}

async fn evaluate<D: Denoiser>(
    denoiser: &D,
    noisy: &[f32],
    sigma: f32,
    context: &SampleContext<'_>,
) -> Result<Frame, CapabilityError> {
    denoiser
        .denoise(DenoiseRequest {
            noisy,
            sigma,
            history_frames: context.frames,
            history_actions: context.actions,
        })
        .await
}

fn slope(x: &[f32], denoised: &Frame, sigma: f32) -> Vec<f32> {
    x.iter()
        .zip(denoised.as_slice())
        .map(|(value, estimate)| (value - estimate) / sigma)
        .collect()
}

fn advance(x: &mut [f32], derivative: &[f32], dt: f32) {
    for (value, d) in x.iter_mut().zip(derivative) {
        *value += d * dt;
    }
}
