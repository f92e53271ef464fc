//! Model-free capabilities used when no neural backend is configured.
//!
//! Both are deterministic functions of their inputs, which makes headless
//! runs reproducible bit for bit.

use dreamflap_core::{
    Action, AuxSignal, CapabilityError, DenoiseRequest, Denoiser, Frame, RecurrentOutput,
    RecurrentPredictor, RecurrentState, TransitionRequest, CHANNELS, CONTEXT_LEN, FRAME_HEIGHT,
    FRAME_LEN, FRAME_WIDTH,
};
use serde::Deserialize;

/// Tuning of the reference capabilities.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ReferenceConfig {
    /// Columns the scene scrolls left per step.
    pub(crate) scroll_columns: usize,
    /// Rows the scene sinks per idle step.
    pub(crate) gravity_rows: usize,
    /// Rows the scene rises on a flap step.
    pub(crate) flap_rows: usize,
    /// Fraction of the recurrent state retained per step.
    pub(crate) leak: f32,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            scroll_columns: 1,
            gravity_rows: 1,
            flap_rows: 3,
            leak: 0.9,
        }
    }
}

/// Predicts the newest history frame scrolled left and shifted vertically
/// by the newest action, ignoring the noisy estimate.
#[derive(Clone, Debug)]
pub(crate) struct ScrollingDenoiser {
    scroll_columns: usize,
    gravity_rows: usize,
    flap_rows: usize,
}

impl ScrollingDenoiser {
    pub(crate) fn new(config: &ReferenceConfig) -> Self {
        Self {
            scroll_columns: config.scroll_columns % FRAME_WIDTH,
            gravity_rows: config.gravity_rows.min(FRAME_HEIGHT - 1),
            flap_rows: config.flap_rows.min(FRAME_HEIGHT - 1),
        }
    }

    fn source_row(&self, row: usize, action: Action) -> usize {
        match action {
            // Content rises: row y shows what was below it.
            Action::Flap => (row + self.flap_rows).min(FRAME_HEIGHT - 1),
            Action::Noop => row.saturating_sub(self.gravity_rows),
        }
    }
}

impl Denoiser for ScrollingDenoiser {
    async fn denoise(&self, request: DenoiseRequest<'_>) -> Result<Frame, CapabilityError> {
        let expected = CONTEXT_LEN * FRAME_LEN;
        if request.history_frames.len() != expected {
            return Err(CapabilityError::MalformedOutput {
                capability: "denoiser",
                expected,
                actual: request.history_frames.len(),
            });
        }
        let newest = &request.history_frames[(CONTEXT_LEN - 1) * FRAME_LEN..];
        let action = request
            .history_actions
            .last()
            .copied()
            .unwrap_or_default();

        let mut values = vec![0.0; FRAME_LEN];
        for channel in 0..CHANNELS {
            let plane = channel * FRAME_HEIGHT * FRAME_WIDTH;
            for row in 0..FRAME_HEIGHT {
                let source_row = self.source_row(row, action);
                for column in 0..FRAME_WIDTH {
                    let source_column = (column + self.scroll_columns) % FRAME_WIDTH;
                    values[plane + row * FRAME_WIDTH + column] =
                        newest[plane + source_row * FRAME_WIDTH + source_column];
                }
            }
        }

        Frame::from_vec(values).map_err(|error| CapabilityError::MalformedOutput {
            capability: "denoiser",
            expected: error.expected,
            actual: error.actual,
        })
    }
}

/// Leaky integrator standing in for the reward/termination model.
#[derive(Clone, Debug)]
pub(crate) struct LeakyPredictor {
    leak: f32,
}

impl LeakyPredictor {
    pub(crate) fn new(config: &ReferenceConfig) -> Self {
        Self {
            leak: config.leak.clamp(0.0, 1.0),
        }
    }
}

impl RecurrentPredictor for LeakyPredictor {
    async fn predict(
        &self,
        request: TransitionRequest<'_>,
    ) -> Result<RecurrentOutput, CapabilityError> {
        let before = mean(request.obs);
        let after = mean(request.next_obs);
        let blend = 1.0 - self.leak;

        let hidden = request
            .state
            .hidden()
            .iter()
            .map(|value| self.leak * value + blend * after)
            .collect();
        let cell = request
            .state
            .cell()
            .iter()
            .map(|value| self.leak * value + blend * (after - before))
            .collect();
        let state = RecurrentState::from_parts(hidden, cell).map_err(|error| {
            CapabilityError::MalformedOutput {
                capability: "recurrent predictor",
                expected: error.expected,
                actual: error.actual,
            }
        })?;

        Ok(RecurrentOutput {
            state,
            signal: AuxSignal::new(vec![after - before, after.abs()]),
        })
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}
