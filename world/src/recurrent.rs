use dreamflap_core::{
    Action, CapabilityError, Frame, RecurrentOutput, RecurrentPredictor, RecurrentState,
    TransitionRequest,
};
use serde::Deserialize;

/// Which action the recurrent predictor is told about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrentActionPolicy {
    /// Always report a no-op, regardless of the latched input. This is how
    /// the deployed models were driven; switching away from it changes the
    /// reward/termination signal.
    #[default]
    Placeholder,
    /// Report the action the step actually consumed.
    Latched,
}

impl RecurrentActionPolicy {
    fn resolve(self, consumed: Action) -> Action {
        match self {
            Self::Placeholder => Action::Noop,
            Self::Latched => consumed,
        }
    }
}

/// Owns the hidden/cell pair that carries over between steps.
///
/// Prediction and commit are split so that a step can gather every result
/// before mutating anything.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentStateTracker {
    state: RecurrentState,
    policy: RecurrentActionPolicy,
}

impl RecurrentStateTracker {
    /// Creates a tracker with zeroed state.
    #[must_use]
    pub fn new(policy: RecurrentActionPolicy) -> Self {
        Self {
            state: RecurrentState::zeroed(),
            policy,
        }
    }

    /// Current hidden/cell state.
    #[must_use]
    pub fn state(&self) -> &RecurrentState {
        &self.state
    }

    /// Policy used to pick the action sent to the predictor.
    #[must_use]
    pub fn policy(&self) -> RecurrentActionPolicy {
        self.policy
    }

    /// Runs the predictor over one transition without committing the result.
    pub async fn predict<P: RecurrentPredictor>(
        &self,
        predictor: &P,
        obs: &Frame,
        consumed: Action,
        next_obs: &Frame,
    ) -> Result<RecurrentOutput, CapabilityError> {
        predictor
            .predict(TransitionRequest {
                obs: obs.as_slice(),
                action: self.policy.resolve(consumed),
                next_obs: next_obs.as_slice(),
                state: &self.state,
            })
            .await
    }

    /// Adopts the state produced by a completed step.
    pub fn commit(&mut self, state: RecurrentState) {
        self.state = state;
    }
}
