use std::{collections::BTreeSet, fmt};

use anyhow::{Context, Result};
use dreamflap_core::{Action, Denoiser, RecurrentPredictor};
use dreamflap_world::WorldModelEnv;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Headless run: how many ticks to play and on which ticks to flap.
#[derive(Clone, Debug, Default)]
pub(crate) struct SessionPlan {
    steps: u64,
    flap_at: BTreeSet<u64>,
}

impl SessionPlan {
    /// Plays `steps` ticks, flapping before each zero-based tick in `flap_at`.
    pub(crate) fn new(steps: u64, flap_at: impl IntoIterator<Item = u64>) -> Self {
        Self {
            steps,
            flap_at: flap_at.into_iter().collect(),
        }
    }
}

/// What a finished session reports on stdout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SessionSummary {
    pub(crate) steps: u64,
    pub(crate) flaps: u64,
    pub(crate) fingerprint: String,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steps={} flaps={} fingerprint={}",
            self.steps, self.flaps, self.fingerprint
        )
    }
}

/// Drives a reset environment through the plan.
///
/// Every tick reads the observation a display would show, then steps. The
/// fingerprint hashes each observed frame followed by the final one.
pub(crate) fn run<D, P>(env: &mut WorldModelEnv<D, P>, plan: &SessionPlan) -> Result<SessionSummary>
where
    D: Denoiser,
    P: RecurrentPredictor,
{
    let mut hasher = Sha256::new();
    let mut flaps = 0;

    for tick in 0..plan.steps {
        let observed = env.shared_obs();
        for value in observed.as_slice() {
            hasher.update(value.to_le_bytes());
        }

        if plan.flap_at.contains(&tick) {
            env.input_flap();
        }
        let report = pollster::block_on(env.step())
            .with_context(|| format!("step {} failed", tick + 1))?;
        if report.action == Action::Flap {
            flaps += 1;
        }
        debug!(
            step = report.step,
            action = report.action.code(),
            logits = ?report.signal.logits(),
            "tick"
        );
    }

    for value in env.current_obs().as_slice() {
        hasher.update(value.to_le_bytes());
    }

    Ok(SessionSummary {
        steps: env.steps_taken(),
        flaps,
        fingerprint: hex(&hasher.finalize()),
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use dreamflap_world::{EnvConfig, NoSnapshot};

    use super::*;
    use crate::reference::{LeakyPredictor, ReferenceConfig, ScrollingDenoiser};

    fn play(plan: &SessionPlan) -> SessionSummary {
        let reference = ReferenceConfig::default();
        let mut env = WorldModelEnv::new(
            EnvConfig::default(),
            ScrollingDenoiser::new(&reference),
            LeakyPredictor::new(&reference),
        )
        .expect("env");
        let _ = env.reset(&NoSnapshot);
        run(&mut env, plan).expect("session")
    }

    #[test]
    fn scheduled_flaps_are_counted() {
        let summary = play(&SessionPlan::new(4, [0, 2, 9]));

        assert_eq!(summary.steps, 4);
        assert_eq!(summary.flaps, 2);
        assert_eq!(summary.fingerprint.len(), 64);
    }

    #[test]
    fn identical_plans_share_a_fingerprint() {
        let plan = SessionPlan::new(3, [1]);
        assert_eq!(play(&plan), play(&plan));
    }

    #[test]
    fn summary_line_format() {
        let summary = SessionSummary {
            steps: 3,
            flaps: 1,
            fingerprint: "ab".to_owned(),
        };
        assert_eq!(summary.to_string(), "steps=3 flaps=1 fingerprint=ab");
    }
}
