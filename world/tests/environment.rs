use std::cell::{Cell, RefCell};

use dreamflap_core::{
    Action, AuxSignal, CapabilityError, DenoiseRequest, Denoiser, Frame, RecurrentOutput,
    RecurrentPredictor, RecurrentState, TransitionRequest, CHANNELS, CONTEXT_LEN, FRAME_LEN,
    HIDDEN_DIM,
};
use dreamflap_world::{
    EnvConfig, EnvPhase, FallbackReason, InitSnapshot, JsonFile, NoSnapshot,
    RecurrentActionPolicy, ResetOutcome, StepError, WorldModelEnv,
};

/// Blends the noisy estimate with the newest history frame and records the
/// conditioning actions it saw.
#[derive(Default)]
struct BlendingDenoiser {
    seen_actions: RefCell<Vec<Vec<Action>>>,
}

impl Denoiser for BlendingDenoiser {
    async fn denoise(&self, request: DenoiseRequest<'_>) -> Result<Frame, CapabilityError> {
        self.seen_actions
            .borrow_mut()
            .push(request.history_actions.to_vec());
        let newest = &request.history_frames[(CONTEXT_LEN - 1) * FRAME_LEN..];
        let values = request
            .noisy
            .iter()
            .zip(newest)
            .map(|(noisy, previous)| 0.5 * noisy + 0.5 * previous + 0.1)
            .collect();
        Ok(Frame::from_vec(values).expect("frame shape"))
    }
}

/// Counts transitions in the hidden state and remembers its inputs.
#[derive(Default)]
struct CountingPredictor {
    actions: RefCell<Vec<Action>>,
    next_frames: RefCell<Vec<Vec<f32>>>,
    offline: Cell<bool>,
}

impl RecurrentPredictor for CountingPredictor {
    async fn predict(
        &self,
        request: TransitionRequest<'_>,
    ) -> Result<RecurrentOutput, CapabilityError> {
        if self.offline.get() {
            return Err(CapabilityError::Unavailable {
                capability: "recurrent predictor",
            });
        }
        self.actions.borrow_mut().push(request.action);
        self.next_frames
            .borrow_mut()
            .push(request.next_obs.to_vec());
        let hidden = request
            .state
            .hidden()
            .iter()
            .map(|value| value + 1.0)
            .collect();
        let cell = request
            .state
            .cell()
            .iter()
            .map(|value| value - 0.5)
            .collect();
        Ok(RecurrentOutput {
            state: RecurrentState::from_parts(hidden, cell).expect("state shape"),
            signal: AuxSignal::new(vec![0.1, -2.0]),
        })
    }
}

type Env<'a> = WorldModelEnv<&'a BlendingDenoiser, &'a CountingPredictor>;

fn ready_env<'a>(
    config: EnvConfig,
    denoiser: &'a BlendingDenoiser,
    predictor: &'a CountingPredictor,
) -> Env<'a> {
    let mut env = WorldModelEnv::new(config, denoiser, predictor).expect("valid config");
    let outcome = env.reset(&NoSnapshot);
    assert_eq!(outcome, ResetOutcome::ZeroFilled(FallbackReason::Absent));
    env
}

fn valid_snapshot() -> InitSnapshot {
    let mut obs_buffer = vec![0.0; CONTEXT_LEN * FRAME_LEN];
    for (frame_index, frame) in obs_buffer.chunks_mut(FRAME_LEN).enumerate() {
        frame.fill(frame_index as f32 * 0.25);
    }
    InitSnapshot {
        context_len: CONTEXT_LEN,
        channels: CHANNELS,
        height: 64,
        width: 64,
        obs_buffer,
        act_buffer: vec![Action::Noop, Action::Flap, Action::Noop, Action::Noop],
        hx: vec![0.5; HIDDEN_DIM],
        cx: vec![-0.5; HIDDEN_DIM],
    }
}

#[test]
fn stepping_before_reset_is_refused() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = WorldModelEnv::new(EnvConfig::default(), &denoiser, &predictor).expect("env");

    assert_eq!(env.phase(), EnvPhase::Uninitialized);
    assert_eq!(pollster::block_on(env.step()), Err(StepError::NotReady));
    assert_eq!(denoiser.seen_actions.borrow().len(), 0);
}

#[test]
fn flap_latch_is_consumed_by_exactly_one_step() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = ready_env(EnvConfig::default(), &denoiser, &predictor);

    env.input_flap();
    assert_eq!(env.pending_action(), Action::Flap);
    let first = pollster::block_on(env.step()).expect("first step");
    assert_eq!(first.action, Action::Flap);
    assert_eq!(env.pending_action(), Action::Noop);
    assert_eq!(
        env.context().actions(),
        &[Action::Noop, Action::Noop, Action::Flap, Action::Noop]
    );

    let second = pollster::block_on(env.step()).expect("second step");
    assert_eq!(second.action, Action::Noop);
    assert_eq!(
        env.context().actions(),
        &[Action::Noop, Action::Flap, Action::Noop, Action::Noop]
    );

    let seen = denoiser.seen_actions.borrow();
    assert_eq!(seen[0][CONTEXT_LEN - 1], Action::Flap);
    assert_eq!(seen[seen.len() - 1][CONTEXT_LEN - 1], Action::Noop);
}

#[test]
fn recurrent_predictor_receives_placeholder_action_by_default() {
    // Known deviation: the deployed pipeline always reports a no-op to the
    // reward/termination model, even on flap steps.
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = ready_env(EnvConfig::default(), &denoiser, &predictor);

    env.input_flap();
    let report = pollster::block_on(env.step()).expect("step");

    assert_eq!(report.action, Action::Flap);
    assert_eq!(*predictor.actions.borrow(), vec![Action::Noop]);
}

#[test]
fn latched_policy_forwards_real_action() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let config = EnvConfig {
        recurrent_action: RecurrentActionPolicy::Latched,
        ..EnvConfig::default()
    };
    let mut env = ready_env(config, &denoiser, &predictor);

    env.input_flap();
    let _ = pollster::block_on(env.step()).expect("flap step");
    let _ = pollster::block_on(env.step()).expect("idle step");

    assert_eq!(*predictor.actions.borrow(), vec![Action::Flap, Action::Noop]);
}

#[test]
fn five_steps_keep_context_full_and_expose_newest_frame() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = ready_env(EnvConfig::default(), &denoiser, &predictor);

    for expected_step in 1..=5u64 {
        let report = pollster::block_on(env.step()).expect("step");
        assert_eq!(report.step, expected_step);
        assert_eq!(report.denoiser_calls, 3);
        assert_eq!(report.signal.logits(), &[0.1, -2.0]);
        assert_eq!(env.context().len(), CONTEXT_LEN);
        assert_eq!(env.context().actions().len(), CONTEXT_LEN);

        let observation = env.current_obs();
        assert_eq!(observation.shape(), [3, 64, 64]);
        let appended = predictor.next_frames.borrow();
        assert_eq!(observation.as_slice(), appended[appended.len() - 1].as_slice());
    }

    assert_eq!(env.steps_taken(), 5);
    assert_eq!(env.recurrent_state().hidden()[0], 5.0);
    assert_eq!(env.recurrent_state().cell()[HIDDEN_DIM - 1], -2.5);
}

#[test]
fn mismatched_snapshot_falls_back_to_zero_state() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = ready_env(EnvConfig::default(), &denoiser, &predictor);
    let _ = pollster::block_on(env.step()).expect("dirty the state");

    let snapshot = InitSnapshot {
        channels: 1,
        ..valid_snapshot()
    };
    let outcome = env.reset(&snapshot);

    assert_eq!(
        outcome,
        ResetOutcome::ZeroFilled(FallbackReason::DimensionMismatch {
            field: "C",
            expected: 3,
            actual: 1
        })
    );
    assert_eq!(env.phase(), EnvPhase::Ready);
    assert_eq!(env.steps_taken(), 0);
    assert!(env.context().frames().all(|frame| frame.as_slice().iter().all(|v| *v == 0.0)));
    assert!(env.context().actions().iter().all(|a| *a == Action::Noop));
    assert_eq!(env.recurrent_state(), &RecurrentState::zeroed());
}

#[test]
fn unreadable_snapshot_file_still_reaches_ready() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = WorldModelEnv::new(EnvConfig::default(), &denoiser, &predictor).expect("env");

    let outcome = env.reset(&JsonFile::new("/nonexistent/dreamflap/init_state.json"));

    assert!(matches!(
        outcome,
        ResetOutcome::ZeroFilled(FallbackReason::Unreadable(_))
    ));
    assert_eq!(env.phase(), EnvPhase::Ready);
}

#[test]
fn valid_snapshot_is_restored() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = WorldModelEnv::new(EnvConfig::default(), &denoiser, &predictor).expect("env");

    let outcome = env.reset(&valid_snapshot());

    assert_eq!(outcome, ResetOutcome::Restored);
    assert!(env.current_obs().as_slice().iter().all(|v| *v == 0.75));
    assert_eq!(env.context().actions()[1], Action::Flap);
    assert_eq!(env.recurrent_state().hidden()[0], 0.5);
}

#[test]
fn captured_snapshot_resumes_identical_state() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = ready_env(EnvConfig::default(), &denoiser, &predictor);
    env.input_flap();
    for _ in 0..3 {
        let _ = pollster::block_on(env.step()).expect("step");
    }
    let captured = env.capture_snapshot();

    let mut resumed =
        WorldModelEnv::new(EnvConfig::default(), &denoiser, &predictor).expect("env");
    assert!(resumed.reset(&captured).is_restored());

    assert_eq!(resumed.context(), env.context());
    assert_eq!(resumed.recurrent_state(), env.recurrent_state());
}

#[test]
fn failed_step_commits_nothing() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = ready_env(EnvConfig::default(), &denoiser, &predictor);
    let _ = pollster::block_on(env.step()).expect("healthy step");

    let context_before = env.context().clone();
    let state_before = env.recurrent_state().clone();
    env.input_flap();
    predictor.offline.set(true);

    let error = pollster::block_on(env.step()).expect_err("predictor offline");

    assert_eq!(
        error,
        StepError::Recurrent(CapabilityError::Unavailable {
            capability: "recurrent predictor"
        })
    );
    assert_eq!(env.context(), &context_before);
    assert_eq!(env.recurrent_state(), &state_before);
    assert_eq!(env.steps_taken(), 1);
    assert_eq!(env.pending_action(), Action::Flap, "latch survives failure");

    predictor.offline.set(false);
    let retried = pollster::block_on(env.step()).expect("recovered step");
    assert_eq!(retried.action, Action::Flap);
}

#[test]
fn retried_step_matches_uninterrupted_run() {
    let denoiser = BlendingDenoiser::default();
    let steady = CountingPredictor::default();
    let mut uninterrupted = ready_env(EnvConfig::default(), &denoiser, &steady);
    let _ = pollster::block_on(uninterrupted.step()).expect("first step");
    uninterrupted.input_flap();
    let _ = pollster::block_on(uninterrupted.step()).expect("second step");

    let flaky = CountingPredictor::default();
    let mut interrupted = ready_env(EnvConfig::default(), &denoiser, &flaky);
    let _ = pollster::block_on(interrupted.step()).expect("first step");
    interrupted.input_flap();
    flaky.offline.set(true);
    let _ = pollster::block_on(interrupted.step()).expect_err("predictor offline");
    flaky.offline.set(false);
    let _ = pollster::block_on(interrupted.step()).expect("retried step");

    let expected: Vec<u32> = uninterrupted
        .current_obs()
        .as_slice()
        .iter()
        .map(|value| value.to_bits())
        .collect();
    let actual: Vec<u32> = interrupted
        .current_obs()
        .as_slice()
        .iter()
        .map(|value| value.to_bits())
        .collect();
    assert_eq!(actual, expected, "failed step consumed sampler noise");
    assert_eq!(interrupted.context(), uninterrupted.context());
    assert_eq!(interrupted.recurrent_state(), uninterrupted.recurrent_state());
}

#[test]
fn shared_observation_survives_later_rolls() {
    let denoiser = BlendingDenoiser::default();
    let predictor = CountingPredictor::default();
    let mut env = ready_env(EnvConfig::default(), &denoiser, &predictor);
    let _ = pollster::block_on(env.step()).expect("step");

    let held = env.shared_obs();
    let snapshot_of_held = held.as_slice().to_vec();
    for _ in 0..CONTEXT_LEN + 1 {
        let _ = pollster::block_on(env.step()).expect("step");
    }

    assert_eq!(held.as_slice(), snapshot_of_held.as_slice());
    assert_ne!(env.current_obs().as_slice(), snapshot_of_held.as_slice());
}
