use serde::Deserialize;

use crate::schedule::{ScheduleError, SigmaSchedule};

/// Seed used when a configuration does not name one.
pub const DEFAULT_NOISE_SEED: u64 = 0x5eed_d1ff_0000_0001;

/// Tuning surface of the diffusion sampler.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    /// Number of integration steps `N`; the schedule holds `N + 1` levels.
    pub num_steps: usize,
    /// Smallest non-zero noise level visited.
    pub sigma_min: f32,
    /// Noise level of the first step.
    pub sigma_max: f32,
    /// Curvature exponent of the Karras schedule; larger values spend more
    /// steps at low noise.
    pub rho: f32,
    /// Integration order.
    pub order: Order,
    /// Stochastic churn; the defaults disable it.
    pub churn: ChurnConfig,
    /// Scale of the noise added to the newest context frame to seed the
    /// trajectory.
    pub init_noise_scale: f32,
    /// Distribution that injected noise is drawn from.
    pub noise: NoiseDistribution,
    /// Seed of the sampler's noise stream.
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_steps: 3,
            sigma_min: 2e-3,
            sigma_max: 5.0,
            rho: 7.0,
            order: Order::Euler,
            churn: ChurnConfig::default(),
            init_noise_scale: 0.05,
            noise: NoiseDistribution::Uniform,
            seed: DEFAULT_NOISE_SEED,
        }
    }
}

impl SamplerConfig {
    /// Builds the noise schedule described by this configuration.
    pub fn schedule(&self) -> Result<SigmaSchedule, ScheduleError> {
        SigmaSchedule::karras(self.num_steps, self.sigma_min, self.sigma_max, self.rho)
    }
}

/// ODE integration order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// First order; one denoiser call per step.
    #[default]
    Euler,
    /// Second order predictor/corrector; two calls per step except the
    /// terminal one.
    Heun,
}

/// Stochastic churn parameters.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChurnConfig {
    /// Total churn budget spread across the schedule; zero disables churn.
    pub s_churn: f32,
    /// Lowest noise level at which churn applies.
    pub s_tmin: f32,
    /// Highest noise level at which churn applies.
    pub s_tmax: f32,
    /// Scale applied to injected churn noise.
    pub s_noise: f32,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            s_churn: 0.0,
            s_tmin: 0.0,
            s_tmax: f32::INFINITY,
            s_noise: 1.0,
        }
    }
}

impl ChurnConfig {
    /// Churn factor `gamma` for a step starting at `sigma` in an `steps`-step
    /// schedule.
    #[must_use]
    pub fn gamma(&self, sigma: f32, steps: usize) -> f32 {
        if self.s_churn <= 0.0 || steps == 0 {
            return 0.0;
        }
        if sigma < self.s_tmin || sigma > self.s_tmax {
            return 0.0;
        }
        (self.s_churn / steps as f32).min(std::f32::consts::SQRT_2 - 1.0)
    }
}

/// Distribution that injected noise is drawn from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseDistribution {
    /// Uniform on `[-1, 1)`.
    #[default]
    Uniform,
    /// Standard normal.
    Gaussian,
}
