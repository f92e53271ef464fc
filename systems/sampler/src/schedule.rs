use thiserror::Error;

/// Reasons a noise schedule cannot be built.
#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum ScheduleError {
    /// At least one integration step is required.
    #[error("noise schedule needs at least one step")]
    ZeroSteps,
    /// Sigma bounds must be finite with `0 < sigma_min < sigma_max`.
    #[error("sigma range [{sigma_min}, {sigma_max}] is invalid")]
    InvalidSigmaRange {
        /// Requested lower noise level.
        sigma_min: f32,
        /// Requested upper noise level.
        sigma_max: f32,
    },
    /// The curvature exponent must be finite and positive.
    #[error("rho {0} must be finite and positive")]
    InvalidRho(f32),
}

/// Decreasing sequence of noise levels visited by the sampler, ending in zero.
#[derive(Clone, Debug, PartialEq)]
pub struct SigmaSchedule {
    sigmas: Vec<f32>,
}

impl SigmaSchedule {
    /// Builds the Karras schedule with `num_steps + 1` entries.
    ///
    /// Entry `i < num_steps` interpolates linearly between `sigma_max^(1/rho)`
    /// and `sigma_min^(1/rho)` before raising back to `rho`; the final entry is
    /// exactly zero. Powers are evaluated in `f64` and stored as `f32`.
    pub fn karras(
        num_steps: usize,
        sigma_min: f32,
        sigma_max: f32,
        rho: f32,
    ) -> Result<Self, ScheduleError> {
        if num_steps == 0 {
            return Err(ScheduleError::ZeroSteps);
        }
        let range_valid = sigma_min.is_finite()
            && sigma_max.is_finite()
            && sigma_min > 0.0
            && sigma_min < sigma_max;
        if !range_valid {
            return Err(ScheduleError::InvalidSigmaRange {
                sigma_min,
                sigma_max,
            });
        }
        if !rho.is_finite() || rho <= 0.0 {
            return Err(ScheduleError::InvalidRho(rho));
        }

        let rho = f64::from(rho);
        let min_inv = f64::from(sigma_min).powf(1.0 / rho);
        let max_inv = f64::from(sigma_max).powf(1.0 / rho);
        let last = (num_steps - 1) as f64;

        let mut sigmas = Vec::with_capacity(num_steps + 1);
        for index in 0..num_steps {
            // A single step has no ramp; it starts at sigma_max.
            let ramp = if num_steps == 1 {
                0.0
            } else {
                index as f64 / last
            };
            sigmas.push((max_inv + ramp * (min_inv - max_inv)).powf(rho) as f32);
        }
        sigmas.push(0.0);

        Ok(Self { sigmas })
    }

    /// All noise levels, including the terminal zero.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.sigmas
    }

    /// Number of integration steps, one fewer than the number of levels.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.sigmas.len() - 1
    }

    /// Adjacent `(sigma_i, sigma_{i+1})` pairs in integration order.
    pub fn transitions(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        self.sigmas.windows(2).map(|pair| (pair[0], pair[1]))
    }
}
