use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::config::NoiseDistribution;

/// Seeded stream of perturbations applied to sampler trajectories.
#[derive(Clone, Debug)]
pub(crate) struct NoiseSource {
    rng: ChaCha8Rng,
    distribution: NoiseDistribution,
}

impl NoiseSource {
    pub(crate) fn new(seed: u64, distribution: NoiseDistribution) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            distribution,
        }
    }

    pub(crate) fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// Adds independent noise scaled by `scale` to every value.
    pub(crate) fn perturb(&mut self, values: &mut [f32], scale: f32) {
        match self.distribution {
            NoiseDistribution::Uniform => {
                for value in values {
                    *value += self.rng.gen_range(-1.0f32..1.0) * scale;
                }
            }
            NoiseDistribution::Gaussian => {
                for value in values {
                    let draw: f32 = self.rng.sample(StandardNormal);
                    *value += draw * scale;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_noise_stays_within_scale() {
        let mut source = NoiseSource::new(7, NoiseDistribution::Uniform);
        let mut values = vec![0.0f32; 1024];
        source.perturb(&mut values, 0.05);

        assert!(values.iter().all(|value| value.abs() <= 0.05));
        assert!(values.iter().any(|value| *value != 0.0));
    }

    #[test]
    fn reseeding_restarts_the_stream() {
        let mut source = NoiseSource::new(11, NoiseDistribution::Gaussian);
        let mut first = vec![0.0f32; 64];
        source.perturb(&mut first, 1.0);

        source.reseed(11);
        let mut second = vec![0.0f32; 64];
        source.perturb(&mut second, 1.0);

        assert_eq!(first, second);
    }
}
