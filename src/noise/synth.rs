use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};

use super::StepIndex;

/// Adds zero-mean Gaussian noise with standard deviation `sigma` to every sample.
///
/// A validated schedule only yields finite sigmas; a non-finite one is reported
/// rather than silently rendered noise-free.
pub fn synthesize<R: Rng + ?Sized>(
    base: &[f32],
    sigma: f64,
    rng: &mut R,
) -> Result<Vec<f32>, NormalError> {
    if sigma == 0.0 {
        return Ok(base.to_vec());
    }
    let normal = Normal::new(0.0f64, sigma)?;
    Ok(base
        .iter()
        .map(|&s| (s as f64 + normal.sample(rng)) as f32)
        .collect())
}

/// Seed for the whole run: the configured one, or fresh entropy.
pub fn run_seed(configured: Option<u64>) -> u64 {
    configured.unwrap_or_else(|| rand::thread_rng().gen())
}

/// Independent random stream for one step, so frames never depend on the order
/// in which workers pick up steps.
pub fn step_rng(seed: u64, step: StepIndex) -> StdRng {
    StdRng::seed_from_u64(splitmix64(seed ^ splitmix64(step as u64)))
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
