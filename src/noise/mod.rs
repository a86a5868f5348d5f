//! Three-phase noise schedule: linear warm-up, logarithmic swell, then a linear ramp.

mod synth;

pub use synth::{run_seed, step_rng, synthesize};

use crate::error::ConfigError;

pub type StepIndex = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Linear,
    Logarithmic,
    Ramp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSchedule {
    pub total_steps: StepIndex,
    pub linear_end: StepIndex,
    pub log_end: StepIndex,
    pub base_sigma: f64,
    pub log_gain: f64,
}

impl Default for NoiseSchedule {
    fn default() -> Self {
        Self {
            total_steps: 3000,
            linear_end: 750,
            log_end: 2500,
            base_sigma: 0.01,
            log_gain: 30.0,
        }
    }
}

impl NoiseSchedule {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.linear_end >= self.log_end || self.log_end > self.total_steps {
            return Err(ConfigError::Boundaries {
                linear_end: self.linear_end,
                log_end: self.log_end,
                total_steps: self.total_steps,
            });
        }
        if !self.base_sigma.is_finite() || self.base_sigma < 0.0 {
            return Err(ConfigError::BaseSigma(self.base_sigma));
        }
        if !self.log_gain.is_finite() || self.log_gain < 0.0 {
            return Err(ConfigError::LogGain(self.log_gain));
        }
        Ok(())
    }

    /// Every step of the run, `0..=total_steps`.
    pub fn steps(&self) -> std::ops::RangeInclusive<StepIndex> {
        0..=self.total_steps
    }

    pub fn frame_count(&self) -> usize {
        self.total_steps as usize + 1
    }

    /// A shared boundary belongs to the lower phase.
    pub fn phase(&self, step: StepIndex) -> Phase {
        if step <= self.linear_end {
            Phase::Linear
        } else if step <= self.log_end {
            Phase::Logarithmic
        } else {
            Phase::Ramp
        }
    }

    /// Standard deviation of the noise added at `step`.
    ///
    /// `step` must lie in `0..=total_steps`; anything larger is a caller bug and is
    /// clamped in release builds.
    pub fn sigma(&self, step: StepIndex) -> f64 {
        debug_assert!(
            step <= self.total_steps,
            "step {step} beyond total_steps {}",
            self.total_steps
        );
        let step = step.min(self.total_steps);

        match self.phase(step) {
            Phase::Linear => {
                if self.linear_end == 0 {
                    return 0.0;
                }
                self.base_sigma * (step as f64 / self.linear_end as f64)
            }
            Phase::Logarithmic => {
                let start = self.linear_end + 1;
                let t = (step - start) as f64;
                let span = (self.log_end - start) as f64;
                if span == 0.0 {
                    return self.base_sigma * self.log_gain;
                }
                self.base_sigma * self.log_gain * t.ln_1p() / span.ln_1p()
            }
            Phase::Ramp => {
                let start = self.log_end + 1;
                let t = (step - start) as f64;
                let span = (self.total_steps - start) as f64;
                if span == 0.0 {
                    return 2.0 * self.base_sigma;
                }
                self.base_sigma * (1.0 + t / span)
            }
        }
    }
}
