use clap::ValueEnum;

use crate::error::ConfigError;
use crate::noise::NoiseSchedule;
use crate::render::{MelConfig, RasterSize};

/// What to do when a single step fails to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RenderErrorPolicy {
    /// Stop the run; no video is written.
    #[default]
    Abort,
    /// Log the failure and leave a gap for that step.
    Skip,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub schedule: NoiseSchedule,
    pub mel: MelConfig,
    pub raster: RasterSize,
    /// Rate the decoded audio is resampled to; 0 keeps the native rate.
    pub sample_rate: u32,
    pub frame_rate: u32,
    pub seed: Option<u64>,
    /// Worker threads; 0 lets rayon pick one per core.
    pub jobs: usize,
    pub on_render_error: RenderErrorPolicy,
    pub resume: bool,
    pub clean_frames: bool,
    pub ffmpeg: String,
    pub codec: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            schedule: NoiseSchedule::default(),
            mel: MelConfig::default(),
            raster: RasterSize::default(),
            sample_rate: 22_050,
            frame_rate: 25,
            seed: None,
            jobs: 0,
            on_render_error: RenderErrorPolicy::Abort,
            resume: false,
            clean_frames: false,
            ffmpeg: "ffmpeg".to_string(),
            codec: "libx264".to_string(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule.validate()?;
        self.mel.validate()?;
        self.raster.validate()?;
        if self.frame_rate == 0 {
            return Err(ConfigError::FrameRate);
        }
        Ok(())
    }
}
