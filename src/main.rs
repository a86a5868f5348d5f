use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

mod audio;
mod config;
mod error;
mod init;
mod noise;
mod pipeline;
mod render;
mod store;
mod video;

use config::{RenderErrorPolicy, RunConfig};
use noise::NoiseSchedule;
use pipeline::{run, CancelToken};
use render::{MelConfig, RasterSize};

/// Renders a recording's mel spectrogram under steadily growing noise into a
/// forward "diffusion" video and its reversal.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the audio file; prompted for when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Last step index; frames are rendered for 0..=total_steps
    #[arg(long, default_value_t = 3000)]
    total_steps: u32,

    /// Last step of the linear phase
    #[arg(long, default_value_t = 750)]
    linear_end: u32,

    /// Last step of the logarithmic phase
    #[arg(long, default_value_t = 2500)]
    log_end: u32,

    /// Noise standard deviation reached at the end of the linear phase
    #[arg(long, default_value_t = 0.01)]
    base_sigma: f64,

    /// Peak of the logarithmic phase, as a multiple of base sigma
    #[arg(long, default_value_t = 30.0)]
    log_gain: f64,

    /// Output video frame rate
    #[arg(long, default_value_t = 25)]
    frame_rate: u32,

    /// Seed for the noise; a random one is chosen and logged when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Resample the input to this rate before analysis (0 keeps the native rate)
    #[arg(long, default_value_t = 22_050)]
    sample_rate: u32,

    /// FFT window size
    #[arg(long, default_value_t = 2048)]
    n_fft: usize,

    /// Samples between successive analysis windows
    #[arg(long, default_value_t = 512)]
    hop_length: usize,

    /// Number of mel bands
    #[arg(long, default_value_t = 128)]
    n_mels: usize,

    /// Frame width in pixels (even)
    #[arg(long, default_value_t = 1000)]
    width: u32,

    /// Frame height in pixels (even)
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Worker threads for frame generation (0 = one per core)
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,

    /// What to do when a frame fails to render
    #[arg(long, value_enum, default_value_t = RenderErrorPolicy::Abort)]
    on_render_error: RenderErrorPolicy,

    /// Reuse frames already present in the frame directory
    #[arg(long)]
    resume: bool,

    /// Delete the frame directory once both videos are written
    #[arg(long)]
    clean_frames: bool,

    /// ffmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: String,

    /// Video codec passed to ffmpeg
    #[arg(long, default_value = "libx264")]
    codec: String,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            schedule: NoiseSchedule {
                total_steps: self.total_steps,
                linear_end: self.linear_end,
                log_end: self.log_end,
                base_sigma: self.base_sigma,
                log_gain: self.log_gain,
            },
            mel: MelConfig {
                n_fft: self.n_fft,
                hop_length: self.hop_length,
                n_mels: self.n_mels,
            },
            raster: RasterSize {
                width: self.width,
                height: self.height,
            },
            sample_rate: self.sample_rate,
            frame_rate: self.frame_rate,
            seed: self.seed,
            jobs: self.jobs,
            on_render_error: self.on_render_error,
            resume: self.resume,
            clean_frames: self.clean_frames,
            ffmpeg: self.ffmpeg.clone(),
            codec: self.codec.clone(),
        }
    }
}

fn prompt_for_input() -> Result<PathBuf> {
    print!("Path to the audio file: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim().trim_matches(|c| c == '"' || c == '\'');
    if trimmed.is_empty() {
        bail!("no input file given");
    }
    Ok(PathBuf::from(trimmed))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli.run_config();
    config.validate().context("invalid configuration")?;

    let input = match &cli.input {
        Some(path) => path.clone(),
        None => prompt_for_input()?,
    };

    let summary = run(&input, &config, &CancelToken::default())
        .with_context(|| format!("failed to render {}", input.display()))?;

    info!("Forward video: {}", summary.video.forward.display());
    info!("Reverse video: {}", summary.video.reverse.display());
    info!("Rendered with seed {}", summary.generation.seed);
    for (step, reason) in &summary.generation.skipped {
        warn!("Step {} was skipped: {}", step, reason);
    }
    if !summary.gaps.is_empty() {
        info!("{} steps had no frame and were left out", summary.gaps.len());
    }

    Ok(())
}
