use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("failed to decode audio: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("no decodable audio track in input")]
    NoTrack,

    #[error("input does not declare a sample rate")]
    UnknownSampleRate,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot render an empty signal")]
    EmptySignal,

    #[error("signal contains a non-finite sample at index {index}")]
    NonFinite { index: usize },

    #[error("raster size {width}x{height} is not drawable")]
    EmptyRaster { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("frame image error: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to start encoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("encoder exited with {status}")]
    Ffmpeg { status: ExitStatus },

    #[error("frame {step} is {got_width}x{got_height}, expected {width}x{height}")]
    SizeMismatch {
        step: u32,
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("no frames available to encode")]
    NoFrames,

    #[error("frame {0} disappeared during encoding")]
    MissingFrame(u32),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error(
        "phase boundaries must satisfy 0 <= linear_end ({linear_end}) < log_end ({log_end}) \
         <= total_steps ({total_steps})"
    )]
    Boundaries {
        linear_end: u32,
        log_end: u32,
        total_steps: u32,
    },

    #[error("base sigma must be finite and non-negative, got {0}")]
    BaseSigma(f64),

    #[error("log gain must be finite and non-negative, got {0}")]
    LogGain(f64),

    #[error("frame rate must be positive")]
    FrameRate,

    #[error("raster size must be non-zero and even, got {width}x{height}")]
    RasterSize { width: u32, height: u32 },

    #[error("invalid mel analysis settings: {0}")]
    Mel(&'static str),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("step {step} failed to render: {source}")]
    Render {
        step: u32,
        #[source]
        source: RenderError,
    },

    #[error("step {step} has an unusable noise level: {source}")]
    Noise {
        step: u32,
        #[source]
        source: rand_distr::NormalError,
    },

    #[error("step {step} could not be stored: {source}")]
    Store {
        step: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("run cancelled")]
    Cancelled,
}
