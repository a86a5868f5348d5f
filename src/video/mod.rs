//! Frame ordering and forward/reverse video encoding.

mod ffmpeg;

pub use ffmpeg::FfmpegFactory;

use image::RgbImage;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EncodeError;
use crate::noise::StepIndex;
use crate::render::RasterSize;
use crate::store::{recording_name, sibling, FrameStore};

pub const VIDEO_EXTENSION: &str = "mp4";

pub trait VideoSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), EncodeError>;

    /// Flushes and closes the stream. Dropping a sink without calling this
    /// abandons the output.
    fn finish(self) -> Result<(), EncodeError>;
}

pub trait SinkFactory {
    type Sink: VideoSink;

    fn open(&self, path: &Path, size: RasterSize, fps: u32) -> Result<Self::Sink, EncodeError>;
}

/// Steps present in the store, ascending. Absent steps are skipped, never filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    steps: Vec<StepIndex>,
    gaps: Vec<StepIndex>,
}

impl FrameSequence {
    pub fn scan(store: &dyn FrameStore, total_steps: StepIndex) -> Self {
        let mut steps = Vec::with_capacity(total_steps as usize + 1);
        let mut gaps = Vec::new();
        for step in 0..=total_steps {
            if store.contains(step) {
                steps.push(step);
            } else {
                warn!("Skipping missing frame {}", step);
                gaps.push(step);
            }
        }
        Self { steps, gaps }
    }

    pub fn gaps(&self) -> &[StepIndex] {
        &self.gaps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn forward(&self) -> impl Iterator<Item = StepIndex> + '_ {
        self.steps.iter().copied()
    }

    pub fn reverse(&self) -> impl Iterator<Item = StepIndex> + '_ {
        self.steps.iter().rev().copied()
    }
}

/// Forward and reverse output files. They are always distinct, so the forward
/// video survives the reverse encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPaths {
    pub forward: PathBuf,
    pub reverse: PathBuf,
}

impl VideoPaths {
    pub fn for_input(input: &Path) -> Self {
        let name = recording_name(input);
        Self {
            forward: sibling(input, &format!("{}_output.{}", name, VIDEO_EXTENSION)),
            reverse: sibling(input, &format!("{}_output_reverse.{}", name, VIDEO_EXTENSION)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOutput {
    pub forward: PathBuf,
    pub reverse: PathBuf,
    pub frames: usize,
}

/// Writes the sequence in step order, then in reverse, to two separate files.
pub fn assemble<F: SinkFactory>(
    store: &dyn FrameStore,
    sequence: &FrameSequence,
    paths: &VideoPaths,
    factory: &F,
    fps: u32,
) -> Result<VideoOutput, EncodeError> {
    if sequence.is_empty() {
        return Err(EncodeError::NoFrames);
    }

    info!("Writing forward video {} ({} frames)", paths.forward.display(), sequence.len());
    encode(store, sequence.forward(), &paths.forward, factory, fps)?;

    info!("Writing reverse video {}", paths.reverse.display());
    encode(store, sequence.reverse(), &paths.reverse, factory, fps)?;

    Ok(VideoOutput {
        forward: paths.forward.clone(),
        reverse: paths.reverse.clone(),
        frames: sequence.len(),
    })
}

/// Encodes into a `.partial` sibling and renames it into place only on success.
fn encode<F: SinkFactory>(
    store: &dyn FrameStore,
    steps: impl Iterator<Item = StepIndex>,
    path: &Path,
    factory: &F,
    fps: u32,
) -> Result<(), EncodeError> {
    let partial = partial_path(path);
    let result = encode_into(store, steps, &partial, factory, fps);
    match result {
        Ok(()) => {
            fs::rename(&partial, path)?;
            Ok(())
        }
        Err(e) => {
            if partial.exists() {
                if let Err(rm) = fs::remove_file(&partial) {
                    warn!("Could not remove incomplete video {}: {}", partial.display(), rm);
                }
            }
            Err(e)
        }
    }
}

fn encode_into<F: SinkFactory>(
    store: &dyn FrameStore,
    mut steps: impl Iterator<Item = StepIndex>,
    path: &Path,
    factory: &F,
    fps: u32,
) -> Result<(), EncodeError> {
    let first_step = steps.next().ok_or(EncodeError::NoFrames)?;
    let first = store.load(first_step)?.ok_or(EncodeError::MissingFrame(first_step))?;
    let (width, height) = first.dimensions();

    let mut sink = factory.open(path, RasterSize { width, height }, fps)?;
    sink.write_frame(&first)?;
    drop(first);

    for step in steps {
        let frame = store.load(step)?.ok_or(EncodeError::MissingFrame(step))?;
        let (got_width, got_height) = frame.dimensions();
        if (got_width, got_height) != (width, height) {
            return Err(EncodeError::SizeMismatch { step, width, height, got_width, got_height });
        }
        sink.write_frame(&frame)?;
    }

    sink.finish()
}

fn partial_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!("{}.partial", stem),
    };
    path.with_file_name(file_name)
}
