//! Step-keyed persistence for rendered frames.

use image::{ImageFormat, RgbImage};
use log::info;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::noise::StepIndex;

/// Width of the zero-padded step index in frame names.
pub const STEP_DIGITS: usize = 5;

/// Durable frame storage keyed by step. A frame that was never saved, or was
/// removed since, loads as `Ok(None)`.
pub trait FrameStore: Sync {
    fn save(&self, step: StepIndex, image: &RgbImage) -> Result<(), StoreError>;
    fn load(&self, step: StepIndex) -> Result<Option<RgbImage>, StoreError>;
    fn contains(&self, step: StepIndex) -> bool;
    /// Drops the frame for `step`; removing an absent frame is not an error.
    fn remove(&self, step: StepIndex) -> Result<(), StoreError>;
}

/// One PNG per step in a directory: `mel_<name>_<step>.png`.
#[derive(Debug, Clone)]
pub struct DirFrameStore {
    dir: PathBuf,
    name: String,
}

impl DirFrameStore {
    /// Opens (creating if needed) the frame directory for recording `name`.
    pub fn open(dir: impl Into<PathBuf>, name: impl Into<String>) -> std::io::Result<Self> {
        let dir = dir.into();
        if dir.is_dir() {
            info!("Frame directory {} already exists", dir.display());
        } else {
            fs::create_dir_all(&dir)?;
            info!("Created frame directory {}", dir.display());
        }
        Ok(Self { dir, name: name.into() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_path(&self, step: StepIndex) -> PathBuf {
        self.dir.join(frame_file_name(&self.name, step))
    }

    /// Deletes the directory and every frame in it.
    pub fn remove_all(self) -> std::io::Result<()> {
        fs::remove_dir_all(&self.dir)
    }
}

impl FrameStore for DirFrameStore {
    fn save(&self, step: StepIndex, image: &RgbImage) -> Result<(), StoreError> {
        let path = self.frame_path(step);
        let tmp = path.with_extension("png.tmp");
        image.save_with_format(&tmp, ImageFormat::Png)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, step: StepIndex) -> Result<Option<RgbImage>, StoreError> {
        let bytes = match fs::read(self.frame_path(step)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png)?;
        Ok(Some(image.into_rgb8()))
    }

    fn contains(&self, step: StepIndex) -> bool {
        self.frame_path(step).is_file()
    }

    fn remove(&self, step: StepIndex) -> Result<(), StoreError> {
        match fs::remove_file(self.frame_path(step)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

pub fn frame_file_name(name: &str, step: StepIndex) -> String {
    format!("mel_{}_{:0width$}.png", name, step, width = STEP_DIGITS)
}

/// Base name of a recording: its file name without extension.
pub fn recording_name(input: &Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string())
}

/// `<dir>/<name>_temp`, next to the recording.
pub fn frame_dir_for(input: &Path) -> PathBuf {
    sibling(input, &format!("{}_temp", recording_name(input)))
}

pub(crate) fn sibling(input: &Path, file_name: &str) -> PathBuf {
    input
        .parent()
        .map(|p| p.join(file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}
