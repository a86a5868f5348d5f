use image::RgbImage;
use log::debug;
use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};

use super::{SinkFactory, VideoSink};
use crate::error::EncodeError;
use crate::render::RasterSize;

/// Pipes raw RGB frames into an `ffmpeg` child process.
#[derive(Debug, Clone)]
pub struct FfmpegFactory {
    pub program: String,
    pub codec: String,
}

impl Default for FfmpegFactory {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            codec: "libx264".to_string(),
        }
    }
}

impl SinkFactory for FfmpegFactory {
    type Sink = FfmpegSink;

    fn open(&self, path: &Path, size: RasterSize, fps: u32) -> Result<FfmpegSink, EncodeError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("rawvideo")
            .arg("-vcodec")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(format!("{}x{}", size.width, size.height))
            .arg("-r")
            .arg(fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg(&self.codec)
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        debug!("Spawning {:?}", cmd);

        let mut child = cmd.spawn().map_err(|source| EncodeError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stdin = child.stdin.take();
        Ok(FfmpegSink {
            child: Some(child),
            stdin,
        })
    }
}

pub struct FfmpegSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<(), EncodeError> {
        match self.stdin.as_mut() {
            Some(stdin) => Ok(stdin.write_all(frame.as_raw())?),
            None => Err(EncodeError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder input already closed",
            ))),
        }
    }

    fn finish(mut self) -> Result<(), EncodeError> {
        // closing stdin is the end-of-stream signal
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let status = child.wait()?;
            if !status.success() {
                return Err(EncodeError::Ffmpeg { status });
            }
        }
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let factory = FfmpegFactory {
            program: "/nonexistent/ffmpeg-binary".to_string(),
            ..FfmpegFactory::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = factory
            .open(&dir.path().join("out.mp4"), RasterSize { width: 4, height: 4 }, 25)
            .err()
            .unwrap();
        assert!(matches!(err, EncodeError::Spawn { .. }));
    }
}
