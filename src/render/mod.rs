//! Noisy waveform to colourised mel spectrogram raster.

mod colormap;
mod mel;

pub use colormap::viridis;
pub use mel::{power_to_db, MelConfig, MelSpectrogram};

use image::RgbImage;

use crate::error::{ConfigError, RenderError};

/// Power floor used before taking logarithms.
pub const AMIN: f32 = 1e-10;
/// Dynamic range kept below each frame's maximum.
pub const TOP_DB: f32 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSize {
    pub width: u32,
    pub height: u32,
}

impl Default for RasterSize {
    fn default() -> Self {
        Self { width: 1000, height: 600 }
    }
}

impl RasterSize {
    /// Encoders subsample chroma, so both sides must be even.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ConfigError::RasterSize { width: self.width, height: self.height });
        }
        Ok(())
    }
}

/// Stateless renderer: each call builds its own raster, so it can be shared
/// across worker threads.
pub struct FrameRenderer {
    mel: MelSpectrogram,
    size: RasterSize,
}

impl FrameRenderer {
    pub fn new(config: MelConfig, sample_rate: u32, size: RasterSize) -> Self {
        Self {
            mel: MelSpectrogram::new(config, sample_rate),
            size,
        }
    }

    pub fn render(&self, signal: &[f32]) -> Result<RgbImage, RenderError> {
        if signal.is_empty() {
            return Err(RenderError::EmptySignal);
        }
        if let Some(index) = signal.iter().position(|s| !s.is_finite()) {
            return Err(RenderError::NonFinite { index });
        }
        let RasterSize { width, height } = self.size;
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyRaster { width, height });
        }

        let db = power_to_db(&self.mel.power(signal), AMIN, TOP_DB);
        Ok(colorize(&db, width, height))
    }
}

/// Stretches a `[bands][frames]` dB grid over the raster with bilinear sampling,
/// lowest band on the bottom row.
fn colorize(db: &[Vec<f32>], width: u32, height: u32) -> RgbImage {
    let bands = db.len();
    let frames = db.first().map_or(0, Vec::len);

    let (lo, hi) = db
        .iter()
        .flatten()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;

    let axis = |pixel: u32, pixels: u32, cells: usize| -> (usize, usize, f32) {
        if cells <= 1 || pixels <= 1 {
            return (0, 0, 0.0);
        }
        let pos = pixel as f32 * (cells - 1) as f32 / (pixels - 1) as f32;
        let i0 = (pos.floor() as usize).min(cells - 1);
        let i1 = (i0 + 1).min(cells - 1);
        (i0, i1, pos - i0 as f32)
    };

    RgbImage::from_fn(width, height, |x, y| {
        let (b0, b1, fb) = axis(height - 1 - y, height, bands);
        let (t0, t1, ft) = axis(x, width, frames);

        let low = db[b0][t0] + (db[b0][t1] - db[b0][t0]) * ft;
        let high = db[b1][t0] + (db[b1][t1] - db[b1][t0]) * ft;
        let v = low + (high - low) * fb;

        let t = if range > 0.0 { (v - lo) / range } else { 0.0 };
        viridis(t)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::{step_rng, synthesize};
    use image::Rgb;

    fn renderer(width: u32, height: u32) -> FrameRenderer {
        FrameRenderer::new(
            MelConfig { n_fft: 512, hop_length: 128, n_mels: 40 },
            16_000,
            RasterSize { width, height },
        )
    }

    #[test]
    fn raster_has_configured_size() {
        let noisy = synthesize(&vec![0.0; 8_000], 0.05, &mut step_rng(9, 1)).unwrap();
        let img = renderer(64, 48).render(&noisy).unwrap();
        assert_eq!(img.dimensions(), (64, 48));
    }

    #[test]
    fn empty_signal_is_an_error() {
        assert!(matches!(renderer(8, 8).render(&[]), Err(RenderError::EmptySignal)));
    }

    #[test]
    fn non_finite_sample_is_an_error() {
        let mut signal = vec![0.1f32; 100];
        signal[42] = f32::NAN;
        assert!(matches!(
            renderer(8, 8).render(&signal),
            Err(RenderError::NonFinite { index: 42 })
        ));
    }

    #[test]
    fn silence_renders_a_uniform_frame() {
        let img = renderer(16, 10).render(&vec![0.0; 4_000]).unwrap();
        let first = *img.get_pixel(0, 0);
        assert!(img.pixels().all(|p| *p == first));
    }

    #[test]
    fn seeded_render_is_byte_identical() {
        let base: Vec<f32> = (0..8_000).map(|i| (i as f32 * 0.01).sin() * 0.2).collect();
        let r = renderer(40, 30);
        let a = r.render(&synthesize(&base, 0.02, &mut step_rng(5, 10)).unwrap()).unwrap();
        let b = r.render(&synthesize(&base, 0.02, &mut step_rng(5, 10)).unwrap()).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn low_frequencies_are_drawn_at_the_bottom() {
        let sr = 16_000;
        let rumble: Vec<f32> = (0..sr)
            .map(|i| (2.0 * std::f32::consts::PI * 100.0 * i as f32 / sr as f32).sin())
            .collect();
        let img = renderer(20, 40).render(&rumble).unwrap();
        let brightness = |p: &Rgb<u8>| p.0.iter().map(|&c| c as u32).sum::<u32>();
        let top = brightness(img.get_pixel(10, 0));
        let bottom = brightness(img.get_pixel(10, 39));
        assert!(bottom > top, "bottom {bottom} top {top}");
    }

    #[test]
    fn odd_raster_is_rejected() {
        assert!(RasterSize { width: 1001, height: 600 }.validate().is_err());
        assert!(RasterSize { width: 0, height: 600 }.validate().is_err());
        assert!(RasterSize::default().validate().is_ok());
    }
}
