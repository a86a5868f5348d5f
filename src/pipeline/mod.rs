//! Generation (parallel, per step) followed by assembly (sequential).

use log::{error, info, warn};
use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::{load_audio, AudioData};
use crate::config::{RenderErrorPolicy, RunConfig};
use crate::error::{PipelineError, RenderError};
use crate::noise::{run_seed, step_rng, synthesize, StepIndex};
use crate::render::FrameRenderer;
use crate::store::{frame_dir_for, recording_name, DirFrameStore, FrameStore};
use crate::video::{
    assemble, FfmpegFactory, FrameSequence, SinkFactory, VideoOutput, VideoPaths,
};

/// Cooperative cancellation, checked before each step starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum StepOutcome {
    Rendered,
    Resumed,
    Skipped(RenderError),
    /// Not started because another step already failed the run.
    Abandoned,
}

#[derive(Debug, Default)]
pub struct GenerationReport {
    pub seed: u64,
    pub rendered: usize,
    pub resumed: usize,
    pub skipped: Vec<(StepIndex, String)>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub generation: GenerationReport,
    pub gaps: Vec<StepIndex>,
    pub video: VideoOutput,
}

/// Renders and stores one frame per step. Steps run concurrently; frame identity
/// comes from the store key, never from completion order.
pub fn generate(
    audio: &AudioData,
    config: &RunConfig,
    store: &dyn FrameStore,
    cancel: &CancelToken,
) -> Result<GenerationReport, PipelineError> {
    let schedule = &config.schedule;
    let seed = run_seed(config.seed);
    info!("Noise seed {} (pass --seed {} to reproduce this run)", seed, seed);

    let renderer = FrameRenderer::new(config.mel.clone(), audio.sample_rate, config.raster);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(config.jobs).build()?;

    let total = schedule.frame_count();
    let every = (total / 20).max(1);
    let done = AtomicUsize::new(0);
    let halted = CancelToken::default();

    let outcomes: Vec<(StepIndex, StepOutcome)> = pool.install(|| {
        schedule
            .steps()
            .into_par_iter()
            .map(|step| {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                if halted.is_cancelled() {
                    return Ok((step, StepOutcome::Abandoned));
                }
                let outcome = if config.resume && store.contains(step) {
                    StepOutcome::Resumed
                } else {
                    render_step(step, audio, config, seed, &renderer, store).map_err(|e| {
                        halted.cancel();
                        e
                    })?
                };

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                if finished % every == 0 || finished == total {
                    info!("Generated {}/{} frames", finished, total);
                }
                Ok((step, outcome))
            })
            .collect::<Result<_, _>>()
    })?;

    let mut report = GenerationReport { seed, ..GenerationReport::default() };
    for (step, outcome) in outcomes {
        match outcome {
            StepOutcome::Rendered => report.rendered += 1,
            StepOutcome::Resumed => report.resumed += 1,
            StepOutcome::Skipped(e) => report.skipped.push((step, e.to_string())),
            StepOutcome::Abandoned => {}
        }
    }
    info!(
        "Generation finished: {} rendered, {} reused, {} skipped",
        report.rendered,
        report.resumed,
        report.skipped.len()
    );
    Ok(report)
}

fn render_step(
    step: StepIndex,
    audio: &AudioData,
    config: &RunConfig,
    seed: u64,
    renderer: &FrameRenderer,
    store: &dyn FrameStore,
) -> Result<StepOutcome, PipelineError> {
    let sigma = config.schedule.sigma(step);
    let noisy = synthesize(&audio.samples, sigma, &mut step_rng(seed, step))
        .map_err(|source| PipelineError::Noise { step, source })?;

    let image = match renderer.render(&noisy) {
        Ok(image) => image,
        Err(source) => match config.on_render_error {
            RenderErrorPolicy::Abort => {
                error!("Step {} failed to render: {}", step, source);
                return Err(PipelineError::Render { step, source });
            }
            RenderErrorPolicy::Skip => {
                warn!("Step {} failed to render, leaving a gap: {}", step, source);
                // a frame left over from an earlier run would fill the gap with stale content
                store
                    .remove(step)
                    .map_err(|source| PipelineError::Store { step, source })?;
                return Ok(StepOutcome::Skipped(source));
            }
        },
    };

    store
        .save(step, &image)
        .map_err(|source| PipelineError::Store { step, source })?;
    Ok(StepOutcome::Rendered)
}

/// Generates every frame, then, once all of them are done, writes both videos.
pub fn render_video<F: SinkFactory>(
    audio: &AudioData,
    config: &RunConfig,
    store: &dyn FrameStore,
    paths: &VideoPaths,
    factory: &F,
    cancel: &CancelToken,
) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let generation = generate(audio, config, store, cancel)?;

    let sequence = FrameSequence::scan(store, config.schedule.total_steps);
    if !sequence.gaps().is_empty() {
        warn!("{} of {} frames missing", sequence.gaps().len(), config.schedule.frame_count());
    }
    let video = assemble(store, &sequence, paths, factory, config.frame_rate)?;

    Ok(RunSummary {
        generation,
        gaps: sequence.gaps().to_vec(),
        video,
    })
}

/// Full run for one recording: decode, generate frames next to it, encode with ffmpeg.
pub fn run(
    input: &Path,
    config: &RunConfig,
    cancel: &CancelToken,
) -> Result<RunSummary, PipelineError> {
    let factory = FfmpegFactory {
        program: config.ffmpeg.clone(),
        codec: config.codec.clone(),
    };
    run_with(input, config, &factory, cancel)
}

fn run_with<F: SinkFactory>(
    input: &Path,
    config: &RunConfig,
    factory: &F,
    cancel: &CancelToken,
) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let audio = load_audio(input)?.resampled(config.sample_rate);
    info!("Analysing {:.2}s of audio at {}Hz", audio.duration_secs(), audio.sample_rate);

    let store = DirFrameStore::open(frame_dir_for(input), recording_name(input))?;
    let paths = VideoPaths::for_input(input);
    let summary = render_video(&audio, config, &store, &paths, factory, cancel)?;

    if config.clean_frames {
        info!("Removing frame directory {}", store.dir().display());
        store.remove_all()?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EncodeError, StoreError};
    use crate::noise::NoiseSchedule;
    use crate::render::{MelConfig, RasterSize};
    use crate::store::memory::MemoryFrameStore;
    use crate::video::recording::RecordingFactory;
    use approx::assert_relative_eq;

    fn small_config() -> RunConfig {
        RunConfig {
            schedule: NoiseSchedule {
                total_steps: 10,
                linear_end: 3,
                log_end: 7,
                base_sigma: 0.01,
                log_gain: 30.0,
            },
            mel: MelConfig { n_fft: 512, hop_length: 128, n_mels: 32 },
            raster: RasterSize { width: 32, height: 24 },
            seed: Some(1234),
            jobs: 2,
            ..RunConfig::default()
        }
    }

    fn silence() -> AudioData {
        AudioData { samples: vec![0.0; 16_000], sample_rate: 16_000 }
    }

    #[test]
    fn silent_second_produces_eleven_frames_and_two_videos() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let store = MemoryFrameStore::default();
        let factory = RecordingFactory::default();
        let paths = VideoPaths::for_input(&dir.path().join("silence.wav"));

        let s = &config.schedule;
        assert_eq!(s.sigma(0), 0.0);
        assert_relative_eq!(s.sigma(3), s.base_sigma);
        assert_relative_eq!(s.sigma(7), s.base_sigma * s.log_gain, epsilon = 1e-12);
        assert_relative_eq!(s.sigma(10), 2.0 * s.base_sigma);

        let cancel = CancelToken::default();
        let summary = render_video(&silence(), &config, &store, &paths, &factory, &cancel).unwrap();
        assert_eq!(store.len(), 11);
        assert_eq!(summary.generation.rendered, 11);
        assert!(summary.gaps.is_empty());
        assert_eq!(summary.video.frames, 11);

        let forward = factory.frames_at(&paths.forward);
        let reverse = factory.frames_at(&paths.reverse);
        assert_eq!(forward.len(), 11);
        assert_eq!(reverse.len(), 11);
        assert_eq!(reverse[0].as_raw(), forward[10].as_raw());
        assert_eq!(reverse[10].as_raw(), forward[0].as_raw());
        assert_eq!(*factory.fps.lock().unwrap(), vec![25, 25]);
        assert!(paths.forward.is_file() && paths.reverse.is_file());
    }

    #[test]
    fn frames_do_not_depend_on_worker_count() {
        let base = AudioData {
            samples: (0..8_000).map(|i| (i as f32 * 0.03).sin() * 0.3).collect(),
            sample_rate: 16_000,
        };
        let one = MemoryFrameStore::default();
        let many = MemoryFrameStore::default();
        let cancel = CancelToken::default();

        generate(&base, &RunConfig { jobs: 1, ..small_config() }, &one, &cancel).unwrap();
        generate(&base, &RunConfig { jobs: 4, ..small_config() }, &many, &cancel).unwrap();

        for step in 0..=10 {
            let a = one.load(step).unwrap().unwrap();
            let b = many.load(step).unwrap().unwrap();
            assert_eq!(a.as_raw(), b.as_raw(), "step {step}");
        }
    }

    #[test]
    fn render_failure_aborts_by_default() {
        let broken = AudioData { samples: vec![f32::NAN; 1_000], sample_rate: 16_000 };
        let store = MemoryFrameStore::default();
        let err = generate(&broken, &small_config(), &store, &CancelToken::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Render { source: RenderError::NonFinite { .. }, .. }));
    }

    #[test]
    fn skip_policy_leaves_gaps_and_assembly_refuses_empty_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let broken = AudioData { samples: vec![f32::INFINITY; 1_000], sample_rate: 16_000 };
        let config = RunConfig { on_render_error: RenderErrorPolicy::Skip, ..small_config() };
        let store = MemoryFrameStore::default();

        let report = generate(&broken, &config, &store, &CancelToken::default()).unwrap();
        assert_eq!(report.rendered, 0);
        assert_eq!(report.skipped.len(), 11);
        assert_eq!(store.len(), 0);

        let paths = VideoPaths::for_input(&dir.path().join("broken.wav"));
        let factory = RecordingFactory::default();
        let err = render_video(&broken, &config, &store, &paths, &factory, &CancelToken::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Encode(EncodeError::NoFrames)));
    }

    /// Refuses to store step 0 and records everything else.
    #[derive(Default)]
    struct FirstStepFails(MemoryFrameStore);

    impl FrameStore for FirstStepFails {
        fn save(&self, step: StepIndex, image: &image::RgbImage) -> Result<(), StoreError> {
            if step == 0 {
                let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
                return Err(StoreError::Io(denied));
            }
            self.0.save(step, image)
        }

        fn load(&self, step: StepIndex) -> Result<Option<image::RgbImage>, StoreError> {
            self.0.load(step)
        }

        fn contains(&self, step: StepIndex) -> bool {
            self.0.contains(step)
        }

        fn remove(&self, step: StepIndex) -> Result<(), StoreError> {
            self.0.remove(step)
        }
    }

    #[test]
    fn failed_step_stops_the_remaining_steps() {
        let store = FirstStepFails::default();
        let config = RunConfig { jobs: 1, ..small_config() };
        let err = generate(&silence(), &config, &store, &CancelToken::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Store { step: 0, .. }));
        assert_eq!(store.0.len(), 0);
    }

    #[test]
    fn cancelled_run_renders_nothing() {
        let cancel = CancelToken::default();
        cancel.cancel();
        let store = MemoryFrameStore::default();
        let err = generate(&silence(), &small_config(), &store, &cancel).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn resume_keeps_existing_frames() {
        let store = MemoryFrameStore::default();
        let sentinel = image::RgbImage::from_pixel(32, 24, image::Rgb([1, 2, 3]));
        store.save(5, &sentinel).unwrap();

        let config = RunConfig { resume: true, ..small_config() };
        let report = generate(&silence(), &config, &store, &CancelToken::default()).unwrap();
        assert_eq!(report.resumed, 1);
        assert_eq!(report.rendered, 10);
        assert_eq!(store.load(5).unwrap().unwrap().as_raw(), sentinel.as_raw());
    }

    #[test]
    fn deleted_frames_become_gaps_in_both_videos() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let store = MemoryFrameStore::default();
        generate(&silence(), &config, &store, &CancelToken::default()).unwrap();
        store.remove(0).unwrap();
        store.remove(6).unwrap();

        let sequence = FrameSequence::scan(&store, 10);
        assert_eq!(sequence.len(), 9);
        let factory = RecordingFactory::default();
        let paths = VideoPaths::for_input(&dir.path().join("gappy.wav"));
        let out = assemble(&store, &sequence, &paths, &factory, config.frame_rate).unwrap();
        assert_eq!(out.frames, 9);
        assert_eq!(factory.frames_at(&paths.forward).len(), 9);
        assert_eq!(factory.frames_at(&paths.reverse).len(), 9);
    }

    #[test]
    fn invalid_config_fails_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.schedule.log_end = 2;
        let store = MemoryFrameStore::default();
        let paths = VideoPaths::for_input(&dir.path().join("x.wav"));
        let factory = RecordingFactory::default();
        let cancel = CancelToken::default();
        let err = render_video(&silence(), &config, &store, &paths, &factory, &cancel).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn missing_input_is_reported() {
        let input = Path::new("/no/such/file.wav");
        let err = run(input, &small_config(), &CancelToken::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Audio(crate::error::AudioError::InputNotFound(_))));
    }

    #[test]
    fn skipped_steps_drop_frames_left_by_an_earlier_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirFrameStore::open(dir.path().join("song_temp"), "song").unwrap();
        let stale = image::RgbImage::from_pixel(32, 24, image::Rgb([9, 9, 9]));
        for step in 0..=10 {
            store.save(step, &stale).unwrap();
        }

        let empty = AudioData { samples: vec![], sample_rate: 16_000 };
        let config = RunConfig { on_render_error: RenderErrorPolicy::Skip, ..small_config() };
        let paths = VideoPaths::for_input(&dir.path().join("song.wav"));
        let factory = RecordingFactory::default();
        let err = render_video(&empty, &config, &store, &paths, &factory, &CancelToken::default())
            .unwrap_err();

        assert!(matches!(err, PipelineError::Encode(EncodeError::NoFrames)));
        assert!((0..=10).all(|step| !store.contains(step)));
        assert!(factory.frames_at(&paths.forward).is_empty());
    }

    #[test]
    fn clean_frames_removes_the_frame_directory_after_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&input, spec).unwrap();
        for i in 0..8_000 {
            let s = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin() * 0.3;
            writer.write_sample((s * 32767.0) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let config = RunConfig { sample_rate: 0, clean_frames: true, ..small_config() };
        let factory = RecordingFactory::default();
        let summary = run_with(&input, &config, &factory, &CancelToken::default()).unwrap();

        assert_eq!(summary.video.frames, 11);
        assert_eq!(factory.frames_at(&summary.video.forward).len(), 11);
        assert!(summary.video.forward.is_file() && summary.video.reverse.is_file());
        assert!(!frame_dir_for(&input).exists());
    }

    #[test]
    fn frames_are_kept_without_clean_frames() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("hush.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&input, spec).unwrap();
        for _ in 0..4_000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let config = RunConfig { sample_rate: 0, ..small_config() };
        run_with(&input, &config, &RecordingFactory::default(), &CancelToken::default()).unwrap();

        let store = DirFrameStore::open(frame_dir_for(&input), "hush").unwrap();
        assert!((0..=10).all(|step| store.contains(step)));
    }
}
