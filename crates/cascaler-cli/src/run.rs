// crates/cascaler-cli/src/run.rs
//
// Wires one CLI invocation into a job: merge defaults, classify, probe the
// source, build the plan, pick source/sink implementations, and hand
// everything to the MediaProcessor. Also owns the end-of-run summary.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use console::style;

use cascaler_core::carve::{self, CarveParams, SeamCarver};
use cascaler_core::config::AppConfig;
use cascaler_core::dispatch::{self, JobPlan, ProcessingMode, SinkKind};
use cascaler_core::options::{FrameFormat, ProcessOptions};
use cascaler_core::processor::{
    worker_count, FrameSource, ImageListSource, MediaProcessor, RepeatImageSource,
};
use cascaler_core::progress::{LogRouter, ProgressTracker};
use cascaler_core::sink::ImageFileSink;
use cascaler_core::{CasError, ItemResult, Result};
use cascaler_media::{CompileSettings, VideoCompilation, VideoDecoder, VideoFrameSource};

use crate::args::Cli;

pub struct RunSummary {
    pub results: Vec<ItemResult>,
    pub output: PathBuf,
    pub elapsed: Duration,
}

/// Layer configuration defaults under the CLI flags.
pub fn merge_options(cli: &Cli, cfg: &AppConfig) -> Result<ProcessOptions> {
    let input = cli
        .input
        .clone()
        .ok_or_else(|| CasError::validation("no input path given"))?;

    let format = match &cli.format {
        Some(name) => FrameFormat::from_str(name)?,
        None => FrameFormat::from_str(&cfg.processing.default_image_output_format)
            .unwrap_or(FrameFormat::Png),
    };

    // No explicit end target at all: fall back to the configured percentage.
    let percent = if cli.width.is_none() && cli.height.is_none() && cli.percent.is_none() {
        Some(cfg.processing.default_scale_percent)
    } else {
        cli.percent
    };

    Ok(ProcessOptions {
        input,
        output: cli.output.clone(),
        width: cli.width,
        height: cli.height,
        percent,
        start_width: cli.start_width,
        start_height: cli.start_height,
        start_percent: cli.start_percent,
        start: cli.start,
        end: cli.end,
        duration: cli.duration,
        format,
        fps: cli.fps,
        delta_x: cli.delta_x.unwrap_or(cfg.processing.default_delta_x),
        rigidity: cli.rigidity.unwrap_or(cfg.processing.default_rigidity),
        threads: cli.threads,
        progress: !cli.no_progress,
        scale_back: cli.scale_back || cfg.processing.default_scale_back,
        crf: cli.crf.unwrap_or(cfg.video_encoding.default_crf),
        preset: cli
            .preset
            .clone()
            .unwrap_or_else(|| cfg.video_encoding.default_preset.clone()),
        codec: cli
            .codec
            .clone()
            .unwrap_or_else(|| cfg.video_encoding.default_codec.clone()),
        pixel_format: cli
            .pixel_format
            .clone()
            .unwrap_or_else(|| cfg.video_encoding.default_pixel_format.clone()),
        vibrato: cli.vibrato || cfg.processing.default_vibrato,
    })
}

/// Intrinsic source facts gathered before planning.
struct SourceProbe {
    width: u32,
    height: u32,
    /// Effective output frame rate for this run.
    fps: f64,
    total_frames: usize,
}

fn probe_source(opts: &ProcessOptions, cfg: &AppConfig, mode: ProcessingMode) -> Result<SourceProbe> {
    let default_fps = cfg.processing.default_fps;
    match mode {
        ProcessingMode::SingleImage => {
            let (width, height) = image::image_dimensions(&opts.input)?;
            Ok(SourceProbe {
                width,
                height,
                fps: opts.fps.unwrap_or(default_fps),
                total_frames: 1,
            })
        }
        ProcessingMode::ImageSequence if opts.input.is_file() => {
            let (width, height) = image::image_dimensions(&opts.input)?;
            let fps = opts.fps.unwrap_or(default_fps);
            let duration = opts.duration.unwrap_or(1.0);
            Ok(SourceProbe {
                width,
                height,
                fps,
                total_frames: ((duration * fps).round() as usize).max(1),
            })
        }
        ProcessingMode::ImageSequence | ProcessingMode::ImageBatch => {
            let files = dispatch::list_image_sources(&opts.input)?;
            let (width, height) = image::image_dimensions(&files[0])?;
            Ok(SourceProbe {
                width,
                height,
                fps: opts.fps.unwrap_or(default_fps),
                total_frames: files.len(),
            })
        }
        ProcessingMode::Video => {
            let info = cascaler_media::probe(&opts.input)?;
            let source_fps = if info.fps > 0.0 { info.fps } else { default_fps };
            let fps = opts.fps.unwrap_or(source_fps);
            let total = match opts.time_window() {
                Some((start, end)) => {
                    let end = end.unwrap_or(info.duration_secs).min(if info.duration_secs > 0.0 {
                        info.duration_secs
                    } else {
                        f64::INFINITY
                    });
                    if end.is_finite() && end > start {
                        ((end - start) * source_fps).round().max(1.0) as usize
                    } else {
                        info.total_frames.max(1) as usize
                    }
                }
                None => info.total_frames.max(1) as usize,
            };
            Ok(SourceProbe {
                width: info.width,
                height: info.height,
                fps,
                total_frames: total,
            })
        }
    }
}

pub fn execute(
    cli: &Cli,
    cfg: &AppConfig,
    cancel: Arc<AtomicBool>,
    router: LogRouter,
) -> Result<RunSummary> {
    let started = Instant::now();
    let opts = merge_options(cli, cfg)?;
    opts.validate()?;

    let mode = dispatch::classify(&opts)?;
    let probe = probe_source(&opts, cfg, mode)?;
    let plan = dispatch::build_plan(
        &opts,
        &cfg.output.suffix,
        probe.width,
        probe.height,
        probe.total_frames,
    )?;

    log::info!(
        "{:?}: {} item(s), {}x{} -> {}x{}{} -> {}",
        plan.mode,
        plan.dims.total_frames,
        plan.dims.start_w,
        plan.dims.start_h,
        plan.dims.end_w,
        plan.dims.end_h,
        if plan.dims.is_gradual() { " (gradual)" } else { "" },
        plan.output.display()
    );

    let budget = match mode {
        ProcessingMode::Video => cfg.processing.max_video_threads,
        _ => cfg.processing.max_image_threads,
    };
    let workers = worker_count(budget, opts.threads, plan.dims.total_frames);

    // Video containers need constant dimensions, so frames always resample
    // to the uniform target on that path; image sinks only when asked.
    let scale_back_to = match plan.sink {
        SinkKind::VideoFile => Some(plan.dims.uniform_target()),
        SinkKind::ImageFiles if opts.scale_back => match mode {
            ProcessingMode::SingleImage => Some((probe.width, probe.height)),
            _ => Some(plan.dims.uniform_target()),
        },
        SinkKind::ImageFiles => None,
    };

    let carver = SeamCarver::new(CarveParams {
        delta_x: opts.delta_x,
        rigidity: opts.rigidity,
        timeout: Duration::from_secs(cfg.processing.processing_timeout_seconds),
    });

    let tracker = ProgressTracker::new(
        plan.dims.total_frames as u64,
        cfg.processing.minimum_items_for_eta,
        opts.progress,
        &cfg.output.progress_character,
        cfg.output.show_estimated_duration,
        router,
    );

    let processor = MediaProcessor::new(
        carver,
        plan.dims,
        scale_back_to,
        workers,
        Arc::clone(&cancel),
    );

    // Frames extracted from a video default to the video-frame format key;
    // still-image outputs use the image key. An explicit -f wins over both.
    let frame_format = match (&cli.format, mode) {
        (None, ProcessingMode::Video | ProcessingMode::ImageSequence) => {
            FrameFormat::from_str(&cfg.processing.default_video_frame_format)
                .unwrap_or(opts.format)
        }
        _ => opts.format,
    };

    let source = build_source(&opts, &plan, mode, probe.total_frames, frame_format)?;

    let results = match plan.sink {
        SinkKind::ImageFiles => {
            let mut sink = match mode {
                ProcessingMode::SingleImage => ImageFileSink::Single(plan.output.clone()),
                _ => ImageFileSink::Directory(plan.output.clone()),
            };
            processor.run(source, &mut sink, &tracker)
        }
        SinkKind::VideoFile => {
            let (target_w, target_h) = scale_back_to.unwrap_or((plan.dims.end_w, plan.dims.end_h));
            let settings = CompileSettings {
                output: plan.output.clone(),
                width: target_w,
                height: target_h,
                fps: probe.fps,
                total_frames: plan.dims.total_frames,
                crf: opts.crf,
                preset: opts.preset.clone(),
                codec: opts.codec.clone(),
                pixel_format: opts.pixel_format.clone(),
                source_video: (mode == ProcessingMode::Video).then(|| opts.input.clone()),
                window: opts.time_window(),
                vibrato: opts.vibrato,
            };
            let mut sink = VideoCompilation::start(settings, Arc::clone(&cancel));
            processor.run(source, &mut sink, &tracker)
        }
    };
    tracker.finish();

    Ok(RunSummary {
        results: results?,
        output: plan.output,
        elapsed: started.elapsed(),
    })
}

fn build_source(
    opts: &ProcessOptions,
    plan: &JobPlan,
    mode: ProcessingMode,
    total_frames: usize,
    frame_format: FrameFormat,
) -> Result<Box<dyn FrameSource>> {
    Ok(match mode {
        ProcessingMode::SingleImage | ProcessingMode::ImageBatch => {
            Box::new(ImageListSource::new(plan.sources.clone()))
        }
        ProcessingMode::ImageSequence if opts.input.is_file() => {
            let image = carve::load_image(&opts.input)?;
            Box::new(RepeatImageSource::new(
                image,
                opts.input.display().to_string(),
                frame_format,
                total_frames,
            ))
        }
        ProcessingMode::ImageSequence => Box::new(ImageListSource::new(plan.sources.clone())),
        ProcessingMode::Video => {
            let decoder = VideoDecoder::open(&opts.input, opts.time_window())?;
            Box::new(VideoFrameSource::new(decoder, frame_format))
        }
    })
}

/// Two-line completion summary plus the failed-file list, printed after the
/// bar is gone.
pub fn print_summary(summary: &RunSummary) {
    let ok = summary.results.iter().filter(|r| r.is_ok()).count();
    let failed: Vec<&ItemResult> = summary.results.iter().filter(|r| !r.is_ok()).collect();

    println!(
        "{} {ok}/{} item(s) -> {}",
        style("Processed").green().bold(),
        summary.results.len(),
        summary.output.display()
    );
    println!("Completed in {:.1}s", summary.elapsed.as_secs_f64());

    if !failed.is_empty() {
        println!("{}", style("failed files:").red().bold());
        for item in failed {
            println!(
                "  {}: {}",
                item.source,
                item.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
