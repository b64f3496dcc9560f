// crates/cascaler-core/src/dispatch.rs
//
// Mode classification and job planning. Pure path/option logic — the intrinsic
// source dimensions needed for the DimensionPlan are probed by the caller and
// passed in, so classification stays deterministic and testable.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::dimensions::DimensionPlan;
use crate::error::{CasError, Result};
use crate::options::ProcessOptions;

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "ico",
];
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "webm", "wmv", "flv", "m4v",
];
pub const OUTPUT_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv"];

fn has_ext_in(path: &Path, table: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| table.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_image_path(path: &Path) -> bool {
    has_ext_in(path, IMAGE_EXTENSIONS)
}

pub fn is_video_path(path: &Path) -> bool {
    has_ext_in(path, VIDEO_EXTENSIONS)
}

pub fn is_video_output_path(path: &Path) -> bool {
    has_ext_in(path, OUTPUT_VIDEO_EXTENSIONS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    SingleImage,
    /// A single image expanded over a duration, or a directory compiled in
    /// sorted order (directory-to-video when the output has a video extension).
    ImageSequence,
    ImageBatch,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// One image file per frame.
    ImageFiles,
    /// A muxed .mp4/.mkv via the streaming compilation sink.
    VideoFile,
}

/// Everything the processor needs to drive one run.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub mode: ProcessingMode,
    /// Input files in processing order. Single-source modes hold one entry.
    pub sources: Vec<PathBuf>,
    pub dims: DimensionPlan,
    pub output: PathBuf,
    pub sink: SinkKind,
}

/// Classification rules, evaluated in order: file with a video extension →
/// Video; file with an image extension and a duration → ImageSequence; file
/// with an image extension → SingleImage; directory with a video-extension
/// output → ImageSequence (directory-to-video); directory → ImageBatch.
pub fn classify(opts: &ProcessOptions) -> Result<ProcessingMode> {
    let input = &opts.input;
    if input.is_file() {
        if is_video_path(input) {
            return Ok(ProcessingMode::Video);
        }
        if is_image_path(input) {
            if opts.duration.is_some() {
                return Ok(ProcessingMode::ImageSequence);
            }
            return Ok(ProcessingMode::SingleImage);
        }
        return Err(CasError::validation(format!(
            "Unsupported input format: {}",
            input.display()
        )));
    }
    if input.is_dir() {
        if opts.output.as_deref().map(is_video_output_path).unwrap_or(false) {
            return Ok(ProcessingMode::ImageSequence);
        }
        return Ok(ProcessingMode::ImageBatch);
    }
    Err(CasError::validation(format!(
        "Input path does not exist: {}",
        input.display()
    )))
}

/// The sink is a video muxer iff the (explicit or default) output path has a
/// recognized output-video extension.
pub fn sink_kind(output: &Path) -> SinkKind {
    if is_video_output_path(output) {
        SinkKind::VideoFile
    } else {
        SinkKind::ImageFiles
    }
}

/// Default output path when `-o` is not given: `<stem><suffix>.<ext>` next to
/// a plain single image, `<input><suffix>/` as a directory for everything
/// else.
pub fn default_output(input: &Path, mode: ProcessingMode, suffix: &str) -> PathBuf {
    match mode {
        ProcessingMode::SingleImage => {
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
            let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("png");
            input.with_file_name(format!("{stem}{suffix}.{ext}"))
        }
        _ => {
            // Media-file inputs drop their extension so `v.mp4` maps to
            // `v-cas/`; directory inputs keep their full name. Decided from
            // the path alone so planning stays deterministic.
            let name = if is_image_path(input) || is_video_path(input) {
                input.file_stem().and_then(|s| s.to_str())
            } else {
                input.file_name().and_then(|s| s.to_str())
            };
            input.with_file_name(format!("{}{suffix}", name.unwrap_or("out")))
        }
    }
}

/// List supported image files directly inside `dir`, sorted by name.
pub fn list_image_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image_path(p))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(CasError::not_found(dir));
    }
    Ok(files)
}

/// Assemble the plan. `source_w`/`source_h` are the probed intrinsic
/// dimensions; `total_frames` is the probed/derived frame count for the mode
/// (1 for SingleImage, file count for batch, duration·fps for sequences,
/// decoder estimate for video).
pub fn build_plan(
    opts: &ProcessOptions,
    suffix: &str,
    source_w: u32,
    source_h: u32,
    total_frames: usize,
) -> Result<JobPlan> {
    opts.validate()?;
    let mode = classify(opts)?;

    let output = match &opts.output {
        Some(p) => p.clone(),
        None => default_output(&opts.input, mode, suffix),
    };

    let sink = match mode {
        ProcessingMode::SingleImage => {
            if is_video_output_path(&output) {
                return Err(CasError::validation(
                    "A single image needs a duration to produce a video output",
                ));
            }
            SinkKind::ImageFiles
        }
        _ => sink_kind(&output),
    };

    let sources = match mode {
        ProcessingMode::ImageBatch => list_image_sources(&opts.input)?,
        ProcessingMode::ImageSequence if opts.input.is_dir() => {
            list_image_sources(&opts.input)?
        }
        _ => vec![opts.input.clone()],
    };

    let total = match mode {
        ProcessingMode::SingleImage => 1,
        ProcessingMode::ImageBatch => sources.len(),
        _ => total_frames.max(1),
    };

    let dims = DimensionPlan::from_options(opts, source_w, source_h, total)?;

    Ok(JobPlan {
        mode,
        sources,
        dims,
        output,
        sink,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FrameFormat;
    use std::fs;

    fn opts(input: PathBuf) -> ProcessOptions {
        ProcessOptions {
            input,
            output: None,
            width: None,
            height: None,
            percent: Some(50.0),
            start_width: None,
            start_height: None,
            start_percent: None,
            start: None,
            end: None,
            duration: None,
            format: FrameFormat::Png,
            fps: None,
            delta_x: 1.0,
            rigidity: 0.0,
            threads: None,
            progress: false,
            scale_back: false,
            crf: 23,
            preset: "medium".into(),
            codec: "libx264".into(),
            pixel_format: "yuv420p".into(),
            vibrato: false,
        }
    }

    fn touch(path: &Path) {
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn classifies_by_rules_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("a.png");
        let vid = dir.path().join("v.mp4");
        touch(&img);
        touch(&vid);

        assert_eq!(
            classify(&opts(vid)).unwrap(),
            ProcessingMode::Video
        );
        assert_eq!(
            classify(&opts(img.clone())).unwrap(),
            ProcessingMode::SingleImage
        );

        let mut seq = opts(img);
        seq.duration = Some(2.0);
        assert_eq!(classify(&seq).unwrap(), ProcessingMode::ImageSequence);

        assert_eq!(
            classify(&opts(dir.path().to_path_buf())).unwrap(),
            ProcessingMode::ImageBatch
        );

        let mut d2v = opts(dir.path().to_path_buf());
        d2v.output = Some(dir.path().join("out.mp4"));
        assert_eq!(classify(&d2v).unwrap(), ProcessingMode::ImageSequence);
    }

    #[test]
    fn rejects_unknown_file_kind() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("a.txt");
        touch(&txt);
        assert!(classify(&opts(txt)).is_err());
    }

    #[test]
    fn default_output_suffixes() {
        let single = default_output(
            Path::new("/x/a.png"),
            ProcessingMode::SingleImage,
            "-cas",
        );
        assert_eq!(single, PathBuf::from("/x/a-cas.png"));

        let video = default_output(Path::new("/x/v.mp4"), ProcessingMode::Video, "-cas");
        assert_eq!(video, PathBuf::from("/x/v-cas"));

        let batch = default_output(Path::new("/x/frames"), ProcessingMode::ImageBatch, "-cas");
        assert_eq!(batch, PathBuf::from("/x/frames-cas"));
    }

    #[test]
    fn plan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        for n in ["b.png", "a.png", "c.PNG", "notes.txt"] {
            touch(&dir.path().join(n));
        }
        let o = opts(dir.path().to_path_buf());
        let p1 = build_plan(&o, "-cas", 800, 600, 0).unwrap();
        let p2 = build_plan(&o, "-cas", 800, 600, 0).unwrap();
        assert_eq!(p1.sources, p2.sources);
        assert_eq!(p1.output, p2.output);
        assert_eq!(p1.dims, p2.dims);
        // Sorted, images only, case-insensitive extension match.
        let names: Vec<_> = p1
            .sources
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.PNG"]);
        assert_eq!(p1.dims.total_frames, 3);
    }

    #[test]
    fn empty_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let o = opts(dir.path().to_path_buf());
        match build_plan(&o, "-cas", 1, 1, 0) {
            Err(CasError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn video_sink_selected_by_output_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.png"));
        let mut o = opts(dir.path().to_path_buf());
        o.output = Some(dir.path().join("out.mkv"));
        let plan = build_plan(&o, "-cas", 800, 600, 75).unwrap();
        assert_eq!(plan.mode, ProcessingMode::ImageSequence);
        assert_eq!(plan.sink, SinkKind::VideoFile);
    }
}
