// crates/cascaler-media/src/probe.rs
//
// One-shot container probe: intrinsic dimensions, frame rate, frame count
// (estimated from duration when the container doesn't carry one), and the
// audio stream's codec name for compatibility logic.

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::media::Type;

use cascaler_core::{CasError, Result};

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_secs: f64,
    pub total_frames: u64,
    pub has_audio: bool,
    pub audio_codec: Option<String>,
}

pub fn probe(path: &Path) -> Result<MediaInfo> {
    let ictx = ffmpeg::format::input(&path)
        .map_err(|e| CasError::decode(format!("open '{}': {e}", path.display())))?;

    let stream = ictx
        .streams()
        .best(Type::Video)
        .ok_or_else(|| CasError::decode(format!("no video stream in '{}'", path.display())))?;

    let params = stream.parameters();
    let (width, height) = {
        let dec = ffmpeg::codec::context::Context::from_parameters(params)
            .map_err(|e| CasError::decode(format!("decoder params: {e}")))?
            .decoder()
            .video()
            .map_err(|e| CasError::decode(format!("unsupported video codec: {e}")))?;
        (dec.width(), dec.height())
    };

    let fps = {
        let r = stream.avg_frame_rate();
        if r.denominator() != 0 && r.numerator() > 0 {
            f64::from(r)
        } else {
            0.0
        }
    };

    let duration_secs = {
        let d = ictx.duration();
        if d > 0 {
            d as f64 / ffmpeg::ffi::AV_TIME_BASE as f64
        } else {
            let tb = stream.time_base();
            let sd = stream.duration();
            if sd > 0 {
                sd as f64 * f64::from(tb)
            } else {
                0.0
            }
        }
    };

    // Containers often omit nb_frames; fall back to duration * fps.
    let total_frames = {
        let n = stream.frames();
        if n > 0 {
            n as u64
        } else if fps > 0.0 && duration_secs > 0.0 {
            (duration_secs * fps).round() as u64
        } else {
            0
        }
    };

    let audio_stream = ictx.streams().best(Type::Audio);
    let has_audio = audio_stream.is_some();
    let audio_codec = audio_stream.and_then(|s| {
        let id = ffmpeg::codec::context::Context::from_parameters(s.parameters())
            .ok()?
            .id();
        ffmpeg::decoder::find(id).map(|c| c.name().to_string())
    });

    log::debug!(
        "probe {}: {width}x{height} @ {fps:.3} fps, {duration_secs:.2}s, ~{total_frames} frames, audio: {}",
        path.display(),
        audio_codec.as_deref().unwrap_or("none"),
    );

    Ok(MediaInfo {
        width,
        height,
        fps,
        duration_secs,
        total_frames,
        has_audio,
        audio_codec,
    })
}
