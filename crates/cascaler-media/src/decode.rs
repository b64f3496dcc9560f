// crates/cascaler-media/src/decode.rs
//
// VideoDecoder: demux + decode the best video stream to RGB24 frames with a
// dense 0-based index, honoring an optional trim window. Individual bad
// packets are logged and skipped; a run of consecutive failures aborts.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as FfVideoFrame;
use image::RgbImage;

use cascaler_core::options::FrameFormat;
use cascaler_core::processor::{frame_file_name, FrameSource, WorkItem, WorkPayload};
use cascaler_core::{CasError, Result};

use crate::convert;
use crate::probe::{probe, MediaInfo};

/// Give up after this many consecutive packet/decode failures.
const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 10;

pub struct DecodedFrame {
    pub index: usize,
    pub pts_secs: f64,
    pub image: RgbImage,
}

pub struct VideoDecoder {
    path: PathBuf,
    info: MediaInfo,
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::video::Video,
    stream_idx: usize,
    scaler: SwsContext,
    time_base: f64,
    window: (f64, Option<f64>),
    index: usize,
    consecutive_errors: u32,
    draining: bool,
    finished: bool,
}

// Owns FFmpeg's raw pointers exclusively and is only ever moved to the
// producer thread that drives decoding, never shared concurrently.
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    /// Open `path` and position the demuxer at the window start (keyframe
    /// aligned; pre-roll frames are decoded and discarded below).
    pub fn open(path: &Path, window: Option<(f64, Option<f64>)>) -> Result<Self> {
        let info = probe(path)?;
        let window = window.unwrap_or((0.0, None));

        let mut ictx = ffmpeg::format::input(&path)
            .map_err(|e| CasError::decode(format!("open '{}': {e}", path.display())))?;

        let stream_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| CasError::decode(format!("no video stream in '{}'", path.display())))?
            .index();

        let (time_base, display_w, display_h) = {
            let stream = ictx.stream(stream_idx).unwrap();
            let params = stream.parameters();
            // Display dimensions, not the macroblock-padded coded size.
            let (w, h) = {
                let dec = ffmpeg::codec::context::Context::from_parameters(params)
                    .map_err(|e| CasError::decode(format!("decoder params: {e}")))?
                    .decoder()
                    .video()
                    .map_err(|e| CasError::decode(format!("unsupported video codec: {e}")))?;
                (dec.width(), dec.height())
            };
            (f64::from(stream.time_base()), w, h)
        };

        if window.0 > 0.0 {
            let seek_ts = (window.0 * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
            ictx.seek(seek_ts, ..seek_ts)
                .map_err(|e| CasError::decode(format!("seek in '{}': {e}", path.display())))?;
        }

        // Second context for decoder construction (Parameters borrows ictx).
        let ictx2 = ffmpeg::format::input(&path)
            .map_err(|e| CasError::decode(format!("open '{}': {e}", path.display())))?;
        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(
            ictx2.stream(stream_idx).unwrap().parameters(),
        )
        .map_err(|e| CasError::decode(format!("decoder context: {e}")))?;
        let decoder = dec_ctx
            .decoder()
            .video()
            .map_err(|e| CasError::decode(format!("unsupported video codec: {e}")))?;

        let (src_w, src_h) = if display_w > 0 && display_h > 0 {
            (display_w, display_h)
        } else {
            (decoder.width(), decoder.height())
        };

        let scaler = SwsContext::get(
            decoder.format(),
            src_w,
            src_h,
            Pixel::RGB24,
            src_w,
            src_h,
            Flags::BILINEAR,
        )
        .map_err(|e| CasError::decode(format!("create scaler: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            info,
            ictx,
            decoder,
            stream_idx,
            scaler,
            time_base,
            window,
            index: 0,
            consecutive_errors: 0,
            draining: false,
            finished: false,
        })
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    /// Next RGB24 frame in decode order, windowed. None at end of stream or
    /// window; Err only after repeated decode failures.
    pub fn next_frame(&mut self) -> Option<Result<DecodedFrame>> {
        if self.finished {
            return None;
        }
        loop {
            // Drain decoded frames before feeding more packets.
            let mut decoded = FfVideoFrame::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                self.consecutive_errors = 0;
                let pts_secs = decoded.pts().map(|p| p as f64 * self.time_base).unwrap_or(0.0);
                // Pre-roll from the keyframe-aligned seek.
                if pts_secs < self.window.0 {
                    continue;
                }
                if let Some(end) = self.window.1 {
                    if pts_secs >= end {
                        self.finished = true;
                        return None;
                    }
                }
                let mut rgb = FfVideoFrame::empty();
                if let Err(e) = self.scaler.run(&decoded, &mut rgb) {
                    return Some(Err(CasError::decode(format!("scale frame: {e}"))));
                }
                let Some(image) = convert::frame_to_rgb_image(&rgb) else {
                    return Some(Err(CasError::decode("unexpected scaler output".to_string())));
                };
                let index = self.index;
                self.index += 1;
                return Some(Ok(DecodedFrame {
                    index,
                    pts_secs,
                    image,
                }));
            }

            if self.draining {
                self.finished = true;
                return None;
            }

            match self.ictx.packets().next() {
                Some(Ok((stream, packet))) => {
                    if stream.index() != self.stream_idx {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        self.consecutive_errors += 1;
                        log::warn!(
                            "{}: dropping packet after decode error: {e}",
                            self.path.display()
                        );
                        if self.consecutive_errors >= MAX_CONSECUTIVE_DECODE_ERRORS {
                            self.finished = true;
                            return Some(Err(CasError::decode(format!(
                                "{} consecutive decode failures in '{}'",
                                self.consecutive_errors,
                                self.path.display()
                            ))));
                        }
                    }
                }
                Some(Err(e)) => {
                    self.consecutive_errors += 1;
                    log::warn!("{}: demux error: {e}", self.path.display());
                    if self.consecutive_errors >= MAX_CONSECUTIVE_DECODE_ERRORS {
                        self.finished = true;
                        return Some(Err(CasError::decode(format!(
                            "{} consecutive demux failures in '{}'",
                            self.consecutive_errors,
                            self.path.display()
                        ))));
                    }
                }
                None => {
                    // EOF: flush the codec's internal reorder queue.
                    let _ = self.decoder.send_eof();
                    self.draining = true;
                }
            }
        }
    }
}

/// FrameSource adapter: feeds decoded frames to the processor's work queue.
/// Runs on the producer thread, so decode overlaps carving.
pub struct VideoFrameSource {
    decoder: VideoDecoder,
    format: FrameFormat,
}

impl VideoFrameSource {
    pub fn new(decoder: VideoDecoder, format: FrameFormat) -> Self {
        Self { decoder, format }
    }
}

impl FrameSource for VideoFrameSource {
    fn next_item(&mut self) -> Option<Result<WorkItem>> {
        let frame = self.decoder.next_frame()?;
        Some(frame.map(|f| WorkItem {
            index: f.index,
            source: format!("{} [frame {}]", self.decoder.path.display(), f.index),
            out_name: frame_file_name(f.index, self.format),
            payload: WorkPayload::Image(f.image),
        }))
    }
}
