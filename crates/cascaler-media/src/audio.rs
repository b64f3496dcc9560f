// crates/cascaler-media/src/audio.rs
//
// AudioDecoder: demux + decode the source's audio stream to float-planar
// frames at the native sample rate, with the same trim window as the video
// path. Frames fully outside the window are dropped; frames straddling an
// endpoint are truncated with sample-accurate boundaries.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::media::Type;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;

use cascaler_core::{CasError, Result};

const FLTP: Sample = Sample::F32(SampleType::Planar);

pub struct AudioDecoder {
    path: PathBuf,
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::audio::Audio,
    stream_idx: usize,
    resampler: Option<resampling::Context>,
    time_base: f64,
    window: (f64, Option<f64>),
    rate: u32,
    stereo: bool,
    codec_name: String,
    draining: bool,
    finished: bool,
}

impl AudioDecoder {
    /// Returns Ok(None) when the container has no audio stream.
    pub fn open(path: &Path, window: Option<(f64, Option<f64>)>) -> Result<Option<Self>> {
        let ictx = ffmpeg::format::input(&path)
            .map_err(|e| CasError::decode(format!("open '{}': {e}", path.display())))?;

        let Some(stream) = ictx.streams().best(Type::Audio) else {
            return Ok(None);
        };
        let stream_idx = stream.index();
        let time_base = f64::from(stream.time_base());

        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| CasError::decode(format!("audio decoder context: {e}")))?;
        let codec_name = ffmpeg::decoder::find(dec_ctx.id())
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let decoder = dec_ctx
            .decoder()
            .audio()
            .map_err(|e| CasError::decode(format!("unsupported audio codec: {e}")))?;

        let rate = decoder.rate().max(1);
        let stereo = decoder.ch_layout().channels() >= 2;

        log::debug!(
            "audio stream: {codec_name}, {rate} Hz, {} ch ← {}",
            decoder.ch_layout().channels(),
            path.display()
        );

        Ok(Some(Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            stream_idx,
            resampler: None,
            time_base,
            window: window.unwrap_or((0.0, None)),
            rate,
            stereo,
            codec_name,
            draining: false,
            finished: false,
        }))
    }

    /// Native sample rate the output frames use.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn stereo(&self) -> bool {
        self.stereo
    }

    /// Original codec name (container compatibility logic and logging).
    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    /// Next float-planar frame inside the window, trimmed at the boundaries.
    pub fn next_frame(&mut self) -> Option<Result<AudioFrame>> {
        if self.finished {
            return None;
        }
        loop {
            let mut raw = AudioFrame::empty();
            while self.decoder.receive_frame(&mut raw).is_ok() {
                let pts_secs = raw.pts().map(|p| p as f64 * self.time_base).unwrap_or(0.0);
                match self.windowed(&raw, pts_secs) {
                    Ok(Some(frame)) => return Some(Ok(frame)),
                    Ok(None) => {
                        if self.finished {
                            return None;
                        }
                        continue;
                    }
                    Err(e) => return Some(Err(e)),
                }
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
                    // A bad audio packet should not abort the compilation.
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::warn!("{}: skipping audio packet: {e}", self.path.display());
                    }
                }
                Some(Err(e)) => {
                    log::warn!("{}: audio demux error: {e}", self.path.display());
                }
                None => {
                    let _ = self.decoder.send_eof();
                    self.draining = true;
                }
            }
        }
    }

    /// Resample to FLTP and apply the trim window. Ok(None) means the frame
    /// fell outside the window (or ended it, setting `finished`).
    fn windowed(&mut self, raw: &AudioFrame, pts_secs: f64) -> Result<Option<AudioFrame>> {
        let fltp = self.to_fltp(raw)?;
        let n = fltp.samples();
        if n == 0 {
            return Ok(None);
        }

        let (start, end) = self.window;
        let frame_end = pts_secs + n as f64 / self.rate as f64;

        if frame_end <= start {
            return Ok(None);
        }
        if let Some(end) = end {
            if pts_secs >= end {
                self.finished = true;
                return Ok(None);
            }
        }

        let skip = if pts_secs < start {
            (((start - pts_secs) * self.rate as f64).round() as usize).min(n)
        } else {
            0
        };
        let mut take = n - skip;
        if let Some(end) = end {
            if frame_end > end {
                let keep = (((end - pts_secs) * self.rate as f64).round() as usize)
                    .saturating_sub(skip);
                take = take.min(keep);
            }
        }
        if take == 0 {
            return Ok(None);
        }

        if skip == 0 && take == n {
            return Ok(Some(fltp));
        }
        // Truncated boundary frame: re-slice with the pts moved forward by
        // the skipped samples.
        let new_pts_secs = pts_secs + skip as f64 / self.rate as f64;
        let mut out = slice_planar(&fltp, skip, take, self.rate);
        out.set_pts(Some((new_pts_secs * self.rate as f64).round() as i64));
        Ok(Some(out))
    }

    /// Resampler created lazily from the first frame's actual format.
    /// Sources already in FLTP with ≤2 channels pass through untouched.
    fn to_fltp(&mut self, raw: &AudioFrame) -> Result<AudioFrame> {
        let channels = raw.ch_layout().channels();
        let needs_resample = raw.format() != FLTP || raw.rate() != self.rate || channels > 2;
        if !needs_resample {
            let mut out = raw.clone();
            out.set_pts(raw.pts());
            return Ok(out);
        }

        let dst_layout = if self.stereo {
            ChannelLayout::STEREO
        } else {
            ChannelLayout::MONO
        };
        let rate = self.rate;
        if self.resampler.is_none() {
            let src_layout = if channels >= 2 {
                raw.ch_layout()
            } else {
                ChannelLayout::MONO
            };
            let ctx = resampling::Context::get2(
                raw.format(),
                src_layout,
                raw.rate(),
                FLTP,
                dst_layout,
                rate,
            )
            .map_err(|e| CasError::decode(format!("create audio resampler: {e}")))?;
            self.resampler = Some(ctx);
        }

        let rs = self.resampler.as_mut().unwrap();
        let mut out = AudioFrame::empty();
        rs.run(raw, &mut out)
            .map_err(|e| CasError::decode(format!("resample audio: {e}")))?;
        out.set_pts(raw.pts());
        Ok(out)
    }
}

/// Copy `take` samples starting at `skip` out of a float-planar frame.
pub fn slice_planar(src: &AudioFrame, skip: usize, take: usize, rate: u32) -> AudioFrame {
    let channels = src.ch_layout().channels().max(1) as usize;
    let mask = if channels >= 2 {
        ChannelLayoutMask::STEREO
    } else {
        ChannelLayoutMask::MONO
    };
    let mut out = AudioFrame::new(FLTP, take, mask);
    out.set_rate(rate);
    unsafe {
        for ch in 0..channels.min(2) {
            let src_bytes = src.data(ch);
            let src_f32 =
                std::slice::from_raw_parts(src_bytes.as_ptr() as *const f32, skip + take);
            let dst_bytes = out.data_mut(ch);
            let dst_f32 =
                std::slice::from_raw_parts_mut(dst_bytes.as_mut_ptr() as *mut f32, take);
            dst_f32.copy_from_slice(&src_f32[skip..skip + take]);
        }
    }
    out
}
