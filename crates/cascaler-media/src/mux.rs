// crates/cascaler-media/src/mux.rs
//
// Muxer: .mp4/.mkv output container. Streams are registered from the opened
// encoder contexts (codecpar copied via FFI — the safe wrapper has no
// AsPtr<AVCodecParameters> impl for encoders), packets are rescaled from the
// encoder timebase to the muxer-assigned stream timebase and written
// interleaved by dts.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;

use cascaler_core::dispatch::is_video_output_path;
use cascaler_core::{CasError, Result};

use crate::encode::{AudioEncoder, VideoEncoder};

struct StreamState {
    index: usize,
    enc_tb: Rational,
    out_tb: Rational,
    last_dts: Option<i64>,
}

pub struct Muxer {
    octx: ffmpeg::format::context::Output,
    path: PathBuf,
    video: Option<StreamState>,
    audio: Option<StreamState>,
}

impl Muxer {
    /// The container is chosen by extension; only .mp4 and .mkv are valid
    /// outputs.
    pub fn create(path: &Path) -> Result<Self> {
        if !is_video_output_path(path) {
            return Err(CasError::validation(format!(
                "Output video must be .mp4 or .mkv: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let octx = ffmpeg::format::output(&path)
            .map_err(|e| CasError::mux(format!("create '{}': {e}", path.display())))?;
        Ok(Self {
            octx,
            path: path.to_path_buf(),
            video: None,
            audio: None,
        })
    }

    pub fn add_video_stream(&mut self, enc: &VideoEncoder) -> Result<()> {
        let mut ost = self
            .octx
            .add_stream(enc.codec())
            .map_err(|e| CasError::mux(format!("add video stream: {e}")))?;
        ost.set_time_base(enc.time_base());
        let index = ost.index();
        self.copy_codecpar(index, unsafe { enc.context().as_ptr() } as *mut ffmpeg::ffi::AVCodecContext)?;
        self.video = Some(StreamState {
            index,
            enc_tb: enc.time_base(),
            out_tb: enc.time_base(), // refreshed by write_header
            last_dts: None,
        });
        Ok(())
    }

    pub fn add_audio_stream(&mut self, enc: &AudioEncoder) -> Result<()> {
        let mut ost = self
            .octx
            .add_stream(enc.codec())
            .map_err(|e| CasError::mux(format!("add audio stream: {e}")))?;
        ost.set_time_base(enc.time_base());
        let index = ost.index();
        self.copy_codecpar(index, unsafe { enc.context().as_ptr() } as *mut ffmpeg::ffi::AVCodecContext)?;
        self.audio = Some(StreamState {
            index,
            enc_tb: enc.time_base(),
            out_tb: enc.time_base(),
            last_dts: None,
        });
        Ok(())
    }

    fn copy_codecpar(&mut self, stream_index: usize, enc: *mut ffmpeg::ffi::AVCodecContext) -> Result<()> {
        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*self.octx.as_mut_ptr()).streams.add(stream_index)).codecpar,
                enc,
            );
            if ret < 0 {
                return Err(CasError::mux(format!(
                    "avcodec_parameters_from_context failed: {ret}"
                )));
            }
        }
        Ok(())
    }

    /// Write the container header and pick up the muxer-assigned stream
    /// timebases (the muxer may override what set_time_base asked for).
    pub fn write_header(&mut self) -> Result<()> {
        self.octx
            .write_header()
            .map_err(|e| CasError::mux(format!("write header: {e}")))?;
        for state in [self.video.as_mut(), self.audio.as_mut()].into_iter().flatten() {
            state.out_tb = self.octx.stream(state.index).unwrap().time_base();
        }
        Ok(())
    }

    pub fn write_video(&mut self, pkt: Packet) -> Result<()> {
        let Self { octx, video, .. } = self;
        let state = video
            .as_mut()
            .ok_or_else(|| CasError::mux("no video stream registered".to_string()))?;
        Self::write_packet(octx, state, pkt)
    }

    pub fn write_audio(&mut self, pkt: Packet) -> Result<()> {
        let Self { octx, audio, .. } = self;
        let state = audio
            .as_mut()
            .ok_or_else(|| CasError::mux("no audio stream registered".to_string()))?;
        Self::write_packet(octx, state, pkt)
    }

    fn write_packet(
        octx: &mut ffmpeg::format::context::Output,
        state: &mut StreamState,
        mut pkt: Packet,
    ) -> Result<()> {
        pkt.set_stream(state.index);
        pkt.rescale_ts(state.enc_tb, state.out_tb);
        // Per-stream dts must be strictly monotonic after rescaling; clamp
        // repeats/regressions (timebase rounding, clock jitter) upward and
        // keep pts >= dts.
        if let (Some(last), Some(dts)) = (state.last_dts, pkt.dts()) {
            if dts <= last {
                let fixed = last + 1;
                log::warn!(
                    "stream {}: clamping non-monotonic dts {dts} after {last}",
                    state.index
                );
                pkt.set_dts(Some(fixed));
                if pkt.pts().map_or(true, |pts| pts < fixed) {
                    pkt.set_pts(Some(fixed));
                }
            }
        }
        state.last_dts = pkt.dts().or(state.last_dts);
        pkt.write_interleaved(octx)
            .map_err(|e| CasError::mux(format!("write packet: {e}")))
    }

    /// Flush the interleave queue and write the trailer.
    pub fn finalize(mut self) -> Result<()> {
        self.octx
            .write_trailer()
            .map_err(|e| CasError::mux(format!("write trailer: {e}")))?;
        log::info!("wrote {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
