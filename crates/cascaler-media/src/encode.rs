// crates/cascaler-media/src/encode.rs
//
// Video and audio encoders for the compilation sink.
//
// Video PTS strategy: a monotonically increasing frame counter in 1/fps —
// the upstream ordering buffer guarantees submission order, so the counter
// IS the presentation order.
//
// Audio: AAC wants exactly frame_size (1024) samples per call. Decoded and
// filtered frames arrive in arbitrary chunk sizes, so all PCM drains into a
// planar FIFO; full frames are popped with pts = cumulative sample count in
// 1/rate, and the tail is zero-padded on the final flush.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{Pixel, Sample};
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;
use image::RgbImage;

use cascaler_core::{CasError, Result};

use crate::convert::{self, Converter};

// ── Video ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub crf: u32,
    pub preset: String,
    pub codec: String,
    pub pixel_format: String,
}

fn find_video_codec(name: &str) -> Option<ffmpeg::Codec> {
    if let Some(c) = encoder::find_by_name(name) {
        return Some(c);
    }
    match name.to_ascii_lowercase().as_str() {
        "h264" | "x264" | "libx264" => encoder::find(CodecId::H264),
        "h265" | "hevc" | "x265" | "libx265" => encoder::find(CodecId::HEVC),
        _ => None,
    }
}

pub struct VideoEncoder {
    encoder: encoder::video::Video,
    codec: ffmpeg::Codec,
    converter: Converter,
    time_base: Rational,
    frame_idx: i64,
}

impl VideoEncoder {
    pub fn new(settings: &VideoSettings) -> Result<Self> {
        let codec = find_video_codec(&settings.codec).ok_or_else(|| {
            CasError::encode(format!(
                "video encoder '{}' not found — is the codec library available?",
                settings.codec
            ))
        })?;

        let fps = settings.fps.round().max(1.0) as i32;
        let time_base = Rational::new(1, fps);
        let pix_fmt = convert::parse_pixel_format(&settings.pixel_format);

        let enc_ctx = codec::context::Context::new();
        let mut enc = enc_ctx
            .encoder()
            .video()
            .map_err(|e| CasError::encode(format!("create video encoder context: {e}")))?;

        enc.set_width(settings.width);
        enc.set_height(settings.height);
        enc.set_format(pix_fmt);
        enc.set_time_base(time_base);
        enc.set_frame_rate(Some(Rational::new(fps, 1)));
        enc.set_bit_rate(0); // CRF controls quality; bit_rate 0 signals VBR

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("crf", &settings.crf.to_string());
        opts.set("preset", &settings.preset);

        let mut encoder = enc
            .open_as_with(codec, opts)
            .map_err(|e| CasError::encode(format!("open '{}' encoder: {e}", settings.codec)))?;

        // Square pixels; must be set on the opened context because codec init
        // resets sample_aspect_ratio, and the muxer copies parameters from
        // the post-open context.
        encoder.set_aspect_ratio(Rational::new(1, 1));

        let converter = Converter::new(
            Pixel::RGB24,
            settings.width,
            settings.height,
            pix_fmt,
            settings.width,
            settings.height,
        )?;

        Ok(Self {
            encoder,
            codec,
            converter,
            time_base,
            frame_idx: 0,
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub(crate) fn codec(&self) -> ffmpeg::Codec {
        self.codec
    }

    pub(crate) fn context(&self) -> &encoder::video::Video {
        &self.encoder
    }

    /// Encode one frame (already at output dimensions). Returns the packets
    /// the codec emitted for it, possibly none while its lookahead fills.
    pub fn send(&mut self, image: &RgbImage) -> Result<Vec<Packet>> {
        let rgb = convert::rgb_image_to_frame(image);
        let mut frame = self.converter.run(&rgb)?;
        frame.set_pts(Some(self.frame_idx));
        self.frame_idx += 1;

        self.encoder
            .send_frame(&frame)
            .map_err(|e| CasError::encode(format!("send video frame: {e}")))?;
        Ok(self.receive_packets())
    }

    /// End-of-stream: drain the codec's lookahead.
    pub fn finish(&mut self) -> Result<Vec<Packet>> {
        self.encoder
            .send_eof()
            .map_err(|e| CasError::encode(format!("flush video encoder: {e}")))?;
        Ok(self.receive_packets())
    }

    pub fn frames_sent(&self) -> i64 {
        self.frame_idx
    }

    fn receive_packets(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            packets.push(pkt);
            pkt = Packet::empty();
        }
        packets
    }
}

// ── Audio ─────────────────────────────────────────────────────────────────────

/// Float-planar sample ring buffer. Mono input with a stereo encoder is
/// duplicated onto both planes.
struct PlanarFifo {
    planes: Vec<Vec<f32>>,
}

impl PlanarFifo {
    fn new(channels: usize) -> Self {
        Self {
            planes: vec![Vec::new(); channels.max(1)],
        }
    }

    fn len(&self) -> usize {
        self.planes[0].len()
    }

    fn push(&mut self, frame: &AudioFrame) {
        let n = frame.samples();
        if n == 0 {
            return;
        }
        let src_channels = frame.ch_layout().channels().max(1) as usize;
        unsafe {
            for (ch, plane) in self.planes.iter_mut().enumerate() {
                // Missing source channels fall back to channel 0.
                let src_ch = if ch < src_channels { ch } else { 0 };
                let bytes = frame.data(src_ch);
                let f32s = std::slice::from_raw_parts(bytes.as_ptr() as *const f32, n);
                plane.extend_from_slice(f32s);
            }
        }
    }

    /// Pop exactly `n` samples per channel; short tails are zero-padded
    /// (final flush only).
    fn pop_frame(&mut self, n: usize, pts: i64, rate: u32) -> AudioFrame {
        let available = self.len().min(n);
        let mask = if self.planes.len() >= 2 {
            ChannelLayoutMask::STEREO
        } else {
            ChannelLayoutMask::MONO
        };
        let mut frame = AudioFrame::new(Sample::F32(SampleType::Planar), n, mask);
        frame.set_rate(rate);
        frame.set_pts(Some(pts));
        unsafe {
            for (ch, plane) in self.planes.iter_mut().enumerate() {
                let bytes = frame.data_mut(ch);
                let dst = std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut f32, n);
                dst[..available].copy_from_slice(&plane[..available]);
                if available < n {
                    dst[available..].fill(0.0);
                }
                plane.drain(..available);
            }
        }
        frame
    }
}

pub struct AudioEncoder {
    encoder: encoder::audio::Audio,
    codec: ffmpeg::Codec,
    fifo: PlanarFifo,
    /// AAC frame size in samples (typically 1024).
    frame_size: usize,
    /// Next output pts in samples (stream timebase = 1/rate).
    next_pts: i64,
    rate: u32,
    time_base: Rational,
}

impl AudioEncoder {
    /// AAC-LC at the decoder's native rate and (≤2ch) layout.
    pub fn new(rate: u32, stereo: bool) -> Result<Self> {
        let aac = encoder::find(CodecId::AAC)
            .ok_or_else(|| CasError::encode("AAC encoder not found".to_string()))?;

        let enc_ctx = codec::context::Context::new();
        let mut enc = enc_ctx
            .encoder()
            .audio()
            .map_err(|e| CasError::encode(format!("create audio encoder context: {e}")))?;

        let layout = if stereo {
            ChannelLayout::STEREO
        } else {
            ChannelLayout::MONO
        };
        enc.set_rate(rate as i32);
        enc.set_ch_layout(layout);
        enc.set_format(Sample::F32(SampleType::Planar));
        enc.set_bit_rate(128_000);

        let encoder = enc
            .open_as_with(aac, ffmpeg::Dictionary::new())
            .map_err(|e| CasError::encode(format!("open AAC encoder: {e}")))?;

        // Guard against a codec reporting 0 (shouldn't happen with AAC).
        let frame_size = (encoder.frame_size() as usize).max(1024);

        Ok(Self {
            encoder,
            codec: aac,
            fifo: PlanarFifo::new(if stereo { 2 } else { 1 }),
            frame_size,
            next_pts: 0,
            rate,
            time_base: Rational::new(1, rate as i32),
        })
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub(crate) fn codec(&self) -> ffmpeg::Codec {
        self.codec
    }

    pub(crate) fn context(&self) -> &encoder::audio::Audio {
        &self.encoder
    }

    /// Seconds of audio handed to the codec so far.
    pub fn clock_secs(&self) -> f64 {
        self.next_pts as f64 / self.rate as f64
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        self.fifo.push(frame);
    }

    /// Encode every full frame buffered in the FIFO. With `flush` the tail is
    /// zero-padded and sent too.
    pub fn drain(&mut self, flush: bool) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        while self.fifo.len() >= self.frame_size || (flush && self.fifo.len() > 0) {
            let frame = self.fifo.pop_frame(self.frame_size, self.next_pts, self.rate);
            self.next_pts += self.frame_size as i64;
            self.encoder
                .send_frame(&frame)
                .map_err(|e| CasError::encode(format!("send audio frame: {e}")))?;
            self.receive_packets(&mut packets);
        }
        Ok(packets)
    }

    /// Flush the FIFO tail and the codec itself.
    pub fn finish(&mut self) -> Result<Vec<Packet>> {
        let mut packets = self.drain(true)?;
        self.encoder
            .send_eof()
            .map_err(|e| CasError::encode(format!("flush audio encoder: {e}")))?;
        self.receive_packets(&mut packets);
        Ok(packets)
    }

    fn receive_packets(&mut self, packets: &mut Vec<Packet>) {
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            packets.push(pkt);
            pkt = Packet::empty();
        }
    }
}
