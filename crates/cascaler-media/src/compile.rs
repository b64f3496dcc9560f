// crates/cascaler-media/src/compile.rs
//
// VideoCompilation: the streaming sink for video outputs. The processor
// submits carved frames in strict index order; a dedicated thread owns the
// encoders and the muxer (native contexts are single-owner) and drives the
// audio pipeline alongside the video clock so the muxer can interleave by
// dts without buffering a whole stream.
//
// Any error — and cancellation — tears down both streams and removes the
// partial output file; the first error is what finish() reports.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use image::RgbImage;

use cascaler_core::sink::{FrameSink, ProcessedFrame};
use cascaler_core::{CasError, Result};

use crate::afilter::AudioFilter;
use crate::audio::AudioDecoder;
use crate::encode::{AudioEncoder, VideoEncoder, VideoSettings};
use crate::mux::Muxer;

/// How far ahead of the video clock the audio stream is encoded, in seconds.
/// Keeps the interleave queue shallow without starving either stream.
const AUDIO_LEAD_SECS: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct CompileSettings {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: usize,
    pub crf: u32,
    pub preset: String,
    pub codec: String,
    pub pixel_format: String,
    /// When set, audio is decoded from this container, optionally filtered,
    /// re-encoded to AAC, and muxed alongside the video.
    pub source_video: Option<PathBuf>,
    /// Trim window shared with the video decode (start, end).
    pub window: Option<(f64, Option<f64>)>,
    pub vibrato: bool,
}

pub struct VideoCompilation {
    tx: Option<Sender<(usize, RgbImage)>>,
    handle: Option<JoinHandle<()>>,
    error: Arc<Mutex<Option<CasError>>>,
    cancel: Arc<AtomicBool>,
    output: PathBuf,
}

impl VideoCompilation {
    /// Spawn the encode/mux thread. Initialization errors surface on the
    /// first submit (the thread parks them in the shared error slot).
    pub fn start(settings: CompileSettings, cancel: Arc<AtomicBool>) -> Self {
        // Capacity 8: the ordering buffer upstream already bounds memory;
        // this only smooths submit latency against encoder hiccups.
        let (tx, rx) = bounded::<(usize, RgbImage)>(8);
        let error: Arc<Mutex<Option<CasError>>> = Arc::new(Mutex::new(None));
        let output = settings.output.clone();

        let thread_error = Arc::clone(&error);
        let thread_cancel = Arc::clone(&cancel);
        let handle = thread::spawn(move || {
            let out_path = settings.output.clone();
            if let Err(e) = run_compile(settings, rx, thread_cancel) {
                // Leave no partial container behind, success path excepted.
                let _ = std::fs::remove_file(&out_path);
                *thread_error.lock().unwrap() = Some(e);
            }
        });

        Self {
            tx: Some(tx),
            handle: Some(handle),
            error,
            cancel,
            output,
        }
    }

    fn take_error(&self) -> Option<CasError> {
        self.error.lock().unwrap().take()
    }

    fn join(&mut self) {
        self.tx.take(); // closing the channel is the EOS signal
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl FrameSink for VideoCompilation {
    fn submit(&mut self, frame: ProcessedFrame) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Err(CasError::encode("compilation already finished".to_string()));
        };
        if tx.send((frame.index, frame.image)).is_err() {
            // Thread died; report its error instead of the broken channel.
            return Err(self
                .take_error()
                .unwrap_or_else(|| CasError::encode("compilation pipeline terminated".to_string())));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.join();
        match self.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn abort(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.join();
        // The thread removes the file on error/cancel; double-check in case
        // it was killed between write and cleanup.
        if self.output.exists() && self.take_error().is_some() {
            let _ = std::fs::remove_file(&self.output);
        }
    }
}

// ── Audio side of the pipeline ────────────────────────────────────────────────

struct AudioPipeline {
    decoder: AudioDecoder,
    filter: AudioFilter,
    encoder: AudioEncoder,
    source_done: bool,
}

impl AudioPipeline {
    /// Ok(None) when the source has no audio stream.
    fn open(
        source: &PathBuf,
        window: Option<(f64, Option<f64>)>,
        vibrato: bool,
    ) -> Result<Option<Self>> {
        let Some(decoder) = AudioDecoder::open(source, window)? else {
            log::info!("{}: no audio stream, video-only output", source.display());
            return Ok(None);
        };
        log::debug!(
            "audio: {} -> aac @ {} Hz{}",
            decoder.codec_name(),
            decoder.rate(),
            if vibrato { " (vibrato+tremolo)" } else { "" }
        );
        let filter = AudioFilter::new(vibrato, decoder.rate(), decoder.stereo())?;
        let encoder = AudioEncoder::new(decoder.rate(), decoder.stereo())?;
        Ok(Some(Self {
            decoder,
            filter,
            encoder,
            source_done: false,
        }))
    }

    /// Advance the audio stream until its clock passes `until_secs` (or the
    /// source runs dry), writing encoded packets through the muxer.
    fn pump(&mut self, muxer: &mut Muxer, until_secs: f64) -> Result<()> {
        while !self.source_done && self.encoder.clock_secs() < until_secs {
            match self.decoder.next_frame() {
                Some(Ok(frame)) => {
                    self.filter.push(frame)?;
                    while let Some(filtered) = self.filter.pull() {
                        self.encoder.push(&filtered);
                    }
                    for pkt in self.encoder.drain(false)? {
                        muxer.write_audio(pkt)?;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => self.source_done = true,
            }
        }
        Ok(())
    }

    /// Drain the rest of the source, the filter tail, and the encoder.
    fn finish(&mut self, muxer: &mut Muxer) -> Result<()> {
        self.pump(muxer, f64::INFINITY)?;
        self.filter.flush()?;
        while let Some(filtered) = self.filter.pull() {
            self.encoder.push(&filtered);
        }
        for pkt in self.encoder.finish()? {
            muxer.write_audio(pkt)?;
        }
        Ok(())
    }
}

// ── Compilation thread ────────────────────────────────────────────────────────

fn run_compile(
    settings: CompileSettings,
    rx: Receiver<(usize, RgbImage)>,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let video_settings = VideoSettings {
        width: settings.width,
        height: settings.height,
        fps: settings.fps,
        crf: settings.crf,
        preset: settings.preset.clone(),
        codec: settings.codec.clone(),
        pixel_format: settings.pixel_format.clone(),
    };
    let mut video = VideoEncoder::new(&video_settings)?;

    let mut audio = match &settings.source_video {
        Some(source) => AudioPipeline::open(source, settings.window, settings.vibrato)?,
        None => None,
    };

    let mut muxer = Muxer::create(&settings.output)?;
    muxer.add_video_stream(&video)?;
    if let Some(a) = &audio {
        muxer.add_audio_stream(&a.encoder)?;
    }
    muxer.write_header()?;
    log::debug!(
        "compiling ~{} frames at {:.3} fps -> {}",
        settings.total_frames,
        settings.fps,
        settings.output.display()
    );

    let fps = settings.fps.max(1.0);
    let mut expected = 0usize;

    for (index, image) in rx.iter() {
        if cancel.load(Ordering::Relaxed) {
            return Err(CasError::Cancelled);
        }
        // The ordering buffer upstream guarantees monotonic submission. A
        // gap is a frame that failed processing: the stream just gets one
        // frame shorter.
        if index < expected {
            return Err(CasError::encode(format!(
                "frame {index} submitted out of order (expected {expected})"
            )));
        }
        if index > expected {
            log::warn!("frame(s) {expected}..{index} missing, output will be shorter");
        }
        expected = index + 1;

        for pkt in video.send(&image)? {
            muxer.write_video(pkt)?;
        }
        if let Some(a) = audio.as_mut() {
            let video_clock = video.frames_sent() as f64 / fps;
            a.pump(&mut muxer, video_clock + AUDIO_LEAD_SECS)?;
        }
    }

    if cancel.load(Ordering::Relaxed) {
        return Err(CasError::Cancelled);
    }

    for pkt in video.finish()? {
        muxer.write_video(pkt)?;
    }
    if let Some(a) = audio.as_mut() {
        a.finish(&mut muxer)?;
    }
    muxer.finalize()?;

    log::debug!(
        "compiled {} frames -> {}",
        video.frames_sent(),
        settings.output.display()
    );
    Ok(())
}
