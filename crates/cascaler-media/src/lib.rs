// crates/cascaler-media/src/lib.rs
//
// Everything that touches FFmpeg lives in this crate: probing, demux/decode,
// the audio filter graph, pixel conversion, encoding, muxing, and the
// streaming video-compilation sink. cascaler-core stays binding-free and
// talks to this crate through its FrameSource/FrameSink traits.

pub mod afilter;
pub mod audio;
pub mod compile;
pub mod convert;
pub mod decode;
pub mod encode;
pub mod mux;
pub mod probe;

pub use compile::{CompileSettings, VideoCompilation};
pub use decode::{VideoDecoder, VideoFrameSource};
pub use probe::{probe, MediaInfo};

/// Must be called once before any other function in this crate.
pub fn init() -> cascaler_core::Result<()> {
    ffmpeg_the_third::init()
        .map_err(|e| cascaler_core::CasError::decode(format!("FFmpeg init failed: {e}")))
}
