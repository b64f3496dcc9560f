// crates/cascaler-core/src/sink.rs
//
// FrameSink: where ordered frames go. Image-file sinks live here; the video
// compilation sink implements the same trait in cascaler-media.

use std::path::PathBuf;

use image::RgbImage;

use crate::carve;
use crate::error::Result;

/// A frame that survived processing, ready for the sink. `out_name` is the
/// producer-chosen file name for image sinks (video sinks key on `index`).
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub index: usize,
    pub image: RgbImage,
    pub source: String,
    pub out_name: String,
}

/// Consumes frames in strict index order (the processor's ordering buffer
/// guarantees the order).
pub trait FrameSink: Send {
    fn submit(&mut self, frame: ProcessedFrame) -> Result<()>;
    /// Called once after the last frame; flushes and commits the output.
    fn finish(&mut self) -> Result<()>;
    /// Best-effort cleanup on cancellation or a fatal error.
    fn abort(&mut self);
}

/// Writes each frame as an image file: either a single fixed path or one
/// file per frame inside a directory.
pub enum ImageFileSink {
    Single(PathBuf),
    Directory(PathBuf),
}

impl FrameSink for ImageFileSink {
    fn submit(&mut self, frame: ProcessedFrame) -> Result<()> {
        let path = match self {
            Self::Single(path) => path.clone(),
            Self::Directory(dir) => dir.join(&frame.out_name),
        };
        carve::save_image(&frame.image, &path)?;
        log::debug!("wrote {}", path.display());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    fn abort(&mut self) {
        // Already-written frames are left in place; they are valid images.
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Records submission order for the ordering invariant tests.
    #[derive(Default)]
    pub struct CollectSink {
        pub indices: Vec<usize>,
        pub finished: bool,
        pub aborted: bool,
    }

    impl FrameSink for CollectSink {
        fn submit(&mut self, frame: ProcessedFrame) -> Result<()> {
            self.indices.push(frame.index);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }

        fn abort(&mut self) {
            self.aborted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([1, 2, 3]))
    }

    #[test]
    fn directory_sink_names_from_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ImageFileSink::Directory(dir.path().join("out"));
        sink.submit(ProcessedFrame {
            index: 0,
            image: px(3, 3),
            source: "a.png".into(),
            out_name: "a.png".into(),
        })
        .unwrap();
        sink.finish().unwrap();
        assert!(dir.path().join("out").join("a.png").is_file());
    }

    #[test]
    fn single_sink_writes_fixed_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b-cas.png");
        let mut sink = ImageFileSink::Single(path.clone());
        sink.submit(ProcessedFrame {
            index: 0,
            image: px(2, 2),
            source: "b.png".into(),
            out_name: String::new(),
        })
        .unwrap();
        assert!(path.is_file());
    }
}
