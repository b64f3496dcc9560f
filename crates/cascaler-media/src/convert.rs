// crates/cascaler-media/src/convert.rs
//
// Pixel-format conversion and the RGB24 frame ↔ image::RgbImage bridge.
// FFmpeg frames carry per-row stride padding; every copy here strips or
// restores it row by row so buffers stay exactly w*h*channels.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use image::RgbImage;

use cascaler_core::{CasError, Result};

/// Bilinear scaling context between two (format, size) pairs. Output frames
/// keep the input frame's pts.
pub struct Converter {
    ctx: SwsContext,
}

impl Converter {
    pub fn new(
        src_format: Pixel,
        src_w: u32,
        src_h: u32,
        dst_format: Pixel,
        dst_w: u32,
        dst_h: u32,
    ) -> Result<Self> {
        let ctx = SwsContext::get(
            src_format, src_w, src_h, dst_format, dst_w, dst_h, Flags::BILINEAR,
        )
        .map_err(|e| CasError::decode(format!("create scaling context: {e}")))?;
        Ok(Self { ctx })
    }

    pub fn run(&mut self, input: &VideoFrame) -> Result<VideoFrame> {
        let mut out = VideoFrame::empty();
        self.ctx
            .run(input, &mut out)
            .map_err(|e| CasError::decode(format!("scale frame: {e}")))?;
        out.set_pts(input.pts());
        Ok(out)
    }
}

/// Strip stride padding from an RGB24 frame into an owned RgbImage.
pub fn frame_to_rgb_image(frame: &VideoFrame) -> Option<RgbImage> {
    if frame.format() != Pixel::RGB24 {
        return None;
    }
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let stride = frame.stride(0);
    let raw = frame.data(0);
    let row_bytes = w * 3;
    let data: Vec<u8> = (0..h)
        .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
        .copied()
        .collect();
    RgbImage::from_raw(w as u32, h as u32, data)
}

/// Materialize an RgbImage as an RGB24 frame, restoring the frame's stride.
pub fn rgb_image_to_frame(image: &RgbImage) -> VideoFrame {
    let (w, h) = (image.width(), image.height());
    let mut frame = VideoFrame::new(Pixel::RGB24, w, h);
    let stride = frame.stride(0);
    let row_bytes = w as usize * 3;
    let src = image.as_raw();
    let dst = frame.data_mut(0);
    for row in 0..h as usize {
        dst[row * stride..row * stride + row_bytes]
            .copy_from_slice(&src[row * row_bytes..(row + 1) * row_bytes]);
    }
    frame
}

/// Encoder pixel-format names accepted on the CLI and in configuration.
pub fn parse_pixel_format(name: &str) -> Pixel {
    match name.to_ascii_lowercase().as_str() {
        "yuv420p" => Pixel::YUV420P,
        "yuv422p" => Pixel::YUV422P,
        "yuv444p" => Pixel::YUV444P,
        "nv12" => Pixel::NV12,
        other => {
            log::warn!("unknown pixel format '{other}', using yuv420p");
            Pixel::YUV420P
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_round_trip_preserves_pixels() {
        let img = RgbImage::from_fn(31, 17, |x, y| {
            image::Rgb([(x * 3) as u8, (y * 5) as u8, (x + y) as u8])
        });
        // 31 px wide forces stride != row_bytes on aligned allocations.
        let frame = rgb_image_to_frame(&img);
        let back = frame_to_rgb_image(&frame).unwrap();
        assert_eq!(back.as_raw(), img.as_raw());
    }

    #[test]
    fn non_rgb_frame_is_rejected() {
        let frame = VideoFrame::new(Pixel::YUV420P, 8, 8);
        assert!(frame_to_rgb_image(&frame).is_none());
    }

    #[test]
    fn pixel_format_fallback() {
        assert_eq!(parse_pixel_format("YUV444P"), Pixel::YUV444P);
        assert_eq!(parse_pixel_format("bogus"), Pixel::YUV420P);
    }
}
