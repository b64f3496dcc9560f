// crates/cascaler-core/src/carve.rs
//
// The image operation: load/save, content-aware rescale, plain resample.
// Carving runs on a helper thread with a deadline so one pathological frame
// cannot stall a worker forever; the result comes back over a rendezvous
// channel (recv_timeout).

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use image::imageops::FilterType;
use image::RgbImage;

use crate::error::{CasError, Result};
use crate::seam;

#[derive(Debug, Clone, Copy)]
pub struct CarveParams {
    /// Seam transversal step (0..1): carving curvature freedom.
    pub delta_x: f64,
    /// Straightness bias (0..10).
    pub rigidity: f64,
    pub timeout: Duration,
}

impl Default for CarveParams {
    fn default() -> Self {
        Self {
            delta_x: 1.0,
            rigidity: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// The content-aware rescale capability the processor is parameterized over.
pub trait LiquidRescaler: Send + Sync {
    /// Produce an image of exactly `target_w` x `target_h`.
    fn rescale(&self, image: &RgbImage, target_w: u32, target_h: u32) -> Result<RgbImage>;
}

/// Seam-carving backend: `delta_x` bounds the per-row seam step, `rigidity`
/// penalizes lateral movement. Output dimensions are always exact.
pub struct SeamCarver {
    params: CarveParams,
}

impl SeamCarver {
    pub fn new(params: CarveParams) -> Self {
        Self { params }
    }
}

/// Format inferred from the extension by the image crate.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let img = image::open(path)?;
    Ok(img.to_rgb8())
}

pub fn save_image(image: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    image.save(path)?;
    Ok(())
}

/// Non-carving resample (scale-back post-step and enlargement fallback).
pub fn resize_exact(image: &RgbImage, w: u32, h: u32) -> RgbImage {
    if image.width() == w && image.height() == h {
        return image.clone();
    }
    image::imageops::resize(image, w.max(1), h.max(1), FilterType::Triangle)
}

/// Carve `image` down to exactly (tw, th). Dimensions that grow fall back to
/// a bilinear resample after carving the shrinking dimension — seam insertion
/// is not implemented.
fn carve_exact(image: &RgbImage, tw: u32, th: u32, params: &CarveParams) -> RgbImage {
    let (w, h) = image.dimensions();
    if tw == w && th == h {
        return image.clone();
    }
    let carve_w = tw.min(w);
    let carve_h = th.min(h);
    let carved = if carve_w < w || carve_h < h {
        seam::shrink(image, carve_w, carve_h, params.delta_x, params.rigidity)
    } else {
        image.clone()
    };
    if carved.dimensions() == (tw, th) {
        carved
    } else {
        resize_exact(&carved, tw, th)
    }
}

impl LiquidRescaler for SeamCarver {
    fn rescale(&self, image: &RgbImage, target_w: u32, target_h: u32) -> Result<RgbImage> {
        let target_w = target_w.max(1);
        let target_h = target_h.max(1);

        let src = Arc::new(image.clone());
        let (tx, rx) = bounded(1);
        let worker_src = Arc::clone(&src);
        let params = self.params;
        // The carve itself cannot be interrupted; on timeout the thread is
        // left to finish and its result is dropped with the sender.
        thread::spawn(move || {
            let out = carve_exact(&worker_src, target_w, target_h, &params);
            let _ = tx.send(out);
        });

        let out = rx.recv_timeout(self.params.timeout).map_err(|_| {
            CasError::carving(format!(
                "timed out after {}s carving to {target_w}x{target_h}",
                self.params.timeout.as_secs()
            ))
        })?;

        if out.dimensions() != (target_w, target_h) {
            return Err(CasError::carving(format!(
                "carved to {}x{} instead of {target_w}x{target_h}",
                out.width(),
                out.height()
            )));
        }
        log::trace!(
            "carved {}x{} -> {target_w}x{target_h} (deltaX={}, rigidity={})",
            src.width(),
            src.height(),
            self.params.delta_x,
            self.params.rigidity
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn rescale_hits_exact_target() {
        let carver = SeamCarver::new(CarveParams::default());
        let img = gradient(40, 30);
        let out = carver.rescale(&img, 20, 15).unwrap();
        assert_eq!(out.dimensions(), (20, 15));
    }

    #[test]
    fn rescale_identity_is_noop() {
        let carver = SeamCarver::new(CarveParams::default());
        let img = gradient(16, 16);
        let out = carver.rescale(&img, 16, 16).unwrap();
        assert_eq!(out.as_raw(), img.as_raw());
    }

    #[test]
    fn enlargement_falls_back_to_resample() {
        let carver = SeamCarver::new(CarveParams::default());
        let img = gradient(20, 20);
        let out = carver.rescale(&img, 30, 10).unwrap();
        assert_eq!(out.dimensions(), (30, 10));
    }

    #[test]
    fn timeout_surfaces_as_carving_error() {
        let carver = SeamCarver::new(CarveParams {
            timeout: Duration::from_millis(1),
            ..CarveParams::default()
        });
        // Large enough that the carve cannot finish in a millisecond.
        let img = gradient(600, 600);
        match carver.rescale(&img, 30, 30) {
            Err(CasError::Carving(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b.png");
        save_image(&gradient(4, 4), &path).unwrap();
        let back = load_image(&path).unwrap();
        assert_eq!(back.dimensions(), (4, 4));
    }
}
