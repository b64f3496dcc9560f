// crates/cascaler-core/src/dimensions.rs
//
// DimensionPlan: start/end targets plus per-frame interpolation for gradual
// scaling. Derived once per job from the options and the source's intrinsic
// dimensions; workers only ever call frame_dims(index).

use crate::error::Result;
use crate::options::ProcessOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionPlan {
    pub start_w: u32,
    pub start_h: u32,
    pub end_w: u32,
    pub end_h: u32,
    pub total_frames: usize,
}

fn percent_dims(w: u32, h: u32, pct: f64) -> (u32, u32) {
    let sw = (w as f64 * pct / 100.0).round() as u32;
    let sh = (h as f64 * pct / 100.0).round() as u32;
    (sw.max(1), sh.max(1))
}

impl DimensionPlan {
    /// Resolve start/end targets against the source's intrinsic dimensions.
    /// Without any start option the start equals the end target (uniform
    /// scaling); an unspecified dimension in a width/height form keeps the
    /// original value.
    pub fn from_options(
        opts: &ProcessOptions,
        original_w: u32,
        original_h: u32,
        total_frames: usize,
    ) -> Result<Self> {
        let (end_w, end_h) = if let Some(pct) = opts.percent {
            percent_dims(original_w, original_h, pct)
        } else {
            (
                opts.width.unwrap_or(original_w).max(1),
                opts.height.unwrap_or(original_h).max(1),
            )
        };

        let (start_w, start_h) = if let Some(pct) = opts.start_percent {
            percent_dims(original_w, original_h, pct)
        } else if opts.start_width.is_some() || opts.start_height.is_some() {
            (
                opts.start_width.unwrap_or(original_w).max(1),
                opts.start_height.unwrap_or(original_h).max(1),
            )
        } else {
            // No start option: uniform scaling at the end target.
            (end_w, end_h)
        };

        Ok(Self {
            start_w,
            start_h,
            end_w,
            end_h,
            total_frames,
        })
    }

    /// Gradual scaling is active iff start and end differ in some dimension.
    pub fn is_gradual(&self) -> bool {
        self.start_w != self.end_w || self.start_h != self.end_h
    }

    /// Interpolated target for frame `index` (0-based) of `total_frames`.
    pub fn frame_dims(&self, index: usize) -> (u32, u32) {
        if self.total_frames <= 1 || !self.is_gradual() {
            return (self.end_w, self.end_h);
        }
        let t = index as f64 / (self.total_frames - 1) as f64;
        let w = self.start_w as f64 + (self.end_w as f64 - self.start_w as f64) * t;
        let h = self.start_h as f64 + (self.end_h as f64 - self.start_h as f64) * t;
        ((w.round() as u32).max(1), (h.round() as u32).max(1))
    }

    /// Uniform output size for the scale-back post-step: the component-wise
    /// max of start and end, so every frame of a sequence shares dimensions.
    pub fn uniform_target(&self) -> (u32, u32) {
        (
            self.start_w.max(self.end_w),
            self.start_h.max(self.end_h),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FrameFormat;
    use std::path::PathBuf;

    fn opts() -> ProcessOptions {
        ProcessOptions {
            input: PathBuf::from("."),
            output: None,
            width: None,
            height: None,
            percent: None,
            start_width: None,
            start_height: None,
            start_percent: None,
            start: None,
            end: None,
            duration: None,
            format: FrameFormat::Png,
            fps: None,
            delta_x: 1.0,
            rigidity: 0.0,
            threads: None,
            progress: false,
            scale_back: false,
            crf: 23,
            preset: "medium".into(),
            codec: "libx264".into(),
            pixel_format: "yuv420p".into(),
            vibrato: false,
        }
    }

    #[test]
    fn percent_rounds_and_clamps() {
        let mut o = opts();
        o.percent = Some(50.0);
        let p = DimensionPlan::from_options(&o, 1000, 500, 1).unwrap();
        assert_eq!((p.end_w, p.end_h), (500, 250));

        // A tiny source never collapses to zero.
        let mut o = opts();
        o.percent = Some(1.0);
        let p = DimensionPlan::from_options(&o, 10, 10, 1).unwrap();
        assert_eq!((p.end_w, p.end_h), (1, 1));
    }

    #[test]
    fn width_only_keeps_original_height() {
        let mut o = opts();
        o.width = Some(640);
        let p = DimensionPlan::from_options(&o, 1920, 1080, 1).unwrap();
        assert_eq!((p.end_w, p.end_h), (640, 1080));
    }

    #[test]
    fn no_start_option_means_uniform_scaling() {
        // `-p 50` alone must not trigger gradual scaling: every frame of a
        // sequence gets the same 50% target.
        let mut o = opts();
        o.percent = Some(50.0);
        let p = DimensionPlan::from_options(&o, 800, 600, 5).unwrap();
        assert_eq!((p.start_w, p.start_h), (400, 300));
        assert!(!p.is_gradual());
        assert_eq!(p.frame_dims(0), (400, 300));
        assert_eq!(p.uniform_target(), (400, 300));
    }

    #[test]
    fn batch_gradual_interpolation() {
        // 5 frames, 800x600, -sp 100 -p 50.
        let mut o = opts();
        o.start_percent = Some(100.0);
        o.percent = Some(50.0);
        let p = DimensionPlan::from_options(&o, 800, 600, 5).unwrap();
        let widths: Vec<u32> = (0..5).map(|i| p.frame_dims(i).0).collect();
        let heights: Vec<u32> = (0..5).map(|i| p.frame_dims(i).1).collect();
        assert_eq!(widths, vec![800, 700, 600, 500, 400]);
        assert_eq!(heights, vec![600, 525, 450, 375, 300]);
    }

    #[test]
    fn single_frame_uses_end() {
        let mut o = opts();
        o.start_percent = Some(100.0);
        o.percent = Some(50.0);
        let p = DimensionPlan::from_options(&o, 800, 600, 1).unwrap();
        assert_eq!(p.frame_dims(0), (400, 300));
    }

    #[test]
    fn not_gradual_when_start_equals_end() {
        let mut o = opts();
        o.start_percent = Some(50.0);
        o.percent = Some(50.0);
        let p = DimensionPlan::from_options(&o, 800, 600, 10).unwrap();
        assert!(!p.is_gradual());
        assert_eq!(p.frame_dims(3), (400, 300));
    }

    #[test]
    fn uniform_target_is_componentwise_max() {
        let p = DimensionPlan {
            start_w: 800,
            start_h: 300,
            end_w: 400,
            end_h: 600,
            total_frames: 10,
        };
        assert_eq!(p.uniform_target(), (800, 600));
    }
}
