// crates/cascaler-core/src/options.rs
//
// ProcessOptions: the fully-merged description of one run (defaults layered
// under CLI flags by the caller). validate() enforces the mutual-exclusion
// and range invariants before any planning happens.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{CasError, Result};

/// Output format for frame/image file sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Png,
    Jpg,
    Bmp,
    Tiff,
}

impl FrameFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }
}

impl FromStr for FrameFormat {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "bmp" => Ok(Self::Bmp),
            "tiff" | "tif" => Ok(Self::Tiff),
            other => Err(CasError::validation(format!(
                "Unsupported frame format '{other}' (png, jpg, bmp, tiff)"
            ))),
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// One run's options after merging configuration defaults with CLI flags.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub input:  PathBuf,
    pub output: Option<PathBuf>,

    // End target: width/height XOR percent.
    pub width:   Option<u32>,
    pub height:  Option<u32>,
    pub percent: Option<f64>,

    // Start target (gradual scaling): start-width/height XOR start-percent.
    pub start_width:   Option<u32>,
    pub start_height:  Option<u32>,
    pub start_percent: Option<f64>,

    // Time window in seconds: end XOR duration.
    pub start:    Option<f64>,
    pub end:      Option<f64>,
    pub duration: Option<f64>,

    pub format: FrameFormat,
    /// None = unset: video keeps the source rate, sequences use the
    /// configured default.
    pub fps: Option<f64>,

    pub delta_x:  f64,
    pub rigidity: f64,

    pub threads:    Option<usize>,
    pub progress:   bool,
    pub scale_back: bool,

    pub crf:          u32,
    pub preset:       String,
    pub codec:        String,
    pub pixel_format: String,

    pub vibrato: bool,
}

impl ProcessOptions {
    pub fn validate(&self) -> Result<()> {
        if (self.width.is_some() || self.height.is_some()) && self.percent.is_some() {
            return Err(CasError::validation(
                "Cannot specify both width/height and percent",
            ));
        }
        if (self.start_width.is_some() || self.start_height.is_some())
            && self.start_percent.is_some()
        {
            return Err(CasError::validation(
                "Cannot specify both start-width/start-height and start-percent",
            ));
        }
        if self.end.is_some() && self.duration.is_some() {
            return Err(CasError::validation("Cannot specify both end and duration"));
        }
        if let Some(fps) = self.fps {
            if fps <= 0.0 {
                return Err(CasError::validation("FPS must be greater than zero"));
            }
        }
        for (name, value) in [
            ("start", self.start),
            ("end", self.end),
            ("duration", self.duration),
        ] {
            if let Some(v) = value {
                if v < 0.0 {
                    return Err(CasError::validation(format!(
                        "Time value '{name}' must not be negative"
                    )));
                }
            }
        }
        if let (Some(s), Some(e)) = (self.start, self.end) {
            if s >= e {
                return Err(CasError::validation("Start time must be before end time"));
            }
        }
        if let Some(p) = self.percent {
            if p <= 0.0 {
                return Err(CasError::validation("Percent must be greater than zero"));
            }
        }
        if let Some(p) = self.start_percent {
            if p <= 0.0 {
                return Err(CasError::validation(
                    "Start percent must be greater than zero",
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.delta_x) {
            return Err(CasError::validation("deltaX must be between 0 and 1"));
        }
        if !(0.0..=10.0).contains(&self.rigidity) {
            return Err(CasError::validation("Rigidity must be between 0 and 10"));
        }
        if self.crf > 51 {
            return Err(CasError::validation("CRF must be between 0 and 51"));
        }
        if !self.input.exists() {
            return Err(CasError::validation(format!(
                "Input path does not exist: {}",
                self.input.display()
            )));
        }
        Ok(())
    }

    /// The effective trim window as (start, end). `end` comes from either
    /// `--end` or `--start + --duration`.
    pub fn time_window(&self) -> Option<(f64, Option<f64>)> {
        let start = self.start.unwrap_or(0.0);
        let end = match (self.end, self.duration) {
            (Some(e), _) => Some(e),
            (None, Some(d)) => Some(start + d),
            (None, None) => None,
        };
        if self.start.is_none() && end.is_none() {
            None
        } else {
            Some((start, end))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ProcessOptions {
        ProcessOptions {
            input: PathBuf::from("."),
            output: None,
            width: None,
            height: None,
            percent: Some(50.0),
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
            progress: true,
            scale_back: false,
            crf: 23,
            preset: "medium".into(),
            codec: "libx264".into(),
            pixel_format: "yuv420p".into(),
            vibrato: false,
        }
    }

    #[test]
    fn percent_and_width_are_mutually_exclusive() {
        let mut o = base();
        o.width = Some(100);
        let err = o.validate().unwrap_err();
        assert!(err.to_string().contains("width/height and percent"));

        // Also with height only.
        let mut o = base();
        o.height = Some(100);
        assert!(o.validate().is_err());
    }

    #[test]
    fn start_forms_are_mutually_exclusive() {
        let mut o = base();
        o.start_width = Some(10);
        o.start_percent = Some(100.0);
        assert!(o.validate().is_err());
    }

    #[test]
    fn end_and_duration_are_mutually_exclusive() {
        let mut o = base();
        o.end = Some(4.0);
        o.duration = Some(2.0);
        assert!(o.validate().is_err());
    }

    #[test]
    fn start_must_precede_end() {
        let mut o = base();
        o.start = Some(5.0);
        o.end = Some(2.0);
        assert!(o.validate().is_err());
    }

    #[test]
    fn window_from_duration() {
        let mut o = base();
        o.start = Some(2.0);
        o.duration = Some(3.0);
        assert_eq!(o.time_window(), Some((2.0, Some(5.0))));
    }

    #[test]
    fn no_window_when_unset() {
        assert_eq!(base().time_window(), None);
    }

    #[test]
    fn rejects_out_of_range_knobs() {
        let mut o = base();
        o.delta_x = 1.5;
        assert!(o.validate().is_err());

        let mut o = base();
        o.crf = 52;
        assert!(o.validate().is_err());

        let mut o = base();
        o.fps = Some(0.0);
        assert!(o.validate().is_err());
    }

    #[test]
    fn frame_format_parses_aliases() {
        assert_eq!("JPEG".parse::<FrameFormat>().unwrap(), FrameFormat::Jpg);
        assert_eq!("tif".parse::<FrameFormat>().unwrap(), FrameFormat::Tiff);
        assert!("gif".parse::<FrameFormat>().is_err());
    }
}
