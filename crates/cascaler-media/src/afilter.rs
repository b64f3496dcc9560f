// crates/cascaler-media/src/afilter.rs
//
// Optional vibrato+tremolo audio effect as a libavfilter graph:
// abuffer -> vibrato=f=5:d=0.5 -> tremolo=f=5:d=0.5 -> abuffersink.
// Disabled, it's a pass-through queue so the caller's loop is identical
// either way.

use std::collections::VecDeque;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::filter;
use ffmpeg::util::frame::audio::Audio as AudioFrame;

use cascaler_core::{CasError, Result};

const FILTER_SPEC: &str = "vibrato=f=5:d=0.5,tremolo=f=5:d=0.5";

pub enum AudioFilter {
    Graph(filter::Graph),
    Identity(VecDeque<AudioFrame>),
}

impl AudioFilter {
    /// `rate`/`stereo` describe the decoder's float-planar output; the graph
    /// is fed frames in that format only.
    pub fn new(enabled: bool, rate: u32, stereo: bool) -> Result<Self> {
        if !enabled {
            return Ok(Self::Identity(VecDeque::new()));
        }

        let abuffer = filter::find("abuffer")
            .ok_or_else(|| CasError::encode("abuffer filter not found".to_string()))?;
        let abuffersink = filter::find("abuffersink")
            .ok_or_else(|| CasError::encode("abuffersink filter not found".to_string()))?;

        let mut graph = filter::Graph::new();
        let layout = if stereo { "stereo" } else { "mono" };
        let args = format!(
            "time_base=1/{rate}:sample_rate={rate}:sample_fmt=fltp:channel_layout={layout}"
        );

        graph
            .add(&abuffer, "in", &args)
            .map_err(|e| CasError::encode(format!("add abuffer: {e}")))?;
        graph
            .add(&abuffersink, "out", "")
            .map_err(|e| CasError::encode(format!("add abuffersink: {e}")))?;

        graph
            .output("in", 0)
            .map_err(|e| CasError::encode(format!("graph output: {e}")))?
            .input("out", 0)
            .map_err(|e| CasError::encode(format!("graph input: {e}")))?
            .parse(FILTER_SPEC)
            .map_err(|e| CasError::encode(format!("parse '{FILTER_SPEC}': {e}")))?;
        graph
            .validate()
            .map_err(|e| CasError::encode(format!("validate filter graph: {e}")))?;

        log::debug!("audio filter graph active: {FILTER_SPEC}");
        Ok(Self::Graph(graph))
    }

    pub fn push(&mut self, frame: AudioFrame) -> Result<()> {
        match self {
            Self::Graph(graph) => graph
                .get("in")
                .expect("abuffer context")
                .source()
                .add(&frame)
                .map_err(|e| CasError::encode(format!("feed filter graph: {e}"))),
            Self::Identity(queue) => {
                queue.push_back(frame);
                Ok(())
            }
        }
    }

    /// Filtered frames become available in pts order, possibly re-chunked by
    /// the graph.
    pub fn pull(&mut self) -> Option<AudioFrame> {
        match self {
            Self::Graph(graph) => {
                let mut out = AudioFrame::empty();
                let got = graph
                    .get("out")
                    .expect("abuffersink context")
                    .sink()
                    .frame(&mut out)
                    .is_ok();
                got.then_some(out)
            }
            Self::Identity(queue) => queue.pop_front(),
        }
    }

    /// Signal end-of-stream so buffered filter state drains through pull().
    pub fn flush(&mut self) -> Result<()> {
        match self {
            Self::Graph(graph) => graph
                .get("in")
                .expect("abuffer context")
                .source()
                .flush()
                .map_err(|e| CasError::encode(format!("flush filter graph: {e}"))),
            Self::Identity(_) => Ok(()),
        }
    }
}
