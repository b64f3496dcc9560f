// crates/cascaler-core/src/lib.rs

pub mod carve;
pub mod config;
pub mod dimensions;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod processor;
pub mod progress;
pub mod reorder;
pub mod seam;
pub mod sink;

pub use carve::{CarveParams, LiquidRescaler, SeamCarver};
pub use dimensions::DimensionPlan;
pub use dispatch::{JobPlan, ProcessingMode, SinkKind};
pub use error::{CasError, Result};
pub use options::ProcessOptions;
pub use processor::{ItemResult, MediaProcessor, WorkItem};
