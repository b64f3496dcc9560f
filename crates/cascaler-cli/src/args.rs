// crates/cascaler-cli/src/args.rs
//
// The clap surface. -h is taken by --height (the tool's most-used flag pair
// is -w/-h), so the automatic help short is disabled and help hangs off
// --help only.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "cascaler",
    version,
    about = "Content-aware (seam carving) rescaler for images, batches and videos",
    disable_help_flag = true
)]
pub struct Cli {
    #[arg(long, action = ArgAction::Help, global = true, help = "Print help")]
    pub help: Option<bool>,

    /// Input file or directory
    #[arg(required_unless_present = "command")]
    pub input: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Target width in pixels
    #[arg(short = 'w', long)]
    pub width: Option<u32>,

    /// Target height in pixels
    #[arg(short = 'h', long)]
    pub height: Option<u32>,

    /// Target size as a percentage of the original
    #[arg(short = 'p', long)]
    pub percent: Option<f64>,

    /// Gradual scaling: starting width in pixels
    #[arg(long, visible_alias = "sw")]
    pub start_width: Option<u32>,

    /// Gradual scaling: starting height in pixels
    #[arg(long, visible_alias = "sh")]
    pub start_height: Option<u32>,

    /// Gradual scaling: starting size as a percentage of the original
    #[arg(long, visible_alias = "sp")]
    pub start_percent: Option<f64>,

    /// Trim window start, seconds
    #[arg(long)]
    pub start: Option<f64>,

    /// Trim window end, seconds
    #[arg(long)]
    pub end: Option<f64>,

    /// Duration in seconds (video trim, or sequence length for an image)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Frame output format: png, jpg, bmp, tiff
    #[arg(short = 'f', long)]
    pub format: Option<String>,

    /// Frames per second (sequences; overrides the source rate for videos)
    #[arg(long)]
    pub fps: Option<f64>,

    /// Seam transversal step, 0..1
    #[arg(short = 'd', long = "deltaX", visible_alias = "delta-x")]
    pub delta_x: Option<f64>,

    /// Seam rigidity, 0..10
    #[arg(short = 'r', long)]
    pub rigidity: Option<f64>,

    /// Worker thread budget for this run
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Output file or directory
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Disable the progress display
    #[arg(long)]
    pub no_progress: bool,

    /// Resample every frame back to a uniform output size after carving
    #[arg(long)]
    pub scale_back: bool,

    /// Apply a vibrato+tremolo effect to the audio track
    #[arg(long)]
    pub vibrato: bool,

    /// Constant Rate Factor for video encoding, 0..51
    #[arg(long)]
    pub crf: Option<u32>,

    /// x264/x265 preset (ultrafast..veryslow)
    #[arg(long)]
    pub preset: Option<String>,

    /// Video codec (libx264, libx265)
    #[arg(long)]
    pub codec: Option<String>,

    /// Encoder pixel format (yuv420p, yuv422p, yuv444p, nv12)
    #[arg(long)]
    pub pixel_format: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write a fresh configuration file with defaults
    Init {
        /// Locate the FFmpeg libraries and record the path
        #[arg(long)]
        detect_ffmpeg: bool,
    },
    /// Write the configuration to an arbitrary file
    Export {
        file: PathBuf,
        /// Locate the FFmpeg libraries and record the path
        #[arg(long)]
        detect_ffmpeg: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn short_h_is_height() {
        let cli = Cli::try_parse_from(["cascaler", "in.png", "-w", "100", "-h", "50"]).unwrap();
        assert_eq!(cli.width, Some(100));
        assert_eq!(cli.height, Some(50));
    }

    #[test]
    fn percent_and_width_both_parse_for_later_validation() {
        // The precise mutual-exclusion message comes from options validation,
        // so clap must accept the combination.
        let cli = Cli::try_parse_from(["cascaler", "in.png", "-w", "100", "-p", "50"]).unwrap();
        assert_eq!(cli.width, Some(100));
        assert_eq!(cli.percent, Some(50.0));
    }

    #[test]
    fn start_aliases_parse() {
        let cli =
            Cli::try_parse_from(["cascaler", "in.png", "--sp", "100", "-p", "50"]).unwrap();
        assert_eq!(cli.start_percent, Some(100.0));
        assert_eq!(cli.percent, Some(50.0));
    }

    #[test]
    fn config_subcommand_parses() {
        let cli = Cli::try_parse_from(["cascaler", "config", "init", "--detect-ffmpeg"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Init { detect_ffmpeg: true }
            })
        ));
    }
}
