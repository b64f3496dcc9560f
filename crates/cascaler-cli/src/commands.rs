// crates/cascaler-cli/src/commands.rs
//
// The `config` subcommand tree: show / path / init / export.

use std::path::Path;

use console::style;

use cascaler_core::config::{self, AppConfig};
use cascaler_core::{CasError, Result};

use crate::args::ConfigAction;

pub fn handle(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show(),
        ConfigAction::Path => {
            println!("{}", AppConfig::config_path()?.display());
            Ok(())
        }
        ConfigAction::Init { detect_ffmpeg } => {
            let path = AppConfig::config_path()?;
            if path.exists() {
                return Err(CasError::config(format!(
                    "{} already exists — use `config export` to write elsewhere",
                    path.display()
                )));
            }
            write_config(&path, detect_ffmpeg)
        }
        ConfigAction::Export {
            file,
            detect_ffmpeg,
        } => write_config(&file, detect_ffmpeg),
    }
}

fn show() -> Result<()> {
    let path = AppConfig::config_path()?;
    let cfg = AppConfig::load_or_default()?;
    let origin = if path.exists() {
        format!("from {}", path.display())
    } else {
        "built-in defaults".to_string()
    };
    println!("{} ({origin})", style("Configuration").bold());
    println!(
        "{}",
        serde_json::to_string_pretty(&cfg).map_err(|e| CasError::config(e.to_string()))?
    );
    Ok(())
}

fn write_config(path: &Path, detect_ffmpeg: bool) -> Result<()> {
    let mut cfg = AppConfig::default();
    if detect_ffmpeg {
        match config::resolve_ffmpeg_dir(&cfg.ffmpeg) {
            Some(dir) => {
                println!("FFmpeg libraries found: {}", dir.display());
                cfg.ffmpeg.library_path = Some(dir);
            }
            None => println!(
                "{}",
                style("FFmpeg libraries not found; LibraryPath left unset").yellow()
            ),
        }
    }
    cfg.save_to_file(path)?;
    println!("wrote {}", path.display());
    Ok(())
}
