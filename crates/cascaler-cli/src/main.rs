// crates/cascaler-cli/src/main.rs

mod args;
mod commands;
mod logging;
mod run;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use console::style;

use cascaler_core::config::{self, AppConfig};
use cascaler_core::progress::LogRouter;
use cascaler_core::{CasError, Result};

use args::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    std::process::exit(match real_main(cli) {
        Ok(()) => 0,
        Err(CasError::Cancelled) => {
            eprintln!("{}", style("Operation cancelled").yellow().bold());
            1
        }
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            1
        }
    });
}

fn real_main(mut cli: Cli) -> Result<()> {
    // Config subcommands never touch FFmpeg or the logger.
    if let Some(Commands::Config { action }) = cli.command.take() {
        return commands::handle(action);
    }

    let cfg = AppConfig::load_or_default()?;
    let router = LogRouter::new();
    logging::init(&router)?;

    match config::resolve_ffmpeg_dir(&cfg.ffmpeg) {
        Some(dir) => log::debug!("FFmpeg libraries: {}", dir.display()),
        None => log::debug!("FFmpeg libraries not located (using the linked build)"),
    }
    cascaler_media::init()?;

    // Ctrl-C flips the shared cancellation flag; the pipeline drains and
    // reports Cancelled.
    let cancel = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&cancel))
            .map_err(|e| CasError::config(format!("signal handler: {e}")))?;
    }

    let summary = run::execute(&cli, &cfg, cancel, router)?;
    run::print_summary(&summary);
    Ok(())
}
