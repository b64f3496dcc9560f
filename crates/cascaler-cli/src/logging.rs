// crates/cascaler-cli/src/logging.rs
//
// fern dispatch: everything at debug to a dated file under the config dir,
// info and up to the console through the LogRouter (which redirects through
// the progress bar while one is active). Files older than the retention
// window are pruned at init.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use cascaler_core::config::AppConfig;
use cascaler_core::progress::LogRouter;
use cascaler_core::Result;

const RETENTION_DAYS: u64 = 7;

pub fn init(router: &LogRouter) -> Result<()> {
    let logs_dir = AppConfig::logs_dir()?;
    fs::create_dir_all(&logs_dir)?;
    prune_old_logs(&logs_dir, RETENTION_DAYS);

    let file_name = format!("cascaler-{}.log", chrono::Local::now().format("%Y%m%d"));
    let log_file = fern::log_file(logs_dir.join(file_name))?;

    let console_router = router.clone();
    fern::Dispatch::new()
        .chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Debug)
                .format(|out, message, record| {
                    out.finish(format_args!(
                        "[{} {} {}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                        record.level(),
                        record.target(),
                        message
                    ))
                })
                .chain(log_file),
        )
        .chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(|out, message, record| match record.level() {
                    log::Level::Info => out.finish(format_args!("{message}")),
                    level => out.finish(format_args!("{level}: {message}")),
                })
                .chain(fern::Output::call(move |record| {
                    console_router.write_line(&record.args().to_string());
                })),
        )
        .apply()
        .map_err(|e| cascaler_core::CasError::config(format!("logger init: {e}")))?;
    Ok(())
}

/// Delete cascaler-*.log files whose mtime is past the retention window.
fn prune_old_logs(dir: &Path, retention_days: u64) {
    let cutoff = SystemTime::now() - Duration::from_secs(retention_days * 24 * 3600);
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !(name.starts_with("cascaler-") && name.ends_with(".log")) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        if modified < cutoff {
            if let Err(e) = fs::remove_file(entry.path()) {
                eprintln!("could not prune old log {name}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn prune_removes_only_old_cascaler_logs() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("cascaler-20200101.log");
        let fresh = dir.path().join("cascaler-29990101.log");
        let other = dir.path().join("keep.txt");
        for p in [&old, &fresh, &other] {
            File::create(p).unwrap();
        }
        let past = SystemTime::now() - Duration::from_secs(30 * 24 * 3600);
        let times = fs::File::options().write(true).open(&old).unwrap();
        times.set_modified(past).unwrap();
        drop(times);

        prune_old_logs(dir.path(), RETENTION_DAYS);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }
}
