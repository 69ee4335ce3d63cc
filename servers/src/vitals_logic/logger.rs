use anyhow::Result;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

fn colored_level(level: log::Level) -> colored::ColoredString {
    let name = level.to_string();
    match level {
        log::Level::Error => name.red(),
        log::Level::Warn => name.yellow(),
        log::Level::Info => name.green(),
        log::Level::Debug => name.blue(),
        log::Level::Trace => name.purple(),
    }
}

/// Installs the global logger: coloured lines on stdout plus a fresh
/// `<app_name>_<timestamp>.log` in `log_dir`. Returns the log file path.
pub fn setup_logging(log_dir: &Path, log_level: &str, app_name: &str) -> Result<PathBuf> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    // Clean up old log files so the new one is the only one left
    cleanup_old_logs(log_dir, 0)?;

    let log_file_name = format!("{}_{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);

    let stdout = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                colored_level(record.level()),
                message
            ))
        })
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .chain(fern::log_file(&log_path)?);

    fern::Dispatch::new()
        .level(parse_level(log_level))
        .chain(stdout)
        .chain(file)
        .apply()?;

    Ok(log_path)
}

/// Deletes `.log` files in `log_dir`, keeping the `keep` most recently modified.
/// Returns how many were deleted.
pub fn cleanup_old_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .map(|p| {
            let modified = fs::metadata(&p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, p)
        })
        .collect();

    // Newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut deleted = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => deleted += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("TRACE"), log::LevelFilter::Trace);
        assert_eq!(parse_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), log::LevelFilter::Info);
    }

    #[test]
    fn test_cleanup_keeps_newest_logs_only() {
        let dir = tempdir().unwrap();
        for name in ["a.log", "b.log", "c.log"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assert_eq!(cleanup_old_logs(dir.path(), 1).unwrap(), 2);

        let remaining: Vec<_> = fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert_eq!(remaining.len(), 2);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_setup_logging_writes_to_fresh_file() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        fs::create_dir_all(&log_dir).unwrap();
        fs::write(log_dir.join("old.log"), "stale").unwrap();

        let path = setup_logging(&log_dir, "info", "vitals_test").unwrap();
        log::info!("logger smoke line");
        log::debug!("filtered out");

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("logger smoke line"));
        assert!(contents.contains("[INFO]"));
        assert!(!contents.contains("filtered out"));
        assert!(!log_dir.join("old.log").exists());
    }
}
