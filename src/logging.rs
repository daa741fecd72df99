// Logger setup: every command logs to stderr and to its own timestamped file.
use chrono::{DateTime, Local};
use env_logger::{Builder, Env, Target};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// `{logs_dir}/{name}_{YYYYmmdd_HHMMSS}.log`
pub fn log_file_path(logs_dir: &Path, name: &str, now: DateTime<Local>) -> PathBuf {
    logs_dir.join(format!("{}_{}.log", name, now.format("%Y%m%d_%H%M%S")))
}

/// Copies every record to stderr and, when open, to the log file.
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn open_log_file(logs_dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(logs_dir)?;
    let path = log_file_path(logs_dir, name, Local::now());
    let file = File::create(&path)?;
    Ok((file, path))
}

/// Install the global logger for command `name`.
///
/// `RUST_LOG` overrides the default `info` filter. Returns the log file path,
/// or `None` when logging is console-only because the file could not be
/// created (or no directory was given).
pub fn init(name: &str, logs_dir: Option<&Path>) -> Option<PathBuf> {
    let mut fallback = None;
    let (file, path) = match logs_dir.map(|dir| open_log_file(dir, name)) {
        Some(Ok((file, path))) => (Some(file), Some(path)),
        Some(Err(e)) => {
            fallback = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    let result = Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(TeeWriter { file })))
        .try_init();
    if result.is_err() {
        return None;
    }

    if let Some(e) = fallback {
        log::warn!("Could not create log file, logging to console only: {}", e);
    }
    if let Some(path) = &path {
        log::debug!("Logging to {}", path.display());
    }
    path
}
