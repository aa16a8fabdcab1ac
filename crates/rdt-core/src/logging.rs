//! Log setup shared by the `rdt-*` binaries. Nothing here runs unless a
//! binary calls [`init_logging`]; library code only emits `tracing` events.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

/// Which binary is logging and where its file goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub component: &'static str,
    pub debug: bool,
    /// Empty means stdout only.
    pub log_dir: String,
}

impl LogTarget {
    pub fn file_path(&self) -> Option<PathBuf> {
        let dir = self.log_dir.trim();
        if dir.is_empty() {
            return None;
        }
        Some(Path::new(dir).join(format!("rdt-{}.log", self.component)))
    }

    /// `debug` wins, then `RDT_LOG_LEVEL`, then `info`. `RUST_LOG` overrides
    /// all of them in [`init_logging`].
    fn default_directive(&self) -> String {
        if self.debug {
            return "debug".to_string();
        }
        match std::env::var("RDT_LOG_LEVEL") {
            Ok(level) if !level.trim().is_empty() => level,
            _ => "info".to_string(),
        }
    }
}

/// Holds the shared log file open while the binary runs.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl LogGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

/// Installs the global subscriber. Returns `None` if one was already set.
pub fn init_logging(target: &LogTarget) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(target.default_directive()));
    let guard = open_log_file(target).unwrap_or_else(|err| {
        eprintln!("rdt-{}: log file unavailable: {err}", target.component);
        LogGuard { file: None }
    });
    let file = guard.file.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(BoxMakeWriter::new(move || TeeWriter {
            stdout: io::stdout(),
            file: file.clone(),
        }))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok()?;
    Some(guard)
}

fn open_log_file(target: &LogTarget) -> io::Result<LogGuard> {
    let Some(path) = target.file_path() else {
        return Ok(LogGuard { file: None });
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

/// Copies every record to stdout and, when open, the log file. Write errors
/// are dropped.
struct TeeWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<File>>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(Ok(mut file)) = self.file.as_ref().map(|file| file.lock()) {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(Ok(mut file)) = self.file.as_ref().map(|file| file.lock()) {
            let _ = file.flush();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(log_dir: &str) -> LogTarget {
        LogTarget {
            component: "server",
            debug: true,
            log_dir: log_dir.to_string(),
        }
    }

    #[test]
    fn file_is_named_after_component() {
        assert_eq!(
            target("/var/log/rdt").file_path(),
            Some(PathBuf::from("/var/log/rdt/rdt-server.log"))
        );
        assert_eq!(target("  ").file_path(), None);
        assert_eq!(target("").default_directive(), "debug");
    }

    #[test]
    fn tee_writes_through_to_log_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("logs");
        let guard = open_log_file(&target(&nested.to_string_lossy())).expect("open");
        assert!(guard.has_file());

        let mut writer = TeeWriter {
            stdout: io::stdout(),
            file: guard.file.clone(),
        };
        writer.write_all(b"event=push_received\n").expect("write");
        writer.flush().expect("flush");

        let content =
            std::fs::read_to_string(nested.join("rdt-server.log")).expect("log file");
        assert_eq!(content, "event=push_received\n");
    }

    #[test]
    fn empty_dir_logs_to_stdout_only() {
        let guard = open_log_file(&target("")).expect("open");
        assert!(!guard.has_file());
    }
}
