use anyhow::{Context, Result};
use chrono::Local;
use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Human-readable, timestamped line log for one pipeline phase.
///
/// Every line goes to the phase's log file and is echoed to stderr. Write
/// failures on the log file never abort the run.
#[derive(Debug, Default)]
pub struct RunLog {
    file: Option<PathBuf>,
    echo: bool,
    captured: Option<RefCell<Vec<String>>>,
}

impl RunLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(Self {
            file: Some(path.to_path_buf()),
            echo: true,
            captured: None,
        })
    }

    /// In-memory log, used by tests to assert on emitted lines.
    #[cfg(test)]
    pub fn capture() -> Self {
        Self {
            file: None,
            echo: false,
            captured: Some(RefCell::new(Vec::new())),
        }
    }

    #[cfg(test)]
    pub fn lines(&self) -> Vec<String> {
        self.captured
            .as_ref()
            .map(|c| c.borrow().clone())
            .unwrap_or_default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.write(Level::Info, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.write(Level::Warn, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.write(Level::Error, msg.as_ref());
    }

    pub fn critical(&self, msg: impl AsRef<str>) {
        self.write(Level::Critical, msg.as_ref());
    }

    fn write(&self, level: Level, msg: &str) {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{ts}] [{}] {msg}", level.as_str());

        if let Some(captured) = &self.captured {
            captured.borrow_mut().push(line.clone());
        }
        if self.echo {
            eprintln!("{line}");
        }
        if let Some(path) = &self.file {
            let appended = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| f.write_all(format!("{line}\n").as_bytes()));
            if let Err(err) = appended {
                eprintln!("log write to {} failed: {err}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RunLog;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn lines_carry_timestamp_and_level() {
        let log = RunLog::capture();
        log.warn("[Create] WARNING: joined file is empty");
        let lines = log.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].contains("] [WARNING] [Create]"));
    }

    #[test]
    fn file_log_appends_across_instances() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("logs/conversion_log.txt");

        RunLog::open(&path).expect("open").info("first");
        RunLog::open(&path).expect("open").error("second");

        let raw = fs::read_to_string(&path).expect("read log");
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] first"));
        assert!(lines[1].ends_with("[ERROR] second"));
    }
}
