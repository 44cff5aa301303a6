use anyhow::Result;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => anyhow::bail!("bad log level {}", other),
        }
    }
}

/// Logging collaborator used by listeners and sessions. Must be callable from any thread.
pub trait Logger: Send + Sync {
    fn debug(&self, _msg: &str) {}
    fn info(&self, msg: &str);
    /// Records a warning and bumps the warning counter.
    fn warning(&self, msg: &str);
    /// Records an error and bumps the error counter.
    fn error(&self, msg: &str);
    fn host_name(&self) -> &str;
    fn log_name(&self) -> String;
    fn warnings_logged(&self) -> u64;
    fn errors_logged(&self) -> u64;
}

/// Counts issues but writes nothing.
pub struct NoopLogger {
    host: String,
    warnings: AtomicU64,
    errors: AtomicU64,
}

impl NoopLogger {
    pub fn new() -> Self {
        Self {
            host: local_host_name(),
            warnings: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl Default for NoopLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for NoopLogger {
    fn info(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }
    fn error(&self, _msg: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
    fn host_name(&self) -> &str {
        &self.host
    }
    fn log_name(&self) -> String {
        "(none)".to_string()
    }
    fn warnings_logged(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }
    fn errors_logged(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Tab-separated audit log: date, time, host, user, data id, program, comment.
pub struct TextLogger {
    path: PathBuf,
    file: Mutex<File>,
    level: LogLevel,
    host: String,
    user: String,
    data_id: String,
    program: String,
    started: DateTime<Local>,
    warnings: AtomicU64,
    errors: AtomicU64,
    finished: AtomicBool,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P, program: &str, data_id: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let fresh = !path.exists();
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        if fresh {
            writeln!(f, "Date\tTime\tHost Name\tUser Name\tData ID\tProgram Name\tComment")?;
        }
        let logger = Self {
            path: path.to_path_buf(),
            file: Mutex::new(f),
            level: LogLevel::Info,
            host: local_host_name(),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            data_id: if data_id.is_empty() { "N/A".to_string() } else { data_id.to_string() },
            program: program.to_string(),
            started: Local::now(),
            warnings: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        };
        logger.line(LogLevel::Info, &format!("Launched {}", program));
        Ok(logger)
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks for the lock; entries are never skipped.
    fn line(&self, level: LogLevel, s: &str) {
        if level < self.level {
            return;
        }
        let now = Local::now();
        let mut f = self.file.lock();
        let _ = writeln!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}",
            now.format("%Y-%m-%d\t%H:%M:%S %Z"),
            self.host,
            self.user,
            self.data_id,
            self.program,
            s
        );
    }

    /// Write the closing line with elapsed run time; later calls are no-ops.
    pub fn end_log(&self, return_code: i32) -> i32 {
        if self.finished.swap(true, Ordering::SeqCst) {
            return return_code;
        }
        let elapsed = (Local::now() - self.started).num_seconds().max(0);
        let mut msg = String::from("Finished run");
        if return_code != 0 {
            msg.push_str(" with warning or error");
        }
        msg.push_str(&format!("; Elapsed time: {}s = {}", elapsed, format_elapsed(elapsed)));
        self.line(LogLevel::Error, &msg);
        return_code
    }
}

impl Logger for TextLogger {
    fn debug(&self, msg: &str) {
        self.line(LogLevel::Debug, msg);
    }
    fn info(&self, msg: &str) {
        self.line(LogLevel::Info, msg);
    }
    fn warning(&self, msg: &str) {
        self.line(LogLevel::Warn, &format!("**WARNING** {}", msg));
        eprintln!("{}", msg);
        self.warnings.fetch_add(1, Ordering::Relaxed);
    }
    fn error(&self, msg: &str) {
        self.line(LogLevel::Error, &format!("***ERROR*** {}", msg));
        eprintln!("{}", msg);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
    fn host_name(&self) -> &str {
        &self.host
    }
    fn log_name(&self) -> String {
        self.path.display().to_string()
    }
    fn warnings_logged(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }
    fn errors_logged(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Drop for TextLogger {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            self.warning("logger dropped without ending the log");
            self.end_log(1);
        }
    }
}

pub fn local_host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Seconds as d:hh:mm:ss
fn format_elapsed(secs: i64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    format!("{}:{:02}:{:02}:{:02}", days, hours, minutes, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn elapsed_format() {
        assert_eq!(format_elapsed(0), "0:00:00:00");
        assert_eq!(format_elapsed(90_061), "1:01:01:01");
    }

    #[test]
    fn level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn text_logger_writes_header_and_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.log");
        let logger = TextLogger::new(&path, "cmdlinkd", "").unwrap();
        logger.info("hello");
        logger.warning("careful");
        logger.error("broken");
        assert_eq!(logger.warnings_logged(), 1);
        assert_eq!(logger.errors_logged(), 1);
        logger.end_log(0);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("Date\tTime"));
        assert!(text.contains("\tN/A\tcmdlinkd\tLaunched cmdlinkd"));
        assert!(text.contains("**WARNING** careful"));
        assert!(text.contains("***ERROR*** broken"));
        assert!(text.contains("Finished run; Elapsed time:"));
        assert_eq!(logger.log_name(), path.display().to_string());
    }

    #[test]
    fn level_filter_still_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("quiet.log");
        let logger = TextLogger::new(&path, "t", "id").unwrap().with_level(LogLevel::Error);
        logger.info("invisible");
        logger.warning("invisible warning");
        assert_eq!(logger.warnings_logged(), 1);
        logger.end_log(0);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("invisible"));
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("busy.log");
        let logger = Arc::new(TextLogger::new(&path, "t", "id").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let logger = Arc::clone(&logger);
                thread::spawn(move || {
                    for j in 0..50 {
                        logger.info(&format!("entry {}-{}", i, j));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        logger.end_log(0);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().filter(|l| l.contains("\tentry ")).count(), 400);
    }

    #[test]
    fn noop_logger_counts() {
        let logger = NoopLogger::new();
        logger.warning("w");
        logger.error("e");
        logger.error("e");
        assert_eq!(logger.warnings_logged(), 1);
        assert_eq!(logger.errors_logged(), 2);
        assert!(!logger.host_name().is_empty());
    }
}
