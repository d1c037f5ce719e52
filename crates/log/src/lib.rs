//! Leveled text/JSON logger with an optional append-only file sink.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
    /// Lines are appended here in addition to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
            file: None,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);
static LOG_STDERR_ENABLED: AtomicBool = AtomicBool::new(true);
static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

/// Applies `config`; fails only when the log file cannot be opened.
pub fn init(config: &LogConfig) -> io::Result<()> {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);

    let file = match &config.file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };
    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = file;
    }
    Ok(())
}

pub fn set_stderr_enabled(enabled: bool) {
    LOG_STDERR_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn log(
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
    args: fmt::Arguments<'_>,
) {
    if !enabled(level) {
        return;
    }

    let format = match LOG_FORMAT.load(Ordering::Relaxed) {
        1 => Format::Json,
        _ => Format::Text,
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let record = Record {
        now,
        level,
        target,
        file,
        line,
    };
    let rendered = record.render(format, LOG_TIMESTAMPS.load(Ordering::Relaxed), args);

    if LOG_STDERR_ENABLED.load(Ordering::Relaxed) {
        let _ = io::stderr().lock().write_all(rendered.as_bytes());
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(out) = guard.as_mut() {
            let _ = out.write_all(rendered.as_bytes());
        }
    }
}

struct Record {
    now: Duration,
    level: Level,
    target: &'static str,
    file: &'static str,
    line: u32,
}

impl Record {
    fn render(&self, format: Format, timestamps: bool, args: fmt::Arguments<'_>) -> String {
        match format {
            Format::Text => {
                let mut out = String::new();
                if timestamps {
                    let ts = Timestamp {
                        unix_seconds: self.now.as_secs(),
                        millis: self.now.subsec_millis(),
                    };
                    out.push_str(&format!("{ts} "));
                }
                out.push_str(&format!("{} {}: {args}\n", self.level.as_str(), self.target));
                out
            }
            Format::Json => {
                let ts_ms: u64 = self.now.as_millis().try_into().unwrap_or(u64::MAX);
                let line = json!({
                    "ts_ms": ts_ms,
                    "level": self.level.as_str(),
                    "target": self.target,
                    "file": self.file,
                    "line": self.line,
                    "msg": args.to_string(),
                });
                format!("{line}\n")
            }
        }
    }
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

struct Timestamp {
    unix_seconds: u64,
    millis: u32,
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SECS_PER_DAY: u64 = 86_400;
        let days = (self.unix_seconds / SECS_PER_DAY) as i64;
        let secs_of_day = self.unix_seconds % SECS_PER_DAY;
        let hour = secs_of_day / 3600;
        let minute = (secs_of_day % 3600) / 60;
        let second = secs_of_day % 60;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z",
            millis = self.millis
        )
    }
}

fn civil_from_days(days_since_unix_epoch: i64) -> (i32, u32, u32) {
    // Howard Hinnant's civil_from_days.
    let z = days_since_unix_epoch + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = (yoe as i32) + (era as i32) * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = y + if m <= 2 { 1 } else { 0 };
    (year, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record {
            now: Duration::from_millis(1_553_596_040_123),
            level: Level::Warn,
            target: "spv_chainstate::blockchain",
            file: "blockchain.rs",
            line: 42,
        }
    }

    #[test]
    fn parse_level() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("trace"), Some(Level::Trace));
        assert_eq!(Level::parse("nope"), None);
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("text"), Some(Format::Text));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("nope"), None);
    }

    #[test]
    fn text_line_with_timestamp() {
        let line = record().render(Format::Text, true, format_args!("swap at {}", 6));
        assert_eq!(
            line,
            "2019-03-26T10:27:20.123Z WARN spv_chainstate::blockchain: swap at 6\n"
        );
        let line = record().render(Format::Text, false, format_args!("x"));
        assert_eq!(line, "WARN spv_chainstate::blockchain: x\n");
    }

    #[test]
    fn json_line_fields() {
        let line = record().render(Format::Json, true, format_args!("fork {}", "ab"));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).expect("json");
        assert_eq!(value["level"], "WARN");
        assert_eq!(value["msg"], "fork ab");
        assert_eq!(value["line"], 42);
        assert_eq!(value["ts_ms"], 1_553_596_040_123u64);
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("headers.log");
        init(&LogConfig {
            level: Level::Info,
            format: Format::Text,
            timestamps: false,
            file: Some(path.clone()),
        })
        .expect("init");
        set_stderr_enabled(false);
        log_info!("first");
        log_debug!("hidden");
        log_warn!("second");
        init(&LogConfig::default()).expect("reset");
        set_stderr_enabled(true);

        let contents = std::fs::read_to_string(&path).expect("read log");
        assert!(contents.contains("INFO"));
        assert!(contents.contains(": first\n"));
        assert!(contents.contains(": second\n"));
        assert!(!contents.contains("hidden"));
    }
}
