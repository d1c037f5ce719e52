//! `headers.conf` parsing and the resulting store configuration.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use spv_consensus::Network;
use spv_log::{Format, Level, LogConfig};

pub const CONF_FILE_NAME: &str = "headers.conf";

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read {CONF_FILE_NAME}: {err}"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value for {key}: {value}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

#[derive(Clone, Debug)]
pub struct HeaderStoreConfig {
    pub data_dir: PathBuf,
    pub network: Network,
    pub log: LogConfig,
}

impl HeaderStoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>, network: Network) -> Self {
        Self {
            data_dir: data_dir.into(),
            network,
            log: LogConfig::default(),
        }
    }

    /// Mainnet headers live directly in the data dir; other networks get a subdirectory.
    pub fn headers_dir(&self) -> PathBuf {
        match self.network {
            Network::Mainnet => self.data_dir.clone(),
            other => self.data_dir.join(other.as_str()),
        }
    }

    /// Defaults overlaid with `<data_dir>/headers.conf` when that file exists.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let base = Self::new(data_dir, Network::Mainnet);
        let path = base.data_dir.join(CONF_FILE_NAME);
        match load_conf_file(&path)? {
            Some(conf) => base.apply_conf(&conf),
            None => Ok(base),
        }
    }

    pub fn apply_conf(mut self, conf: &HashMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        if let Some(value) = last_value(conf, "datadir") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = last_value(conf, "network") {
            self.network = Network::parse(value).ok_or_else(|| invalid("network", value))?;
        }
        if let Some(value) = last_value(conf, "loglevel") {
            self.log.level = Level::parse(value).ok_or_else(|| invalid("loglevel", value))?;
        }
        if let Some(value) = last_value(conf, "logformat") {
            self.log.format = Format::parse(value).ok_or_else(|| invalid("logformat", value))?;
        }
        if let Some(value) = last_value(conf, "logtimestamps") {
            self.log.timestamps =
                parse_conf_bool(value).ok_or_else(|| invalid("logtimestamps", value))?;
        }
        if let Some(value) = last_value(conf, "logfile") {
            self.log.file = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        Ok(self)
    }
}

fn last_value<'a>(conf: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    conf.get(key)
        .and_then(|values| values.last())
        .map(String::as_str)
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}

/// Reads a `key=value` file; a missing file is `Ok(None)`.
pub fn load_conf_file(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(parse_conf(&contents)))
}

pub fn parse_conf(contents: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find(['#', ';']) {
            line = &line[..idx];
        }
        line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    out
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
