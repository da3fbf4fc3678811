//! Configuration for tidelog managers
//!
//! A `Config` is owned by one `Manager` and handed out by value. Overrides are
//! expressed as `LogOption`s applied in order, last write wins.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::level::Level;

/// Environment variable overriding the default stream-name prefix
pub const NAME_ENV_VAR: &str = "TIDELOG_NAME";

/// Environment variable overriding the log directory
pub const DIR_ENV_VAR: &str = "TIDELOG_DIR";

/// Stream name used when neither the caller nor the environment names one
pub const DEFAULT_STREAM_NAME: &str = "sign";

/// Largest retention or rotation accepted, in hours (100 years)
pub const MAX_HOURS: i64 = 100 * 365 * 24;

/// Whether `hours` is a usable retention window; negative means "today only"
pub fn valid_max_age(hours: i64) -> bool {
    (-MAX_HOURS..=MAX_HOURS).contains(&hours)
}

/// Whether `hours` is a usable rotation interval
pub fn valid_rotation(hours: i64) -> bool {
    (1..=MAX_HOURS).contains(&hours)
}

/// Runtime environment, which also implies a default severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    /// Production: file output only, `info` threshold
    Pro,
    Debug,
    Info,
    Warn,
    Error,
    DPanic,
    Panic,
    Fatal,
}

impl Env {
    pub fn as_str(&self) -> &'static str {
        match self {
            Env::Pro => "pro",
            Env::Debug => "debug",
            Env::Info => "info",
            Env::Warn => "warn",
            Env::Error => "error",
            Env::DPanic => "dpanic",
            Env::Panic => "panic",
            Env::Fatal => "fatal",
        }
    }

    /// Severity this environment implies when no explicit level is set
    pub fn level(&self) -> Level {
        match self {
            Env::Pro | Env::Info => Level::Info,
            Env::Debug => Level::Debug,
            Env::Warn => Level::Warn,
            Env::Error => Level::Error,
            Env::DPanic => Level::DPanic,
            Env::Panic => Level::Panic,
            Env::Fatal => Level::Fatal,
        }
    }

    /// Production environments write to files only; others mirror to stdout
    pub fn is_production(&self) -> bool {
        matches!(self, Env::Pro)
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Env {
    type Err = LogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro" | "prod" | "production" => Ok(Env::Pro),
            "debug" => Ok(Env::Debug),
            "info" => Ok(Env::Info),
            "warn" => Ok(Env::Warn),
            "error" => Ok(Env::Error),
            "dpanic" => Ok(Env::DPanic),
            "panic" => Ok(Env::Panic),
            "fatal" => Ok(Env::Fatal),
            _ => Err(LogError::InvalidEnv(s.to_string())),
        }
    }
}

/// strftime template used for the `time` field of encoded records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeFormat(String);

impl TimeFormat {
    /// Second precision, e.g. `2024-03-16 08:01:02`
    pub fn seconds() -> Self {
        Self("%Y-%m-%d %H:%M:%S".to_string())
    }

    /// Millisecond precision, e.g. `2024-03-16 08:01:02.345`
    pub fn millis() -> Self {
        Self("%Y-%m-%d %H:%M:%S%.3f".to_string())
    }

    /// Validate a custom strftime template
    ///
    /// `sec` and `msec` are accepted as shorthands for the two presets.
    pub fn parse(template: &str) -> Result<Self> {
        match template {
            "sec" => return Ok(Self::seconds()),
            "msec" => return Ok(Self::millis()),
            _ => {}
        }
        if template.is_empty() || StrftimeItems::new(template).any(|i| matches!(i, Item::Error)) {
            return Err(LogError::InvalidTimeFormat(template.to_string()));
        }
        Ok(Self(template.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TimeFormat {
    fn default() -> Self {
        Self::seconds()
    }
}

impl TryFrom<String> for TimeFormat {
    type Error = LogError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeFormat> for String {
    fn from(value: TimeFormat) -> Self {
        value.0
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// How long rotated files are kept, in hours (default: 240 = 10 days)
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,

    /// Rotation interval in hours (default: 24)
    #[serde(default = "default_rotation_hours")]
    pub rotation_hours: i64,

    /// Runtime environment
    #[serde(default = "default_env")]
    pub env: Env,

    /// Current severity threshold
    #[serde(default = "default_level")]
    pub level: Level,

    /// Set when `level` was chosen explicitly rather than derived from `env`
    #[serde(default)]
    level_override: bool,

    /// Template for the record timestamp
    #[serde(default)]
    pub time_format: TimeFormat,

    /// Stream used by `logger("")` and the package-level helpers
    #[serde(default = "default_stream_name")]
    pub default_name: String,

    /// Stream that aggregates error-and-above records from every logger
    #[serde(default = "default_error_name")]
    pub error_name: String,

    /// Directory holding every log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_max_age_hours() -> i64 {
    10 * 24
}

fn default_rotation_hours() -> i64 {
    24
}

fn default_env() -> Env {
    Env::Pro
}

fn default_level() -> Level {
    default_env().level()
}

fn default_stream_name() -> String {
    std::env::var(NAME_ENV_VAR)
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string())
}

fn default_error_name() -> String {
    format!("{}_error", default_stream_name())
}

fn default_log_dir() -> PathBuf {
    std::env::var_os(DIR_ENV_VAR)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".").join("logs"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            rotation_hours: default_rotation_hours(),
            env: default_env(),
            level: default_level(),
            level_override: false,
            time_format: TimeFormat::default(),
            default_name: default_stream_name(),
            error_name: default_error_name(),
            log_dir: default_log_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, or return the default if it is missing
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        Ok(Self::from_toml(&content)?)
    }

    /// Parse configuration from TOML text
    ///
    /// A `level` key counts as an explicit override unless the file also
    /// records `level_override` itself.
    pub fn from_toml(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let explicit_level = table.contains_key("level") && !table.contains_key("level_override");

        let mut config: Config = toml::Value::Table(table).try_into()?;
        if !valid_max_age(config.max_age_hours) {
            return Err(LogError::InvalidOption(format!("max_age_hours={}", config.max_age_hours)));
        }
        if !valid_rotation(config.rotation_hours) {
            return Err(LogError::InvalidOption(format!("rotation_hours={}", config.rotation_hours)));
        }
        if explicit_level {
            config.level_override = true;
        }
        config.refresh_level();
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Whether the level was set explicitly
    pub fn is_level_overridden(&self) -> bool {
        self.level_override
    }

    /// Apply options in order, then re-derive the level unless overridden
    pub fn apply<I>(&mut self, options: I)
    where
        I: IntoIterator<Item = LogOption>,
    {
        for option in options {
            option.apply_to(self);
        }
        self.refresh_level();
    }

    pub(crate) fn set_env(&mut self, env: Env) {
        self.env = env;
        self.level_override = false;
    }

    pub(crate) fn set_level(&mut self, level: Level) {
        self.level = level;
        self.level_override = true;
    }

    fn refresh_level(&mut self) {
        if !self.level_override {
            self.level = self.env.level();
        }
    }

    /// Alias path of the per-stream file for `name`
    pub fn stream_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}_info.log", name))
    }

    /// Alias path of the shared error-aggregation file
    pub fn error_path(&self) -> PathBuf {
        self.log_dir.join(format!("{}.log", self.error_name))
    }
}

/// A single configuration override
#[derive(Debug, Clone, PartialEq)]
pub enum LogOption {
    /// Retention in hours
    MaxAge(i64),
    /// Rotation interval in hours
    RotationTime(i64),
    /// Timestamp template
    Date(TimeFormat),
    /// Explicit severity, overriding the environment default
    Level(Level),
    DefaultName(String),
    ErrorName(String),
    LogDir(PathBuf),
}

impl LogOption {
    fn apply_to(self, config: &mut Config) {
        match self {
            LogOption::MaxAge(hours) => config.max_age_hours = hours,
            LogOption::RotationTime(hours) => config.rotation_hours = hours,
            LogOption::Date(format) => config.time_format = format,
            LogOption::Level(level) => config.set_level(level),
            LogOption::DefaultName(name) => config.default_name = name,
            LogOption::ErrorName(name) => config.error_name = name,
            LogOption::LogDir(dir) => config.log_dir = dir,
        }
    }
}

impl FromStr for LogOption {
    type Err = LogError;

    /// Parse `key=value`, e.g. `max_age=48`, `date=msec`, `level=warn`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || LogError::InvalidOption(s.to_string());
        let (key, value) = s.split_once('=').ok_or_else(invalid)?;
        let value = value.trim();
        match key.trim() {
            "max_age" => match value.parse::<i64>() {
                Ok(hours) if valid_max_age(hours) => Ok(LogOption::MaxAge(hours)),
                _ => Err(invalid()),
            },
            "rotation_time" => match value.parse::<i64>() {
                Ok(hours) if valid_rotation(hours) => Ok(LogOption::RotationTime(hours)),
                _ => Err(invalid()),
            },
            "date" => TimeFormat::parse(value).map(LogOption::Date),
            "level" => value.parse().map(LogOption::Level),
            "name" if !value.is_empty() => Ok(LogOption::DefaultName(value.to_string())),
            "error_name" if !value.is_empty() => Ok(LogOption::ErrorName(value.to_string())),
            "dir" if !value.is_empty() => Ok(LogOption::LogDir(PathBuf::from(value))),
            _ => Err(invalid()),
        }
    }
}
