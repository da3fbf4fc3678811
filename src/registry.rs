//! Cache of named loggers
//!
//! Each manager owns one registry. A logger is built at most once per name and
//! registry generation; `reset` starts a new generation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::config::Config;
use crate::encoder::Encoder;
use crate::level::SharedLevel;
use crate::logger::Logger;
use crate::rotating::RotatingFile;
use crate::sink::{LogSink, Stderr, Stdout, Tee};

const HOUR: u64 = 60 * 60;

/// Named logger cache with a shared error-aggregation writer
pub struct WriterRegistry {
    loggers: RwLock<HashMap<String, Logger>>,
    error_sink: Mutex<Option<Arc<dyn LogSink>>>,
    level: SharedLevel,
}

impl WriterRegistry {
    pub fn new(level: SharedLevel) -> Self {
        Self {
            loggers: RwLock::new(HashMap::new()),
            error_sink: Mutex::new(None),
            level,
        }
    }

    /// Cached logger for `name`, if one has been built
    pub fn get(&self, name: &str) -> Option<Logger> {
        let loggers = match self.loggers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loggers.get(name).cloned()
    }

    /// Cached logger for `name`, building it from `config` on first use
    ///
    /// `config` is only called when a logger has to be built.
    pub fn get_or_create<F>(&self, name: &str, config: F) -> Logger
    where
        F: FnOnce() -> Config,
    {
        if let Some(logger) = self.get(name) {
            return logger;
        }

        let mut loggers = match self.loggers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(logger) = loggers.get(name) {
            return logger.clone();
        }

        let logger = self.build(name, &config());
        loggers.insert(name.to_string(), logger.clone());
        logger
    }

    /// Number of cached loggers
    pub fn len(&self) -> usize {
        self.loggers.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, name: &str, logger: Logger) {
        if let Ok(mut loggers) = self.loggers.write() {
            loggers.insert(name.to_string(), logger);
        }
    }

    /// Drop every cached logger and the shared error writer
    pub fn reset(&self) {
        match self.loggers.write() {
            Ok(mut loggers) => loggers.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        match self.error_sink.lock() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    fn build(&self, name: &str, config: &Config) -> Logger {
        let encoder = Encoder::new(config.time_format.clone());
        let stream = stream_sink(name, config);
        let errors = self.ensure_error_sink(config);
        tracing::debug!(logger = name, dir = %config.log_dir.display(), "Built logger");
        Logger::new(name, encoder, stream, errors, self.level.clone())
    }

    /// The shared error writer, created on first call after construction or reset
    fn ensure_error_sink(&self, config: &Config) -> Arc<dyn LogSink> {
        let mut slot = match self.error_sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sink) = slot.as_ref() {
            return Arc::clone(sink);
        }

        let path = config.error_path();
        let sink: Arc<dyn LogSink> = match RotatingFile::by_age(&path, max_age(config), rotation(config)) {
            Ok(file) => Arc::new(file),
            Err(e) => {
                tracing::error!(path = %path.display(), "Failed to create error writer, using stderr: {}", e);
                Arc::new(Stderr)
            }
        };
        *slot = Some(Arc::clone(&sink));
        sink
    }
}

/// Per-stream destination: file only in production, file and stdout otherwise
fn stream_sink(name: &str, config: &Config) -> Arc<dyn LogSink> {
    let path = config.stream_path(name);
    let file: Arc<dyn LogSink> = match RotatingFile::by_age(&path, max_age(config), rotation(config)) {
        Ok(file) => Arc::new(file),
        Err(e) => {
            tracing::error!(path = %path.display(), "Failed to create log writer, using stdout: {}", e);
            return Arc::new(Stdout);
        }
    };

    if config.env.is_production() {
        file
    } else {
        let sinks: Vec<Arc<dyn LogSink>> = vec![Arc::new(Stdout), file];
        Arc::new(Tee::new(sinks))
    }
}

fn max_age(config: &Config) -> Duration {
    hours(config.max_age_hours)
}

fn rotation(config: &Config) -> Duration {
    hours(config.rotation_hours)
}

/// Negative hours are zero; huge values saturate
fn hours(hours: i64) -> Duration {
    Duration::from_secs(u64::try_from(hours).unwrap_or(0).saturating_mul(HOUR))
}
