//! Logging manager and the process-wide default instance
//!
//! A `Manager` owns one configuration, one shared severity level and one writer
//! registry. Managers are independent of each other; the free functions at the
//! bottom of this module forward to a lazily built default instance.

use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

use crate::bridge::{self, LoggerLayer};
use crate::config::{valid_max_age, valid_rotation, Config, Env, LogOption};
use crate::error::{panic_message, LogError, Result};
use crate::level::{Level, SharedLevel};
use crate::logger::Logger;
use crate::registry::WriterRegistry;
use crate::retention::{cleanup_old_logs, CleanupReport};
use crate::watch::{self, ErrorStream, WatchHandle};

/// Owner of a logging configuration and its cached loggers
pub struct Manager {
    config: RwLock<Config>,
    level: SharedLevel,
    registry: WriterRegistry,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config())
            .field("loggers", &self.registry.len())
            .finish()
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl Manager {
    /// Manager with the default configuration and `options` applied in order
    pub fn new<I>(options: I) -> Self
    where
        I: IntoIterator<Item = LogOption>,
    {
        let mut config = Config::default();
        config.apply(options);
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Self {
        let level = SharedLevel::new(config.level);
        Self {
            registry: WriterRegistry::new(level.clone()),
            level,
            config: RwLock::new(config),
        }
    }

    /// Copy of the current configuration
    pub fn config(&self) -> Config {
        self.read_config().clone()
    }

    /// Current severity threshold
    pub fn level(&self) -> Level {
        self.level.get()
    }

    /// Replace the environment and apply `options`; cached loggers are rebuilt
    ///
    /// An explicit level set earlier is cleared, so the level follows `env`
    /// unless `options` override it again.
    pub fn set_log<I>(&self, env: Env, options: I)
    where
        I: IntoIterator<Item = LogOption>,
    {
        {
            let mut config = self.write_config();
            config.set_env(env);
            config.apply(options);
            self.level.set(config.level);
        }
        self.registry.reset();
        tracing::debug!(env = %env, level = %self.level.get(), "Log configuration replaced");
    }

    /// `set_log` with an environment name such as `pro` or `debug`
    pub fn set_env(&self, env: &str) -> Result<()> {
        let env: Env = env.parse()?;
        self.set_log(env, []);
        Ok(())
    }

    /// Change retention and rotation; cached loggers are rebuilt
    ///
    /// Out-of-range hours are rejected with `LogError::InvalidOption` and leave
    /// the configuration untouched.
    pub fn update_retention(&self, max_age_hours: i64, rotation_hours: i64) -> Result<()> {
        if !valid_max_age(max_age_hours) {
            return Err(LogError::InvalidOption(format!("max_age={}", max_age_hours)));
        }
        if !valid_rotation(rotation_hours) {
            return Err(LogError::InvalidOption(format!("rotation_time={}", rotation_hours)));
        }
        {
            let mut config = self.write_config();
            config.max_age_hours = max_age_hours;
            config.rotation_hours = rotation_hours;
        }
        self.registry.reset();
        Ok(())
    }

    /// Set an explicit level; existing loggers observe it on their next write
    pub fn set_level(&self, level: Level) {
        self.write_config().set_level(level);
        self.level.set(level);
    }

    pub fn set_debug_level(&self) {
        self.set_level(Level::Debug);
    }

    pub fn set_info_level(&self) {
        self.set_level(Level::Info);
    }

    pub fn set_warn_level(&self) {
        self.set_level(Level::Warn);
    }

    pub fn set_error_level(&self) {
        self.set_level(Level::Error);
    }

    pub fn set_dpanic_level(&self) {
        self.set_level(Level::DPanic);
    }

    pub fn set_panic_level(&self) {
        self.set_level(Level::Panic);
    }

    pub fn set_fatal_level(&self) {
        self.set_level(Level::Fatal);
    }

    /// Logger for `name`, built on first use; an empty name is the default stream
    pub fn logger(&self, name: &str) -> Logger {
        if name.is_empty() {
            return self.default_logger();
        }
        self.registry.get_or_create(name, || self.config())
    }

    /// Logger for the configured default stream
    pub fn default_logger(&self) -> Logger {
        let name = self.read_config().default_name.clone();
        self.registry.get_or_create(&name, || self.config())
    }

    /// Flush the logger cached under `name`
    ///
    /// Unknown names are not an error. A panic while flushing is caught,
    /// logged and returned as `LogError::Panicked`.
    pub fn sync(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(LogError::EmptyName);
        }
        let Some(logger) = self.registry.get(name) else {
            return Ok(());
        };

        match catch_unwind(AssertUnwindSafe(|| logger.sync())) {
            Ok(result) => result.map_err(LogError::from),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let backtrace = Backtrace::force_capture().to_string();
                tracing::error!(logger = name, %backtrace, "Panic while flushing logger: {}", message);

                let mut fields = Map::new();
                fields.insert("logger".to_string(), Value::from(name));
                fields.insert("backtrace".to_string(), Value::from(backtrace));
                if logger.name() != self.read_config().default_name {
                    self.default_logger()
                        .log_with(Level::Error, "panic while flushing logger", &fields);
                }
                Err(LogError::Panicked(message))
            }
        }
    }

    /// Delete expired files from this manager's log directory
    pub fn clean(&self) -> CleanupReport {
        let config = self.config();
        cleanup_old_logs(&config.log_dir, config.max_age_hours)
    }

    /// Stream lines appended to the shared error file
    pub async fn watch_err(&self) -> Result<ErrorStream> {
        let config = self.config();
        watch::watch_err(&config.log_dir, &config.error_name).await
    }

    /// Call `f` for every line appended to the shared error file
    pub async fn watch_err_callback<F>(&self, f: F) -> Result<WatchHandle>
    where
        F: Fn(String) + Send + 'static,
    {
        let config = self.config();
        watch::watch_err_callback(&config.log_dir, &config.error_name, f).await
    }

    /// Route the process's `tracing` output to a size-rotated file at `path`
    ///
    /// Outside production the output is mirrored to stdout.
    pub fn install_system_log(&self, path: &Path) -> Result<()> {
        let mirror = !self.read_config().env.is_production();
        bridge::install_system_log(path, mirror)
    }

    /// A `tracing` layer writing through the logger for `name`
    pub fn tracing_layer(&self, name: &str) -> LoggerLayer {
        LoggerLayer::new(self.logger(name))
    }

    fn read_config(&self) -> RwLockReadGuard<'_, Config> {
        match self.config.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_config(&self) -> RwLockWriteGuard<'_, Config> {
        match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &WriterRegistry {
        &self.registry
    }
}

static DEFAULT_MANAGER: OnceLock<Manager> = OnceLock::new();

/// The process-wide manager, built from the environment on first use
///
/// First use creates the log directory and runs one retention pass.
pub fn default_manager() -> &'static Manager {
    DEFAULT_MANAGER.get_or_init(|| {
        let manager = Manager::default();
        let dir = manager.config().log_dir;
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), "Failed to create log directory: {}", e);
        }
        manager.clean();
        manager
    })
}

/// Logger for `name` from the default manager
pub fn logger(name: &str) -> Logger {
    default_manager().logger(name)
}

pub fn sync(name: &str) -> Result<()> {
    default_manager().sync(name)
}

pub fn set_log<I>(env: Env, options: I)
where
    I: IntoIterator<Item = LogOption>,
{
    default_manager().set_log(env, options)
}

pub fn set_env(env: &str) -> Result<()> {
    default_manager().set_env(env)
}

pub fn set_level(level: Level) {
    default_manager().set_level(level)
}

pub fn set_debug_level() {
    default_manager().set_debug_level()
}

pub fn set_info_level() {
    default_manager().set_info_level()
}

pub fn set_warn_level() {
    default_manager().set_warn_level()
}

pub fn set_error_level() {
    default_manager().set_error_level()
}

pub fn set_dpanic_level() {
    default_manager().set_dpanic_level()
}

pub fn set_panic_level() {
    default_manager().set_panic_level()
}

pub fn set_fatal_level() {
    default_manager().set_fatal_level()
}

pub fn update_retention(max_age_hours: i64, rotation_hours: i64) -> Result<()> {
    default_manager().update_retention(max_age_hours, rotation_hours)
}

pub fn clean() -> CleanupReport {
    default_manager().clean()
}

pub async fn watch_err() -> Result<ErrorStream> {
    default_manager().watch_err().await
}

pub async fn watch_err_callback<F>(f: F) -> Result<WatchHandle>
where
    F: Fn(String) + Send + 'static,
{
    default_manager().watch_err_callback(f).await
}

pub fn install_system_log(path: &Path) -> Result<()> {
    default_manager().install_system_log(path)
}

/// Write to the default manager's default stream
#[track_caller]
pub fn debug(message: &str) {
    default_manager().default_logger().debug(message)
}

#[track_caller]
pub fn info(message: &str) {
    default_manager().default_logger().info(message)
}

#[track_caller]
pub fn warn(message: &str) {
    default_manager().default_logger().warn(message)
}

#[track_caller]
pub fn error(message: &str) {
    default_manager().default_logger().error(message)
}

#[track_caller]
pub fn dpanic(message: &str) {
    default_manager().default_logger().dpanic(message)
}

/// Write a `panic` record to the default stream without panicking
#[track_caller]
pub fn panic(message: &str) {
    default_manager().default_logger().panic(message)
}

/// Write a `fatal` record to the default stream without exiting
#[track_caller]
pub fn fatal(message: &str) {
    default_manager().default_logger().fatal(message)
}
