//! Tidelog - named rotating JSON loggers
//!
//! A [`Manager`] hands out cached, thread-safe [`Logger`]s whose severity can be
//! changed at runtime, removes rotated files past their retention window, and
//! streams lines appended to the shared error file as they are written.

pub mod bridge;
pub mod config;
pub mod encoder;
pub mod error;
pub mod filename;
pub mod level;
pub mod logger;
pub mod manager;
pub mod registry;
pub mod retention;
pub mod rotating;
pub mod sink;
pub mod watch;

pub use bridge::{LoggerLayer, RotatingMakeWriter};
pub use config::{Config, Env, LogOption, TimeFormat};
pub use error::{LogError, Result};
pub use level::Level;
pub use logger::Logger;
pub use manager::{
    clean, debug, default_manager, dpanic, error, fatal, info, install_system_log, logger, panic,
    set_debug_level, set_dpanic_level, set_env, set_error_level, set_fatal_level, set_info_level,
    set_level, set_log, set_panic_level, set_warn_level, sync, update_retention, warn, watch_err,
    watch_err_callback, Manager,
};
pub use retention::CleanupReport;
pub use watch::{ErrorStream, WatchHandle};
