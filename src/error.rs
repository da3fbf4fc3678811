//! Error type shared by every tidelog module

use thiserror::Error;

/// Errors surfaced by tidelog operations
///
/// Logging calls themselves never return these; only operations a caller asks
/// for explicitly (flush, watch, option parsing, config loading) do.
#[derive(Debug, Error)]
pub enum LogError {
    /// The file name does not carry a `YYYY-MM-DD.log[.N]` date
    #[error("no date found in file name: {0}")]
    NoDate(String),

    /// An option string could not be turned into a `LogOption`
    #[error("invalid log option '{0}'")]
    InvalidOption(String),

    /// Unknown severity name
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    /// Unknown environment tag
    #[error("invalid environment '{0}'")]
    InvalidEnv(String),

    /// The strftime template contains an invalid specifier
    #[error("invalid time format '{0}'")]
    InvalidTimeFormat(String),

    /// `sync` was called without a logger name
    #[error("logger name must not be empty")]
    EmptyName,

    /// A panic was caught at an API boundary
    #[error("panicked: {0}")]
    Panicked(String),

    /// I/O error while flushing, listing or opening log files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the directory watcher
    #[error("file system watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// A global tracing subscriber is already installed
    #[error("failed to install system log: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    /// Configuration file could not be parsed
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

/// A specialized Result type for tidelog operations
pub type Result<T> = std::result::Result<T, LogError>;

/// Render a caught panic payload as text
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_str_and_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_io_error_converts() {
        let err: LogError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.to_string().contains("gone"));
    }
}
