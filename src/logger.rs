//! Named log writer handles

use std::fmt;
use std::io;
use std::panic::Location;
use std::sync::Arc;

use chrono::Local;
use serde_json::{Map, Value};

use crate::encoder::{caller_line, Encoder};
use crate::level::{Level, SharedLevel};
use crate::sink::LogSink;

struct Inner {
    name: String,
    encoder: Encoder,
    stream: Arc<dyn LogSink>,
    errors: Arc<dyn LogSink>,
    level: SharedLevel,
}

/// A cached, thread-safe writer bound to one logical stream
///
/// Every record at or above the manager's live level goes to the stream's own
/// file; every record at `Error` or above also goes to the shared
/// error-aggregation file. Clones share the same underlying writer.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("level", &self.inner.level.get())
            .finish()
    }
}

impl Logger {
    pub(crate) fn new(
        name: impl Into<String>,
        encoder: Encoder,
        stream: Arc<dyn LogSink>,
        errors: Arc<dyn LogSink>,
        level: SharedLevel,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                encoder,
                stream,
                errors,
                level,
            }),
        }
    }

    /// Logical stream name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether two handles are the same cached writer
    pub fn ptr_eq(&self, other: &Logger) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether a record at `level` would be written anywhere
    pub fn enabled(&self, level: Level) -> bool {
        self.inner.level.enabled(level) || level >= Level::Error
    }

    #[track_caller]
    pub fn log(&self, level: Level, message: &str) {
        self.write_at_caller(level, Location::caller(), message, &Map::new());
    }

    /// Log with structured fields
    #[track_caller]
    pub fn log_with(&self, level: Level, message: &str, fields: &Map<String, Value>) {
        self.write_at_caller(level, Location::caller(), message, fields);
    }

    #[track_caller]
    pub fn debug(&self, message: &str) {
        self.write_at_caller(Level::Debug, Location::caller(), message, &Map::new());
    }

    #[track_caller]
    pub fn info(&self, message: &str) {
        self.write_at_caller(Level::Info, Location::caller(), message, &Map::new());
    }

    #[track_caller]
    pub fn warn(&self, message: &str) {
        self.write_at_caller(Level::Warn, Location::caller(), message, &Map::new());
    }

    #[track_caller]
    pub fn error(&self, message: &str) {
        self.write_at_caller(Level::Error, Location::caller(), message, &Map::new());
    }

    #[track_caller]
    pub fn dpanic(&self, message: &str) {
        self.write_at_caller(Level::DPanic, Location::caller(), message, &Map::new());
    }

    /// Write a `panic` record; the calling thread keeps running
    #[track_caller]
    pub fn panic(&self, message: &str) {
        self.write_at_caller(Level::Panic, Location::caller(), message, &Map::new());
    }

    /// Write a `fatal` record; the process is not terminated
    #[track_caller]
    pub fn fatal(&self, message: &str) {
        self.write_at_caller(Level::Fatal, Location::caller(), message, &Map::new());
    }

    /// Flush both destinations
    pub fn sync(&self) -> io::Result<()> {
        let stream = self.inner.stream.sync();
        let errors = self.inner.errors.sync();
        stream.and(errors)
    }

    fn write_at_caller(
        &self,
        level: Level,
        caller: &Location<'_>,
        message: &str,
        fields: &Map<String, Value>,
    ) {
        self.write(level, || Some(caller_line(caller.file(), caller.line())), message, fields);
    }

    /// Encode and dispatch one record; `line` is only evaluated if it is written
    pub(crate) fn write<L>(&self, level: Level, line: L, message: &str, fields: &Map<String, Value>)
    where
        L: FnOnce() -> Option<String>,
    {
        let to_stream = self.inner.level.enabled(level);
        let to_errors = level >= Level::Error;
        if !to_stream && !to_errors {
            return;
        }

        let buf = self.inner.encoder.encode(
            Local::now(),
            level,
            &self.inner.name,
            line(),
            message,
            fields,
        );

        // a failing destination must never reach the caller
        if to_stream {
            if let Err(e) = self.inner.stream.write_record(&buf) {
                tracing::debug!(logger = %self.inner.name, "Failed to write log record: {}", e);
            }
        }
        if to_errors {
            if let Err(e) = self.inner.errors.write_record(&buf) {
                tracing::debug!(logger = %self.inner.name, "Failed to write error record: {}", e);
            }
        }
    }
}
