//! Integration with the `tracing` ecosystem
//!
//! `LoggerLayer` forwards `tracing` events into a named [`Logger`], and
//! [`install_system_log`] routes the process's own unstructured diagnostics to
//! a size-rotated file.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::encoder::caller_line;
use crate::error::Result;
use crate::level::Level;
use crate::logger::Logger;
use crate::rotating::RotatingFile;
use crate::sink::{LogSink, Stdout};

/// Segments kept by the system log
pub const SYSTEM_LOG_COUNT: usize = 7;

/// Size at which the system log starts a new segment
pub const SYSTEM_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Collects the message and fields of one event
#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }
}

/// A [`tracing_subscriber::Layer`] writing every event through a [`Logger`]
///
/// The logger's own gates apply, so events below the manager's level are
/// dropped and error events also reach the shared error file.
#[derive(Debug, Clone)]
pub struct LoggerLayer {
    logger: Logger,
}

impl LoggerLayer {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LoggerLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = Level::from(*metadata.level());
        if !self.logger.enabled(level) {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        collector
            .fields
            .insert("target".to_string(), Value::from(metadata.target()));

        let line = || match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => Some(caller_line(file, line)),
            _ => None,
        };
        self.logger
            .write(level, line, &collector.message, &collector.fields);
    }
}

/// Writer handed out per event by [`RotatingMakeWriter`]
pub struct RotatingWriter {
    file: Arc<RotatingFile>,
    mirror: Option<Arc<dyn LogSink>>,
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.write_record(buf) {
                tracing::debug!("Failed to mirror system log line: {}", e);
            }
        }
        self.file.write_record(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.sync()
    }
}

/// Writer factory for `tracing_subscriber::fmt` backed by a rotating file
#[derive(Clone)]
pub struct RotatingMakeWriter {
    file: Arc<RotatingFile>,
    mirror: Option<Arc<dyn LogSink>>,
}

impl std::fmt::Debug for RotatingMakeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingMakeWriter")
            .field("file", &self.file)
            .field("mirror", &self.mirror.is_some())
            .finish()
    }
}

impl RotatingMakeWriter {
    /// `mirror` also copies every line to stdout
    pub fn new(file: RotatingFile, mirror: bool) -> Self {
        let mirror: Option<Arc<dyn LogSink>> = if mirror { Some(Arc::new(Stdout)) } else { None };
        Self {
            file: Arc::new(file),
            mirror,
        }
    }

    /// Copy every line to `mirror` as well; a failing mirror never fails the write
    pub fn with_mirror(file: RotatingFile, mirror: Arc<dyn LogSink>) -> Self {
        Self {
            file: Arc::new(file),
            mirror: Some(mirror),
        }
    }
}

impl<'a> MakeWriter<'a> for RotatingMakeWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriter {
            file: Arc::clone(&self.file),
            mirror: self.mirror.clone(),
        }
    }
}

/// Install the global `tracing` subscriber writing to a size-rotated file
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Fails if a global
/// subscriber is already set.
pub fn install_system_log(path: &Path, mirror: bool) -> Result<()> {
    let file = RotatingFile::by_size(path, SYSTEM_LOG_COUNT, SYSTEM_LOG_SIZE)?;
    let writer = RotatingMakeWriter::new(file, mirror);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()?;
    Ok(())
}
