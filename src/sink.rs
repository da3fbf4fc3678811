//! Destinations for encoded records

use std::io::{self, Write};
use std::sync::Arc;

/// A thread-safe, append-only destination for encoded log lines
pub trait LogSink: Send + Sync {
    /// Append one encoded record
    fn write_record(&self, buf: &[u8]) -> io::Result<()>;

    /// Push buffered data to the underlying device
    fn sync(&self) -> io::Result<()>;
}

/// Standard output
#[derive(Debug, Default, Clone, Copy)]
pub struct Stdout;

impl LogSink for Stdout {
    fn write_record(&self, buf: &[u8]) -> io::Result<()> {
        io::stdout().lock().write_all(buf)
    }

    fn sync(&self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}

/// Standard error, the fallback for the error-aggregation stream
#[derive(Debug, Default, Clone, Copy)]
pub struct Stderr;

impl LogSink for Stderr {
    fn write_record(&self, buf: &[u8]) -> io::Result<()> {
        io::stderr().lock().write_all(buf)
    }

    fn sync(&self) -> io::Result<()> {
        io::stderr().lock().flush()
    }
}

/// Writes every record to each inner sink
///
/// All sinks are attempted; the first error is returned.
pub struct Tee {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl Tee {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for Tee {
    fn write_record(&self, buf: &[u8]) -> io::Result<()> {
        let mut result = Ok(());
        for sink in &self.sinks {
            if let Err(e) = sink.write_record(buf) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn sync(&self) -> io::Result<()> {
        let mut result = Ok(());
        for sink in &self.sinks {
            if let Err(e) = sink.sync() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, MemorySink};
    use super::*;

    #[test]
    fn test_tee_writes_to_all_and_reports_first_error() {
        let a = Arc::new(MemorySink::default());
        let b = Arc::new(MemorySink::default());
        let sinks: Vec<Arc<dyn LogSink>> = vec![a.clone(), Arc::new(FailingSink), b.clone()];
        let tee = Tee::new(sinks);

        let err = tee.write_record(b"hello\n").unwrap_err();
        assert_eq!(err.to_string(), "write failed");
        assert_eq!(a.lines.lock().unwrap().as_slice(), ["hello"]);
        assert_eq!(b.lines.lock().unwrap().as_slice(), ["hello"]);

        assert!(tee.sync().is_err());
        assert_eq!(*a.syncs.lock().unwrap(), 1);
        assert_eq!(*b.syncs.lock().unwrap(), 1);
    }
}
