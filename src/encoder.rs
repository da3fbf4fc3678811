//! JSON line encoding of log records

use std::fmt::Write as _;

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::TimeFormat;
use crate::level::Level;

#[derive(Serialize)]
struct Record<'a> {
    time: String,
    level: &'static str,
    logger: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<String>,
    message: &'a str,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

/// Encodes records as one JSON object per line
#[derive(Debug, Clone)]
pub struct Encoder {
    time_format: TimeFormat,
}

impl Encoder {
    pub fn new(time_format: TimeFormat) -> Self {
        Self { time_format }
    }

    pub fn time_format(&self) -> &TimeFormat {
        &self.time_format
    }

    /// Encode one record, newline terminated
    pub fn encode(
        &self,
        now: DateTime<Local>,
        level: Level,
        logger: &str,
        line: Option<String>,
        message: &str,
        fields: &Map<String, Value>,
    ) -> Vec<u8> {
        let record = Record {
            time: self.format_time(now),
            level: level.as_str(),
            logger,
            line,
            message,
            fields,
        };

        let mut buf = serde_json::to_vec(&record).unwrap_or_else(|e| {
            // only reachable with non-string map keys, which Map cannot hold
            format!("{{\"level\":\"error\",\"message\":\"encode failed: {}\"}}", e).into_bytes()
        });
        buf.push(b'\n');
        buf
    }

    fn format_time(&self, now: DateTime<Local>) -> String {
        let mut out = String::new();
        if write!(out, "{}", now.format(self.time_format.as_str())).is_err() {
            out.clear();
            out.push_str(&now.to_rfc3339());
        }
        out
    }
}

/// `dir/file.rs` and line 42 rendered as `file.rs:42`
pub(crate) fn caller_line(file: &str, line: u32) -> String {
    let short = file.rsplit(['/', '\\']).next().unwrap_or(file);
    format!("{}:{}", short, line)
}
