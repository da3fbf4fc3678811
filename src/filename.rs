//! Parsing of dated rotated-file names
//!
//! Rotated files are named `<prefix><YYYY>-<MM>-<DD>.log[.<N>]`; the alias
//! that always points at the current file is `<prefix>.log`.

use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;

use crate::error::{LogError, Result};

const LOG_SUFFIX: &str = ".log";

/// Prefix and calendar date extracted from a rotated file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDate {
    pub prefix: String,
    pub date: NaiveDate,
}

impl LogDate {
    /// Local wall-clock midnight at the start of `date`
    pub fn midnight_naive(&self) -> NaiveDateTime {
        self.date.and_time(chrono::NaiveTime::MIN)
    }

    /// Midnight at the start of `date` in the local time zone
    pub fn midnight(&self) -> Option<DateTime<Local>> {
        Local.from_local_datetime(&self.midnight_naive()).earliest()
    }

    /// Name of the alias link for this file's prefix
    pub fn alias_name(&self) -> String {
        format!("{}{}", self.prefix, LOG_SUFFIX)
    }
}

/// `<prefix>YYYY-MM-DD.log[.N]`
const LOG_DATE_PATTERN: &str = r"^(.*?)([0-9]{4}-[0-9]{2}-[0-9]{2})\.log(?:\.[0-9]+)?$";

static LOG_DATE_RE: OnceLock<Regex> = OnceLock::new();

fn log_date_re() -> &'static Regex {
    LOG_DATE_RE.get_or_init(|| Regex::new(LOG_DATE_PATTERN).expect("log date pattern is valid"))
}

/// Split a file name into `(prefix, date)`
///
/// Accepts `<prefix>YYYY-MM-DD.log` with an optional numeric `.N` suffix.
/// Anything else, including impossible dates, is `LogError::NoDate`.
pub fn parse_log_date(file_name: &str) -> Result<LogDate> {
    let no_date = || LogError::NoDate(file_name.to_string());

    let captures = log_date_re().captures(file_name).ok_or_else(no_date)?;
    let prefix = captures.get(1).map_or("", |m| m.as_str());
    let date_str = captures.get(2).ok_or_else(no_date)?.as_str();
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|_| no_date())?;

    Ok(LogDate {
        prefix: prefix.to_string(),
        date,
    })
}

/// Whether a name looks like a dated log file (`*20*.log*`)
pub fn matches_dated_glob(file_name: &str) -> bool {
    match file_name.find("20") {
        Some(pos) => file_name[pos + 2..].contains(LOG_SUFFIX),
        None => false,
    }
}

/// Dated file name for `prefix` on `date`
pub fn dated_file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}{}{}", prefix, date.format("%Y-%m-%d"), LOG_SUFFIX)
}
