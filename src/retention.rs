//! Log file retention management
//!
//! Deletes dated log files whose date is older than the retention window, and
//! alias links whose prefix has no remaining fresh file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveTime};

use crate::config::MAX_HOURS;
use crate::filename::{matches_dated_glob, parse_log_date};

/// Files removed by one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Expired dated files
    pub files: Vec<PathBuf>,
    /// Alias links with no fresh file left
    pub aliases: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.aliases.is_empty()
    }
}

/// Clean `logs_dir` relative to today's date
pub fn cleanup_old_logs(logs_dir: &Path, retention_hours: i64) -> CleanupReport {
    cleanup_old_logs_at(logs_dir, retention_hours, Local::now().date_naive())
}

/// Clean `logs_dir` as if today were `today`
///
/// A file dated `D` expires when `midnight(today) - midnight(D)` exceeds
/// `retention_hours + 24` hours. Failures are logged and skipped.
pub fn cleanup_old_logs_at(logs_dir: &Path, retention_hours: i64, today: NaiveDate) -> CleanupReport {
    let mut report = CleanupReport::default();

    let entries = match fs::read_dir(logs_dir) {
        Ok(entries) => entries,
        Err(e) => {
            if logs_dir.exists() {
                tracing::warn!(dir = %logs_dir.display(), "Failed to list log directory: {}", e);
            }
            return report;
        }
    };

    let midnight = today.and_time(NaiveTime::MIN);
    // below -24 the window would start expiring today's files
    let window = chrono::Duration::hours(retention_hours.clamp(-24, MAX_HOURS) + 24);

    let mut expired: HashSet<String> = HashSet::new();
    let mut retained: HashSet<String> = HashSet::new();

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !matches_dated_glob(name) {
            continue;
        }
        let Ok(log_date) = parse_log_date(name) else {
            continue;
        };

        if midnight - log_date.midnight_naive() > window {
            match fs::remove_file(&path) {
                Ok(()) => report.files.push(path.clone()),
                Err(e) => tracing::warn!(path = %path.display(), "Failed to delete expired log: {}", e),
            }
            if !log_date.prefix.is_empty() {
                expired.insert(log_date.alias_name());
            }
        } else if !log_date.prefix.is_empty() {
            retained.insert(log_date.alias_name());
        }
    }

    for alias in expired.difference(&retained) {
        let path = logs_dir.join(alias);
        // symlink_metadata so a dangling alias is still found
        if fs::symlink_metadata(&path).is_err() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => report.aliases.push(path),
            Err(e) => tracing::warn!(path = %path.display(), "Failed to delete log alias: {}", e),
        }
    }

    if !report.is_empty() {
        tracing::info!(
            files = report.files.len(),
            aliases = report.aliases.len(),
            "Cleaned up old log files"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filename::dated_file_name;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap().write_all(b"test").unwrap();
        path
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn days_ago(days: i64) -> NaiveDate {
        today() - chrono::Duration::days(days)
    }

    #[test]
    fn test_cleanup_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        let report = cleanup_old_logs_at(temp_dir.path(), 240, today());
        assert!(report.is_empty());
    }

    #[test]
    fn test_cleanup_nonexistent_dir() {
        let path = Path::new("/nonexistent/path/for/testing");
        assert!(cleanup_old_logs(path, 240).is_empty());
    }

    #[test]
    fn test_cleanup_ignores_non_matching_files() {
        let temp_dir = TempDir::new().unwrap();
        let other = touch(temp_dir.path(), "other.txt");
        let bad_date = touch(temp_dir.path(), "app2000-13-45.log");
        let no_date = touch(temp_dir.path(), "app2000.log");

        let report = cleanup_old_logs_at(temp_dir.path(), 0, today());
        assert!(report.is_empty());
        assert!(other.exists());
        assert!(bad_date.exists());
        assert!(no_date.exists());
    }

    #[test]
    fn test_expiry_boundary() {
        let temp_dir = TempDir::new().unwrap();
        // window = 48h + 24h = 3 days; exactly 3 days is kept
        let kept = touch(temp_dir.path(), &dated_file_name("a", days_ago(3)));
        let gone = touch(temp_dir.path(), &dated_file_name("a", days_ago(4)));

        let report = cleanup_old_logs_at(temp_dir.path(), 48, today());
        assert!(kept.exists());
        assert!(!gone.exists());
        assert_eq!(report.files, vec![gone]);
    }

    #[test]
    fn test_rotation_suffix_files_expire_too() {
        let temp_dir = TempDir::new().unwrap();
        let name = format!("{}.2", dated_file_name("sys", days_ago(30)));
        let old = touch(temp_dir.path(), &name);

        cleanup_old_logs_at(temp_dir.path(), 24, today());
        assert!(!old.exists());
    }

    #[test]
    fn test_alias_kept_while_fresh_file_exists() {
        let temp_dir = TempDir::new().unwrap();
        let fresh_1 = touch(temp_dir.path(), &dated_file_name("api_info", days_ago(1)));
        let fresh_11 = touch(temp_dir.path(), &dated_file_name("api_info", days_ago(11)));
        let old_40 = touch(temp_dir.path(), &dated_file_name("api_info", days_ago(40)));
        let alias = touch(temp_dir.path(), "api_info.log");

        let report = cleanup_old_logs_at(temp_dir.path(), 10 * 24, today());

        assert!(fresh_1.exists());
        assert!(fresh_11.exists());
        assert!(!old_40.exists());
        assert!(alias.exists());
        assert_eq!(report.files, vec![old_40]);
        assert!(report.aliases.is_empty());
    }

    #[test]
    fn test_orphaned_alias_removed() {
        let temp_dir = TempDir::new().unwrap();
        let old = touch(temp_dir.path(), &dated_file_name("gone", days_ago(20)));
        let alias = touch(temp_dir.path(), "gone.log");
        let other_alias = touch(temp_dir.path(), "kept.log");

        let report = cleanup_old_logs_at(temp_dir.path(), 24, today());

        assert!(!old.exists());
        assert!(!alias.exists());
        assert!(other_alias.exists());
        assert_eq!(report.aliases, vec![alias]);
    }

    #[test]
    fn test_negative_retention_keeps_only_today() {
        let temp_dir = TempDir::new().unwrap();
        let current = touch(temp_dir.path(), &dated_file_name("x", today()));
        let yesterday = touch(temp_dir.path(), &dated_file_name("x", days_ago(1)));

        cleanup_old_logs_at(temp_dir.path(), -24, today());
        assert!(current.exists());
        assert!(!yesterday.exists());
    }

    #[test]
    fn test_extreme_retention_is_clamped() {
        let temp_dir = TempDir::new().unwrap();
        let ancient = touch(temp_dir.path(), &dated_file_name("x", days_ago(5000)));
        let yesterday = touch(temp_dir.path(), &dated_file_name("x", days_ago(1)));
        let current = touch(temp_dir.path(), &dated_file_name("x", today()));

        let report = cleanup_old_logs_at(temp_dir.path(), i64::MAX, today());
        assert!(report.is_empty());
        assert!(ancient.exists());

        cleanup_old_logs_at(temp_dir.path(), i64::MIN, today());
        assert!(!ancient.exists());
        assert!(!yesterday.exists());
        assert!(current.exists());
    }

    #[test]
    fn test_empty_prefix_never_touches_alias() {
        let temp_dir = TempDir::new().unwrap();
        let old = touch(temp_dir.path(), &dated_file_name("", days_ago(20)));
        let bare_alias = touch(temp_dir.path(), ".log");

        let report = cleanup_old_logs_at(temp_dir.path(), 24, today());
        assert!(!old.exists());
        assert!(bare_alias.exists());
        assert!(report.aliases.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_alias_symlink_removed() {
        let temp_dir = TempDir::new().unwrap();
        let old_name = dated_file_name("svc", days_ago(30));
        touch(temp_dir.path(), &old_name);
        let alias = temp_dir.path().join("svc.log");
        std::os::unix::fs::symlink(&old_name, &alias).unwrap();

        let report = cleanup_old_logs_at(temp_dir.path(), 24, today());
        assert!(fs::symlink_metadata(&alias).is_err());
        assert_eq!(report.aliases, vec![alias]);
    }
}
