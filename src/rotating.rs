//! Rotating log files
//!
//! A `RotatingFile` writes to `<dir>/<stem>YYYY-MM-DD.log`, switching to a new
//! dated file when the rotation interval elapses on a new day, and keeps
//! `<dir>/<stem>.log` pointing at the current file. Size-based rotation adds a
//! `.N` generation suffix within one day.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, NaiveDate};

use crate::filename::{dated_file_name, parse_log_date};
use crate::sink::LogSink;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// When a rotating file starts a new segment and which old segments it purges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Rotate every `interval`, purge segments whose mtime is older than `max_age`
    ByAge { max_age: Duration, interval: Duration },
    /// Rotate daily and whenever a segment exceeds `size` bytes, keep `count` segments
    BySize { count: usize, size: u64 },
}

struct Segment {
    file: File,
    path: PathBuf,
    date: NaiveDate,
    bucket: i64,
    generation: u32,
    written: u64,
}

/// A file writer that rotates by time or size and maintains an alias link
pub struct RotatingFile {
    dir: PathBuf,
    stem: String,
    alias: PathBuf,
    policy: RotationPolicy,
    segment: Mutex<Segment>,
}

impl std::fmt::Debug for RotatingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFile")
            .field("alias", &self.alias)
            .field("policy", &self.policy)
            .finish()
    }
}

impl RotatingFile {
    /// Time-rotated file with age-based purging
    pub fn by_age(alias: impl Into<PathBuf>, max_age: Duration, interval: Duration) -> io::Result<Self> {
        let interval = if interval.is_zero() { DAY } else { interval };
        Self::open(alias.into(), RotationPolicy::ByAge { max_age, interval })
    }

    /// Size-rotated file keeping at most `count` segments
    pub fn by_size(alias: impl Into<PathBuf>, count: usize, size: u64) -> io::Result<Self> {
        Self::open(
            alias.into(),
            RotationPolicy::BySize {
                count: count.max(1),
                size: size.max(1),
            },
        )
    }

    fn open(alias: PathBuf, policy: RotationPolicy) -> io::Result<Self> {
        let file_name = alias
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "alias path has no file name"))?;
        let stem = file_name.strip_suffix(".log").unwrap_or(file_name).to_string();
        let dir = match alias.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let now = Local::now();
        let date = now.date_naive();
        let mut generation = 0;
        if let RotationPolicy::BySize { size, .. } = policy {
            while segment_len(&segment_path(&dir, &stem, date, generation)) >= size {
                generation += 1;
            }
        }
        let path = segment_path(&dir, &stem, date, generation);
        let file = open_append(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);

        let rotating = Self {
            dir,
            stem,
            alias,
            policy,
            segment: Mutex::new(Segment {
                file,
                path: path.clone(),
                date,
                bucket: bucket_of(&policy, now),
                generation,
                written,
            }),
        };
        rotating.link_alias(&path);
        Ok(rotating)
    }

    /// Stable alias path
    pub fn alias(&self) -> &Path {
        &self.alias
    }

    /// Path of the segment currently written to
    pub fn current_path(&self) -> PathBuf {
        match self.segment.lock() {
            Ok(segment) => segment.path.clone(),
            Err(poisoned) => poisoned.into_inner().path.clone(),
        }
    }

    pub(crate) fn write_at(&self, buf: &[u8], now: DateTime<Local>) -> io::Result<()> {
        let mut segment = self
            .segment
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "rotating file lock poisoned"))?;

        if let Some((date, generation)) = self.next_segment(&segment, now, buf.len() as u64) {
            let path = segment_path(&self.dir, &self.stem, date, generation);
            let file = open_append(&path)?;
            segment.written = file.metadata().map(|m| m.len()).unwrap_or(0);
            segment.file = file;
            segment.path = path.clone();
            segment.date = date;
            segment.generation = generation;
            self.link_alias(&path);
            self.purge(&path, now);
        }
        segment.bucket = bucket_of(&self.policy, now);

        segment.file.write_all(buf)?;
        segment.written += buf.len() as u64;
        Ok(())
    }

    /// The (date, generation) to switch to before writing `incoming` bytes, if any
    fn next_segment(&self, segment: &Segment, now: DateTime<Local>, incoming: u64) -> Option<(NaiveDate, u32)> {
        let date = now.date_naive();
        match self.policy {
            RotationPolicy::ByAge { .. } => {
                let due = bucket_of(&self.policy, now) != segment.bucket;
                (due && date != segment.date).then_some((date, 0))
            }
            RotationPolicy::BySize { size, .. } => {
                if date != segment.date {
                    Some((date, 0))
                } else if segment.written > 0 && segment.written + incoming > size {
                    Some((date, segment.generation + 1))
                } else {
                    None
                }
            }
        }
    }

    #[cfg(unix)]
    fn link_alias(&self, target: &Path) {
        let Some(target_name) = target.file_name() else {
            return;
        };
        let mut tmp = self.alias.clone().into_os_string();
        tmp.push("_symlink");
        let tmp = PathBuf::from(tmp);

        let _ = fs::remove_file(&tmp);
        let result = std::os::unix::fs::symlink(target_name, &tmp).and_then(|_| fs::rename(&tmp, &self.alias));
        if let Err(e) = result {
            tracing::warn!(alias = %self.alias.display(), "Failed to update log alias: {}", e);
        }
    }

    #[cfg(not(unix))]
    fn link_alias(&self, _target: &Path) {}

    /// Remove old segments of this stem according to the policy
    fn purge(&self, current: &Path, now: DateTime<Local>) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), "Failed to list log directory: {}", e);
                return;
            }
        };

        let mut segments: Vec<(PathBuf, SystemTime)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_name()?.to_str()?;
                let parsed = parse_log_date(name).ok()?;
                if parsed.prefix != self.stem || path == current {
                    return None;
                }
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((path, modified))
            })
            .collect();

        let doomed: Vec<PathBuf> = match self.policy {
            RotationPolicy::ByAge { max_age, .. } => {
                if max_age.is_zero() {
                    return;
                }
                let cutoff = SystemTime::from(now)
                    .checked_sub(max_age)
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                segments
                    .into_iter()
                    .filter(|(_, modified)| *modified < cutoff)
                    .map(|(path, _)| path)
                    .collect()
            }
            RotationPolicy::BySize { count, .. } => {
                // newest first; the current segment counts towards `count`
                segments.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
                segments
                    .into_iter()
                    .skip(count.saturating_sub(1))
                    .map(|(path, _)| path)
                    .collect()
            }
        };

        for path in doomed {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "Failed to purge rotated log: {}", e);
            }
        }
    }
}

impl LogSink for RotatingFile {
    fn write_record(&self, buf: &[u8]) -> io::Result<()> {
        self.write_at(buf, Local::now())
    }

    fn sync(&self) -> io::Result<()> {
        let mut segment = self
            .segment
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "rotating file lock poisoned"))?;
        segment.file.flush()?;
        segment.file.sync_data()
    }
}

fn segment_path(dir: &Path, stem: &str, date: NaiveDate, generation: u32) -> PathBuf {
    let name = dated_file_name(stem, date);
    if generation == 0 {
        dir.join(name)
    } else {
        dir.join(format!("{}.{}", name, generation))
    }
}

fn segment_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Index of the rotation interval containing `now`, on the local wall clock
fn bucket_of(policy: &RotationPolicy, now: DateTime<Local>) -> i64 {
    let interval = match policy {
        RotationPolicy::ByAge { interval, .. } => {
            i64::try_from(interval.as_secs()).unwrap_or(i64::MAX).max(1)
        }
        RotationPolicy::BySize { .. } => DAY.as_secs() as i64,
    };
    now.naive_local().and_utc().timestamp().div_euclid(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }

    #[test]
    fn test_by_age_writes_dated_file() {
        let temp_dir = TempDir::new().unwrap();
        let alias = temp_dir.path().join("api_info.log");
        let file = RotatingFile::by_age(&alias, DAY * 10, DAY).unwrap();

        file.write_record(b"hello\n").unwrap();
        file.sync().unwrap();

        let today = Local::now().date_naive();
        let expected = temp_dir.path().join(dated_file_name("api_info", today));
        assert_eq!(file.current_path(), expected);
        assert_eq!(read(&expected), "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_alias_points_at_current_file() {
        let temp_dir = TempDir::new().unwrap();
        let alias = temp_dir.path().join("api_info.log");
        let file = RotatingFile::by_age(&alias, DAY, DAY).unwrap();
        file.write_record(b"via alias\n").unwrap();

        let target = fs::read_link(&alias).unwrap();
        assert_eq!(Some(target.as_os_str()), file.current_path().file_name());
        assert_eq!(read(&alias), "via alias\n");
    }

    #[test]
    fn test_by_age_rotates_on_new_day() {
        let temp_dir = TempDir::new().unwrap();
        let alias = temp_dir.path().join("svc.log");
        let file = RotatingFile::by_age(&alias, DAY * 10, DAY).unwrap();
        let first = file.current_path();

        let tomorrow = Local::now() + ChronoDuration::days(1);
        file.write_at(b"next day\n", tomorrow).unwrap();

        let second = file.current_path();
        assert_ne!(first, second);
        assert_eq!(
            second,
            temp_dir
                .path()
                .join(dated_file_name("svc", tomorrow.date_naive()))
        );
        assert_eq!(read(&second), "next day\n");
        assert!(first.exists());
    }

    #[test]
    fn test_huge_durations_do_not_overflow() {
        let temp_dir = TempDir::new().unwrap();
        let alias = temp_dir.path().join("svc.log");
        let huge = Duration::from_secs(u64::MAX);
        let file = RotatingFile::by_age(&alias, huge, huge).unwrap();

        file.write_record(b"today\n").unwrap();
        file.write_at(b"later\n", Local::now() + ChronoDuration::days(3)).unwrap();
        assert!(read(&file.current_path()).contains("later"));
    }

    #[test]
    fn test_by_size_adds_generation_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let alias = temp_dir.path().join("sys_log.log");
        let file = RotatingFile::by_size(&alias, 7, 10).unwrap();

        file.write_record(b"12345678\n").unwrap();
        file.write_record(b"abcdefgh\n").unwrap();

        let today = Local::now().date_naive();
        let base = temp_dir.path().join(dated_file_name("sys_log", today));
        let mut next = base.clone().into_os_string();
        next.push(".1");
        assert_eq!(read(&base), "12345678\n");
        assert_eq!(read(Path::new(&next)), "abcdefgh\n");
        assert_eq!(file.current_path(), PathBuf::from(next));
    }

    #[test]
    fn test_by_size_keeps_rotation_count() {
        let temp_dir = TempDir::new().unwrap();
        let alias = temp_dir.path().join("sys.log");
        let file = RotatingFile::by_size(&alias, 2, 4).unwrap();

        for line in [b"aaaa", b"bbbb", b"cccc", b"dddd"] {
            file.write_record(line).unwrap();
        }

        let remaining = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                parse_log_date(e.file_name().to_str().unwrap())
                    .map(|d| d.prefix == "sys")
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(remaining, 2);
        assert_eq!(read(&file.current_path()), "dddd");
    }

    #[test]
    fn test_purge_by_age_only_touches_own_stem() {
        let temp_dir = TempDir::new().unwrap();
        let old_own = temp_dir.path().join("svc2000-01-01.log");
        let old_other = temp_dir.path().join("other2000-01-01.log");
        fs::write(&old_own, "old").unwrap();
        fs::write(&old_other, "old").unwrap();

        let alias = temp_dir.path().join("svc.log");
        let file = RotatingFile::by_age(&alias, Duration::from_secs(1), DAY).unwrap();

        // make the old file's mtime precede the cutoff
        let later = Local::now() + ChronoDuration::days(2);
        file.write_at(b"x\n", later).unwrap();

        assert!(!old_own.exists());
        assert!(old_other.exists());
    }

    #[test]
    fn test_open_fails_when_directory_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a dir").unwrap();

        let result = RotatingFile::by_age(blocker.join("x.log"), DAY, DAY);
        assert!(result.is_err());
    }
}
