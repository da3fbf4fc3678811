//! Single follow session over the current error file

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use notify::{Event, EventKind};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::follow::{follow_file, FollowStats};
use crate::filename::parse_log_date;

struct FollowSession {
    path: PathBuf,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl FollowSession {
    fn is_alive(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    async fn cancel(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            debug!(path = %self.path.display(), "Follow task ended abnormally: {}", e);
        }
    }
}

/// Keeps exactly one follow session on today's `<prefix>YYYY-MM-DD.log`
pub struct TailController {
    dir: PathBuf,
    prefix: String,
    sender: mpsc::Sender<String>,
    session: Mutex<Option<FollowSession>>,
    stats: FollowStats,
}

impl TailController {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, sender: mpsc::Sender<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            sender,
            session: Mutex::new(None),
            stats: FollowStats::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Follow loops currently running
    pub fn active_follows(&self) -> usize {
        self.stats.active()
    }

    /// Lines dropped because the receiver was full
    pub fn dropped_lines(&self) -> u64 {
        self.stats.dropped()
    }

    /// File followed by the live session, if any
    pub async fn current_path(&self) -> Option<PathBuf> {
        let session = self.session.lock().await;
        session.as_ref().filter(|s| s.is_alive()).map(|s| s.path.clone())
    }

    /// Re-target the follow session at today's file
    pub async fn rescan(&self) {
        self.rescan_at(Local::now().date_naive()).await;
    }

    /// Re-target the follow session at the file dated `today`
    ///
    /// The previous session is cancelled and awaited before a new one starts,
    /// so at most one follow loop ever runs. A session already following the
    /// target file is kept.
    pub(crate) async fn rescan_at(&self, today: NaiveDate) {
        let mut session = self.session.lock().await;
        let target = self.find_dated(today);

        if let (Some(current), Some(target)) = (session.as_ref(), target.as_ref()) {
            if current.is_alive() && &current.path == target {
                return;
            }
        }

        if let Some(old) = session.take() {
            old.cancel().await;
        }

        let Some(path) = target else {
            debug!(dir = %self.dir.display(), prefix = %self.prefix, "No error file for today yet");
            return;
        };

        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(follow_file(
            path.clone(),
            self.sender.clone(),
            token.clone(),
            self.stats.clone(),
            ready_tx,
        ));
        // an Err means the file could not be opened and the task already ended
        let _ = ready_rx.await;
        info!(path = %path.display(), "Following error log");
        *session = Some(FollowSession { path, token, handle });
    }

    /// Cancel the live session and wait for it to finish
    pub async fn stop(&self) {
        if let Some(old) = self.session.lock().await.take() {
            old.cancel().await;
        }
    }

    /// Whether `event` is the creation of a new dated file for this prefix
    pub fn is_rotation_event(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Create(_)) {
            return false;
        }
        let marker = format!("{}20", self.prefix);
        event.paths.iter().any(|path| {
            path.extension().map_or(false, |ext| ext == "log")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.contains(&marker))
        })
    }

    /// `<prefix>20*.log` file in the directory dated `today`
    fn find_dated(&self, today: NaiveDate) -> Option<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), "Failed to list log directory: {}", e);
                return None;
            }
        };

        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|path| {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    return false;
                };
                if !name.ends_with(".log") {
                    return false;
                }
                match parse_log_date(name) {
                    Ok(d) => d.prefix == self.prefix && d.date == today,
                    Err(_) => false,
                }
            })
            .collect();
        found.sort();
        found.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filename::dated_file_name;
    use crate::watch::POLL_INTERVAL;
    use notify::event::{CreateKind, ModifyKind};
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn next(rx: &mut mpsc::Receiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_rescan_without_file_stays_idle() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(10);
        let controller = TailController::new(temp_dir.path(), "svc_error", tx);

        controller.rescan().await;
        assert_eq!(controller.active_follows(), 0);
        assert!(controller.current_path().await.is_none());
    }

    #[tokio::test]
    async fn test_rescan_ignores_other_prefixes_and_suffixes() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(dated_file_name("other_error", today())), "").unwrap();
        let rotated = format!("{}.1", dated_file_name("svc_error", today()));
        std::fs::write(temp_dir.path().join(rotated), "").unwrap();

        let (tx, _rx) = mpsc::channel(10);
        let controller = TailController::new(temp_dir.path(), "svc_error", tx);
        controller.rescan().await;
        assert_eq!(controller.active_follows(), 0);
    }

    #[tokio::test]
    async fn test_rotation_keeps_one_session() {
        let temp_dir = TempDir::new().unwrap();
        let yesterday = today().pred_opt().unwrap();
        let old = temp_dir.path().join(dated_file_name("svc_error", yesterday));
        let new = temp_dir.path().join(dated_file_name("svc_error", today()));
        std::fs::write(&old, "").unwrap();
        std::fs::write(&new, "").unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let controller = TailController::new(temp_dir.path(), "svc_error", tx);

        controller.rescan_at(yesterday).await;
        assert_eq!(controller.current_path().await, Some(old.clone()));
        assert_eq!(controller.active_follows(), 1);

        controller.rescan_at(today()).await;
        assert_eq!(controller.current_path().await, Some(new.clone()));
        assert_eq!(controller.active_follows(), 1);

        append(&old, "stale\n");
        append(&new, "fresh\n");
        assert_eq!(next(&mut rx).await, "fresh");

        controller.stop().await;
        assert_eq!(controller.active_follows(), 0);
    }

    #[tokio::test]
    async fn test_rescan_same_target_keeps_session() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(dated_file_name("svc_error", today()));
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let controller = TailController::new(temp_dir.path(), "svc_error", tx);
        controller.rescan().await;
        append(&path, "pending\n");
        controller.rescan().await;

        assert_eq!(next(&mut rx).await, "pending");
        assert_eq!(controller.active_follows(), 1);
        controller.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rescans_leave_one_session() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(dated_file_name("svc_error", today()));
        std::fs::write(&path, "").unwrap();

        let (tx, mut rx) = mpsc::channel(10);
        let controller = Arc::new(TailController::new(temp_dir.path(), "svc_error", tx));

        tokio::join!(controller.rescan(), controller.rescan(), controller.rescan());
        assert_eq!(controller.active_follows(), 1);

        let yesterday = today().pred_opt().unwrap();
        std::fs::write(temp_dir.path().join(dated_file_name("svc_error", yesterday)), "").unwrap();
        tokio::join!(
            controller.rescan_at(yesterday),
            controller.rescan_at(today()),
            controller.rescan_at(yesterday),
        );
        assert_eq!(controller.active_follows(), 1);
        controller.rescan().await;
        assert_eq!(controller.current_path().await, Some(path.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move { controller.rescan().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(controller.active_follows(), 1);

        append(&path, "once\n");
        assert_eq!(next(&mut rx).await, "once");
        tokio::time::sleep(POLL_INTERVAL * 3).await;
        assert!(rx.try_recv().is_err());

        controller.stop().await;
        assert_eq!(controller.active_follows(), 0);
    }

    #[test]
    fn test_is_rotation_event() {
        let (tx, _rx) = mpsc::channel(1);
        let controller = TailController::new("/logs", "svc_error", tx);
        let created = |name: &str| {
            Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/logs").join(name))
        };

        assert!(controller.is_rotation_event(&created("svc_error2024-06-30.log")));
        assert!(!controller.is_rotation_event(&created("svc_error.log")));
        assert!(!controller.is_rotation_event(&created("svc_error2024-06-30.txt")));
        assert!(!controller.is_rotation_event(&created("api_info2024-06-30.log")));

        let modified = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/logs/svc_error2024-06-30.log"));
        assert!(!controller.is_rotation_event(&modified));
    }
}
