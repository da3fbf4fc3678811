//! Following a file for newly appended lines

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long the follower waits at end of file before polling again
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared counters of a follower
#[derive(Debug, Clone, Default)]
pub struct FollowStats {
    active: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
}

impl FollowStats {
    /// Follow loops currently running
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Lines discarded because the consumer was not keeping up
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Decrements the active count when a follow loop exits, however it exits
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Follow `path` from its current end until `token` is cancelled
///
/// `ready` fires once the file is open and positioned at its end; lines
/// appended after that are delivered. When the channel is full a line is
/// dropped rather than blocking the follower.
pub async fn follow_file(
    path: PathBuf,
    sender: mpsc::Sender<String>,
    token: CancellationToken,
    stats: FollowStats,
    ready: oneshot::Sender<()>,
) {
    let (mut reader, mut pos) = match open_at_end(&path).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!(path = %path.display(), "Failed to follow log file: {}", e);
            return;
        }
    };
    let mut identity = file_identity(&path).await;
    let _active = ActiveGuard::enter(&stats.active);
    let _ = ready.send(());
    debug!(path = %path.display(), "Following log file");

    let mut pending: Vec<u8> = Vec::new();
    while !token.is_cancelled() {
        let read = match reader.read_until(b'\n', &mut pending).await {
            Ok(read) => read,
            Err(e) => {
                warn!(path = %path.display(), "Failed to read followed log: {}", e);
                0
            }
        };
        pos += read as u64;

        if read > 0 {
            if pending.last() == Some(&b'\n') {
                let line = take_line(&mut pending);
                if !deliver(&sender, line, &stats) {
                    return;
                }
            }
            continue;
        }

        // end of file: re-open if the file was truncated or replaced
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            let current = file_identity(&path).await;
            if meta.len() < pos || current != identity {
                match File::open(&path).await {
                    Ok(file) => {
                        debug!(path = %path.display(), "Followed log truncated or replaced, reopening");
                        reader = BufReader::new(file);
                        pos = 0;
                        pending.clear();
                        identity = current;
                        continue;
                    }
                    Err(e) => debug!(path = %path.display(), "Reopen failed: {}", e),
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
    debug!(path = %path.display(), "Stopped following log file");
}

async fn open_at_end(path: &Path) -> std::io::Result<(BufReader<File>, u64)> {
    let mut file = File::open(path).await?;
    let pos = file.seek(SeekFrom::End(0)).await?;
    Ok((BufReader::new(file), pos))
}

/// Strip the trailing `\n` or `\r\n` and decode lossily
fn take_line(pending: &mut Vec<u8>) -> String {
    let mut bytes = std::mem::take(pending);
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
    match String::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Returns false once the receiver is gone
fn deliver(sender: &mpsc::Sender<String>, line: String, stats: &FollowStats) -> bool {
    match sender.try_send(line) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            let dropped = stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, "Error line channel full, dropping line");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Error line receiver dropped, stopping follower");
            false
        }
    }
}

#[cfg(unix)]
async fn file_identity(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    tokio::fs::metadata(path).await.ok().map(|m| (m.dev(), m.ino()))
}

#[cfg(not(unix))]
async fn file_identity(_path: &Path) -> Option<(u64, u64)> {
    None
}
