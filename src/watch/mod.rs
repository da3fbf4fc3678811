//! Live stream of appended error-log lines
//!
//! A directory watcher re-targets a single follow session at today's error
//! file whenever rotation creates a new one.

mod controller;
mod follow;

pub use controller::TailController;
pub use follow::{FollowStats, POLL_INTERVAL};

use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{panic_message, Result};

/// Capacity of the error line channel
pub const CHANNEL_CAPACITY: usize = 10;

/// Receiving end of a running error watch
///
/// Dropping it stops the watch and the follow session.
pub struct ErrorStream {
    receiver: mpsc::Receiver<String>,
    controller: Arc<TailController>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ErrorStream {
    /// Next appended line; `None` once the watch has stopped
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }

    pub fn active_follows(&self) -> usize {
        self.controller.active_follows()
    }

    pub fn dropped_lines(&self) -> u64 {
        self.controller.dropped_lines()
    }

    pub fn controller(&self) -> &Arc<TailController> {
        &self.controller
    }

    /// Stop watching and wait until the follow session has ended
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Watch task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ErrorStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Handle of a callback-driven watch; dropping it stops the watch
#[must_use = "the watch stops when the handle is dropped"]
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {
        // Drop aborts the task
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch `dir` and stream lines appended to today's `<prefix>YYYY-MM-DD.log`
///
/// Must be called inside a tokio runtime.
pub async fn watch_err(dir: &Path, prefix: &str) -> Result<ErrorStream> {
    start_watch(dir, prefix, async {}).await
}

/// `before_scan` runs after the directory watch is registered and before the
/// initial scan
async fn start_watch<B>(dir: &Path, prefix: &str, before_scan: B) -> Result<ErrorStream>
where
    B: Future<Output = ()>,
{
    tokio::fs::create_dir_all(dir).await?;

    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
    let controller = Arc::new(TailController::new(dir, prefix, sender));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event_tx.send(event).is_err() {
                    debug!("Directory event receiver dropped");
                }
            }
            Err(e) => warn!("Log directory watch error: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    // scan only once events are being collected, so a file created in
    // between is seen by one or the other
    before_scan.await;
    controller.rescan().await;

    let token = CancellationToken::new();
    let task = {
        let controller = Arc::clone(&controller);
        let token = token.clone();
        tokio::spawn(async move {
            // the watcher lives as long as this task
            let _watcher = watcher;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = event_rx.recv() => match event {
                        Some(event) if controller.is_rotation_event(&event) => {
                            debug!(paths = ?event.paths, "Error log rotated");
                            controller.rescan().await;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            controller.stop().await;
            debug!(dir = %controller.dir().display(), "Error log watch stopped");
        })
    };

    Ok(ErrorStream {
        receiver,
        controller,
        token,
        task: Some(task),
    })
}

/// Watch like [`watch_err`] and call `f` for every line
///
/// A panic inside `f` is logged with a backtrace and the loop continues.
pub async fn watch_err_callback<F>(dir: &Path, prefix: &str, f: F) -> Result<WatchHandle>
where
    F: Fn(String) + Send + 'static,
{
    let mut stream = watch_err(dir, prefix).await?;
    let task = tokio::spawn(async move {
        while let Some(line) = stream.recv().await {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(line))) {
                error!(
                    backtrace = %Backtrace::force_capture(),
                    "Error line callback panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        stream.stop().await;
    });
    Ok(WatchHandle { task })
}
