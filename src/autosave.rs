//! Periodic autosave trigger.
//!
//! The scheduler never writes anything itself. On each tick, if the shared
//! [`DirtyFlag`] is set, it posts [`SaveRequest::Autosave`] to the channel the
//! owning [`Session`](crate::session::Session) drains, so autosaves go through
//! the same code path, on the same task, as manual saves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Set by edits, cleared only after a successful write.
#[derive(Debug, Clone, Default)]
pub struct DirtyFlag(Arc<AtomicBool>);

impl DirtyFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Work posted to the session's serialization point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveRequest {
    Autosave,
}

#[derive(Debug)]
pub struct AutosaveScheduler {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AutosaveScheduler {
    /// Start ticking every `interval`. The first tick fires one interval from now.
    pub fn start(interval: Duration, dirty: DirtyFlag, requests: mpsc::Sender<SaveRequest>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !dirty.is_dirty() {
                    continue;
                }
                tracing::debug!("Requesting autosave");

                let sent = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    sent = requests.send(SaveRequest::Autosave) => sent,
                };
                if sent.is_err() {
                    tracing::debug!("Session gone, stopping autosave");
                    break;
                }
            }
        });

        Self {
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop the timer and wait for it to exit. No request is posted after this
    /// returns. Calling it again does nothing.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().expect("autosave lock poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Autosave timer ended abnormally");
            }
        }
    }

    /// False once stopped, or once the timer exited because the session went away.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .task
                .lock()
                .expect("autosave lock poisoned")
                .as_ref()
                .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for AutosaveScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
