// src/exec/session.rs

use std::fmt;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle to one running external process and the task supervising it.
///
/// Dropping the handle without calling [`stop`](Self::stop) also terminates
/// the process, because the supervisor sees its cancel channel close.
pub struct SessionProcess {
    label: String,
    cancel: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for SessionProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionProcess")
            .field("label", &self.label)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl SessionProcess {
    /// `handle` must stop its process once `cancel` fires or is dropped.
    pub fn new(label: impl Into<String>, cancel: oneshot::Sender<()>, handle: JoinHandle<()>) -> Self {
        Self {
            label: label.into(),
            cancel: Some(cancel),
            handle: Some(handle),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Request termination and wait for the supervisor to finish.
    pub async fn stop(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.join().await;
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(mut self) {
        self.join().await;
    }

    async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!(session = %self.label, error = %e, "session supervisor ended abnormally");
            }
        }
    }
}
