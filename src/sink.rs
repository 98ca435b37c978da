// src/sink.rs

//! Notification sinks.
//!
//! A sink is told "artifact X changed" (or "task Y failed") and forwards it
//! somewhere: a log, a live-reload server, a test recorder. Sinks are
//! fire-and-forget: `notify` must not block, and a sink failure never fails
//! the task that produced the notification.

use std::fmt::Debug;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::TaskName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// An artifact was written (path relative to the project root).
    Changed(PathBuf),
    /// A task failed with `failure_action = "notify"`.
    Failed { task: TaskName, message: String },
}

pub trait NotifySink: Send + Sync + Debug {
    fn notify(&self, notification: Notification);
}

/// Default sink: writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl NotifySink for LogSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Changed(path) => info!(path = %path.display(), "changed"),
            Notification::Failed { task, message } => {
                warn!(task = %task, "task failed (continuing): {message}")
            }
        }
    }
}

/// Forwards notifications over a bounded channel without waiting.
///
/// When the receiver is slow or gone, notifications are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl NotifySink for ChannelSink {
    fn notify(&self, notification: Notification) {
        if let Err(err) = self.tx.try_send(notification) {
            debug!("dropping notification: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_never_blocks_when_full_or_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);

        sink.notify(Notification::Changed(PathBuf::from("dist/a.css")));
        sink.notify(Notification::Changed(PathBuf::from("dist/b.css")));
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Changed(PathBuf::from("dist/a.css"))
        );
        assert!(rx.try_recv().is_err());

        drop(rx);
        sink.notify(Notification::Changed(PathBuf::from("dist/c.css")));
    }
}
