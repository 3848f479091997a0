//! Transient UI state that is not part of any conversation: the "thinking" text,
//! its visibility, and user-facing notifications.
//!
//! Each value is independently observable. Notifications are fire-and-forget; consumers
//! that are not listening simply miss them.

use tokio::sync::{broadcast, watch};

pub const RECONNECTING_MESSAGE: &str = "connection closed, reconnecting...";

const NOTIFICATION_CAPACITY: usize = 64;

/// A side effect on transient UI state, produced from a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Open the thinking view and reset its text.
    ThoughtStarted,
    ThoughtText(String),
    /// Show an error notification; carries the frame's content.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// Owner of the transient signals. Cheap to share behind an `Arc`.
pub struct Signals {
    thought: watch::Sender<String>,
    thought_open: watch::Sender<bool>,
    notifications: broadcast::Sender<Notification>,
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

impl Signals {
    pub fn new() -> Self {
        let (thought, _) = watch::channel(String::new());
        let (thought_open, _) = watch::channel(false);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            thought,
            thought_open,
            notifications,
        }
    }

    pub fn apply(&self, signal: Signal) {
        match signal {
            Signal::ThoughtStarted => {
                self.thought.send_replace(String::new());
                self.thought_open.send_replace(true);
            }
            Signal::ThoughtText(text) => {
                self.thought.send_modify(|t| t.push_str(&text));
            }
            Signal::Error(content) => {
                self.notify(Notification::error(format!(
                    "Something went wrong, please try again later: {}",
                    content
                )));
            }
        }
    }

    /// Hide the thinking view; the text stays until the next thought starts.
    pub fn close_thought(&self) {
        self.thought_open.send_replace(false);
    }

    pub fn notify(&self, notification: Notification) {
        log::debug!("notification ({:?}): {}", notification.severity, notification.message);
        // no subscribers is fine
        let _ = self.notifications.send(notification);
    }

    pub fn thought(&self) -> watch::Receiver<String> {
        self.thought.subscribe()
    }

    pub fn thought_open(&self) -> watch::Receiver<bool> {
        self.thought_open.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }
}
