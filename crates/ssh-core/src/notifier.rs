//! User-visible status messages.
//!
//! Everything the tool tells the user goes through a [`Notifier`] so the
//! tunnel manager and the shell can be exercised without a terminal.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

/// Sink for status messages.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
    fn debug(&self, message: &str);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Routes messages to the tracing subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn shared() -> SharedNotifier {
        Arc::new(Self)
    }
}

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        info!("{message}");
    }

    fn error(&self, message: &str) {
        error!("{message}");
    }

    fn debug(&self, message: &str) {
        debug!("{message}");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
    Debug,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Records every message in order; used by tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl MemoryNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Messages logged at `level`, oldest first.
    pub fn messages(&self, level: NoticeLevel) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|notice| notice.level == level)
            .map(|notice| notice.message)
            .collect()
    }

    fn push(&self, level: NoticeLevel, message: &str) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(Notice {
                level,
                message: message.to_string(),
            });
        }
    }
}

impl Notifier for MemoryNotifier {
    fn info(&self, message: &str) {
        self.push(NoticeLevel::Info, message);
    }

    fn error(&self, message: &str) {
        self.push(NoticeLevel::Error, message);
    }

    fn debug(&self, message: &str) {
        self.push(NoticeLevel::Debug, message);
    }
}
