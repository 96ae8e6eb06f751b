pub mod error;
pub mod forwarding;
pub mod logging;
pub mod notifier;
pub mod session;

pub use error::{SshCoreError, SshResult};
pub use notifier::{MemoryNotifier, Notice, NoticeLevel, Notifier, SharedNotifier, TracingNotifier};
