pub mod cli;
pub mod error;
pub mod forwarder;

use std::{future::Future, time::Duration};

pub use error::CliError;
use ssh_core::logging;
use tracing_subscriber::{fmt, prelude::*};

/// How long the runtime waits for blocking tasks once the main future is done.
pub const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

/// Install the fmt subscriber.
///
/// `RUST_LOG` is honoured unless `debug` is set, which forces debug output.
pub fn init_tracing(debug: bool) {
    let _ = tracing_subscriber::registry()
        .with(logging::env_filter(debug))
        .with(fmt::layer().with_target(debug))
        .try_init();
}

/// Drive `future` on a fresh multi-threaded runtime.
///
/// Terminal prompts run on blocking threads that cannot be cancelled, so the
/// runtime is shut down with [`RUNTIME_SHUTDOWN_GRACE`] instead of waiting
/// for them.
pub fn block_on_detached<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    Ok(output)
}
