use std::io::ErrorKind;

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, copy_bidirectional},
    sync::watch,
};

type Result<T> = crate::SshResult<T>;

/// Bytes moved by one relay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Accepted side to paired side.
    pub sent: u64,
    /// Paired side to accepted side.
    pub received: u64,
    /// Stopped by the shutdown signal rather than by either peer.
    pub interrupted: bool,
}

/// Copy both directions between `accepted` and `paired` until both reach
/// EOF, either side fails, or `shutdown` turns true.
///
/// EOF on one side half-closes the other so the opposite direction can
/// still drain. Both endpoints are shut down before returning.
pub async fn relay_streams<A, B>(mut accepted: A, mut paired: B, mut shutdown: watch::Receiver<bool>) -> Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = tokio::select! {
        result = copy_bidirectional(&mut accepted, &mut paired) => Some(result),
        _ = stop_requested(&mut shutdown) => None,
    };
    let _ = paired.shutdown().await;
    let _ = accepted.shutdown().await;
    match outcome {
        None => Ok(RelayStats {
            interrupted: true,
            ..RelayStats::default()
        }),
        Some(Ok((sent, received))) => Ok(RelayStats {
            sent,
            received,
            interrupted: false,
        }),
        // Treat common half-close races as graceful termination.
        Some(Err(err)) if is_half_close_race(err.kind()) => Ok(RelayStats::default()),
        Some(Err(err)) => Err(err.into()),
    }
}

/// Resolves once `signal` turns true or its sender is gone.
///
/// The borrowed value is released before returning, so callers can await
/// inside the other arms of a `select!` and stay `Send`.
pub(super) async fn stop_requested(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

fn is_half_close_race(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::ConnectionReset)
}
