use super::{manager::TunnelState, relay::stop_requested, traits::ForwardSession};
use crate::SshCoreError;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use tunnel_types::TunnelSpec;

type Result<T> = crate::SshResult<T>;

/// Bind the local side of a forward tunnel.
pub(super) async fn bind_forward_listener(spec: &TunnelSpec) -> Result<TcpListener> {
    let address = format!("{}:{}", spec.bind_address, spec.listen_port());
    TcpListener::bind((spec.bind_address.as_str(), spec.listen_port()))
        .await
        .map_err(|source| SshCoreError::BindFailed { address, source })
}

/// Accept until shutdown; each connection gets its own channel and relay.
pub(super) async fn run_forward_listener<S>(listener: TcpListener, spec: TunnelSpec, session: S, state: Arc<TunnelState>)
where
    S: ForwardSession,
{
    let mut shutdown = state.shutdown_signal();
    loop {
        tokio::select! {
            _ = stop_requested(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, origin)) => {
                    let spec = spec.clone();
                    let session = session.clone();
                    let state = Arc::clone(&state);
                    tokio::spawn(handle_forward_connection(stream, origin, spec, session, state));
                }
                Err(err) => {
                    warn!(?err, "forward tunnel listener accept error");
                    state.fail(format!("local listener failed: {err}"));
                    break;
                }
            }
        }
    }
    debug!(port = spec.listen_port(), "forward tunnel listener closed");
}

async fn handle_forward_connection<S>(stream: TcpStream, origin: SocketAddr, spec: TunnelSpec, session: S, state: Arc<TunnelState>)
where
    S: ForwardSession,
{
    stream.set_nodelay(true).ok();
    let target = spec.target();
    match session
        .open_direct_tcpip(spec.dest_host.clone(), spec.target_port(), origin.ip().to_string(), origin.port())
        .await
    {
        Ok(remote) => {
            debug!(%origin, %target, "forward channel opened");
            state.spawn_relay(stream, remote, format!("{origin} -> {target}")).await;
        }
        Err(err) => {
            let err = SshCoreError::channel(target, err);
            warn!(?err, %origin, "forward tunnel connection failed");
            state.notifier.error(&err.to_string());
        }
    }
}
