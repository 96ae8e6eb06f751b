use super::{
    manager::TunnelState,
    relay::stop_requested,
    traits::{ForwardedConnection, RemoteForwardChannel, RemoteListener, RemoteRegistrar},
};
use crate::SshCoreError;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use tunnel_types::TunnelSpec;

type Result<T> = crate::SshResult<T>;

/// Ask the server for the reverse tunnel's listener.
///
/// Returns the listener and the port the server actually bound.
pub(super) async fn register_reverse_listener<R>(
    registrar: &mut R,
    spec: &TunnelSpec,
) -> Result<(RemoteListener<R::Channel>, u32)>
where
    R: RemoteRegistrar + Send,
{
    let requested = spec.listen_port();
    let listener = registrar
        .request_tcpip_forward(spec.bind_address.clone(), requested)
        .await?;
    let actual_port = if listener.bound_port != 0 { listener.bound_port } else { requested as u32 };
    info!(
        bind = %format!("{}:{}", spec.bind_address, actual_port),
        target = %spec.target(),
        "reverse tunnel registered"
    );
    Ok((listener, actual_port))
}

/// Take forwarded channels until shutdown or until the transport closes.
pub(super) async fn run_reverse_listener<C>(
    mut listener: RemoteListener<C>,
    actual_port: u32,
    spec: TunnelSpec,
    state: Arc<TunnelState>,
) where
    C: RemoteForwardChannel,
{
    let mut shutdown = state.shutdown_signal();
    loop {
        tokio::select! {
            _ = stop_requested(&mut shutdown) => break,
            incoming = listener.incoming.recv() => match incoming {
                Some(connection) => {
                    if !matches_binding(&connection, actual_port) {
                        warn!(
                            address = %connection.connected_address,
                            port = connection.connected_port,
                            "received forwarded-tcpip for a listener we did not request"
                        );
                        let _ = connection.channel.close().await;
                        continue;
                    }
                    let spec = spec.clone();
                    let state = Arc::clone(&state);
                    tokio::spawn(handle_reverse_connection(connection, spec, state));
                }
                None => {
                    state.fail("remote listener closed by the transport".to_string());
                    break;
                }
            }
        }
    }
    debug!(port = actual_port, "reverse tunnel listener closed");
}

fn matches_binding<C>(connection: &ForwardedConnection<C>, actual_port: u32) -> bool {
    connection.connected_port == actual_port
}

async fn handle_reverse_connection<C>(connection: ForwardedConnection<C>, spec: TunnelSpec, state: Arc<TunnelState>)
where
    C: RemoteForwardChannel,
{
    let target = spec.target();
    let origin = format!("{}:{}", connection.originator_address, connection.originator_port);
    match TcpStream::connect((spec.dest_host.as_str(), spec.target_port())).await {
        Ok(local) => {
            local.set_nodelay(true).ok();
            info!(
                remote = %format!("{}:{}", connection.connected_address, connection.connected_port),
                %target,
                %origin,
                "proxying remote forwarded connection"
            );
            let remote = connection.channel.into_stream();
            state.spawn_relay(remote, local, format!("{origin} -> {target}")).await;
        }
        Err(source) => {
            let err = SshCoreError::ConnectionFailed { address: target, source };
            warn!(?err, %origin, "reverse tunnel connection failed");
            state.notifier.error(&err.to_string());
            let _ = connection.channel.close().await;
        }
    }
}
