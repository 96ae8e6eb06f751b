use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{Channel, client::Msg};
use ssh_core::{
    SshCoreError,
    SshResult,
    forwarding::{ForwardedConnection, RemoteListener, RemoteRegistrar},
    session::{self, SharedSessionHandle},
};
use tokio::{sync::mpsc, time};
use tracing::{debug, warn};

use crate::hostkeys::ClientHandler;

const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const SESSION_WAIT: Duration = Duration::from_secs(5);

type ForwardedReceiver = mpsc::UnboundedReceiver<ForwardedConnection<Channel<Msg>>>;

/// An authenticated SSH connection carrying the tunnel.
///
/// The remote listener can be requested once, and only before the handle is
/// shared with a running tunnel.
pub struct SshTransport {
    handle: SharedSessionHandle<ClientHandler>,
    forwarded: Option<ForwardedReceiver>,
    authority: String,
}

impl SshTransport {
    pub(crate) fn new(handle: SharedSessionHandle<ClientHandler>, forwarded: ForwardedReceiver, authority: String) -> Self {
        Self {
            handle,
            forwarded: Some(forwarded),
            authority,
        }
    }

    /// Handle used to open channels and cancel the remote listener.
    pub fn session(&self) -> SharedSessionHandle<ClientHandler> {
        Arc::clone(&self.handle)
    }

    /// `user@host:port` of the connected server.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Resolves once the server or the network has dropped the session.
    pub async fn closed(&self) {
        let mut ticks = time::interval(CLOSE_POLL_INTERVAL);
        while !self.handle.is_closed() {
            ticks.tick().await;
        }
    }

    /// Send a disconnect and wait briefly for the session task to finish.
    pub async fn disconnect(self) {
        session::disconnect(self.handle.as_ref()).await;
        match Arc::try_unwrap(self.handle) {
            Ok(handle) => match time::timeout(SESSION_WAIT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(?err, "SSH session shutdown error"),
                Err(_) => warn!("SSH session did not finish after disconnect"),
            },
            Err(_) => debug!("SSH session handle still in use; skipping shutdown wait"),
        }
    }
}

#[async_trait]
impl RemoteRegistrar for SshTransport {
    type Channel = Channel<Msg>;

    async fn request_tcpip_forward(&mut self, bind_address: String, bind_port: u16) -> SshResult<RemoteListener<Channel<Msg>>> {
        if self.forwarded.is_none() {
            return Err(SshCoreError::TunnelAlreadyStarted);
        }
        let handle = Arc::get_mut(&mut self.handle)
            .ok_or_else(|| SshCoreError::Other("remote listener must be requested before the session is shared".to_string()))?;
        let bound_port = handle.tcpip_forward(bind_address.clone(), bind_port.into()).await?;
        let incoming = self.forwarded.take().ok_or(SshCoreError::TunnelAlreadyStarted)?;
        Ok(RemoteListener {
            bind_address,
            bound_port,
            incoming,
        })
    }
}
