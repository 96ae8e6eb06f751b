//! Connect, run one tunnel until interrupted, then tear everything down.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use client_core::{ClientConfig, ClientError, ClientResult, SshTransport, keys};
use ssh_core::{
    SharedNotifier,
    SshCoreError,
    forwarding::{ForwardSession, RemoteRegistrar, TunnelManager},
    session::SharedSessionHandle,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tunnel_types::{Direction, TunnelRequest};

use crate::CliError;

type Result<T> = std::result::Result<T, CliError>;

/// Authenticated connection the tunnel runs over.
#[async_trait]
pub trait TunnelTransport: RemoteRegistrar + Send + Sync {
    type Session: ForwardSession;

    /// `user@host:port` of the connected server.
    fn authority(&self) -> &str;
    fn session(&self) -> Self::Session;
    fn is_closed(&self) -> bool;
    /// Resolves once the connection has gone away.
    async fn closed(&self);
    async fn disconnect(self);
}

/// Something that can open a [`TunnelTransport`].
#[async_trait]
pub trait Connector: Send {
    type Transport: TunnelTransport;

    async fn connect(self) -> ClientResult<Self::Transport>;
}

#[async_trait]
impl TunnelTransport for SshTransport {
    type Session = SharedSessionHandle<client_core::ClientHandler>;

    fn authority(&self) -> &str {
        SshTransport::authority(self)
    }

    fn session(&self) -> Self::Session {
        SshTransport::session(self)
    }

    fn is_closed(&self) -> bool {
        SshTransport::is_closed(self)
    }

    async fn closed(&self) {
        SshTransport::closed(self).await
    }

    async fn disconnect(self) {
        SshTransport::disconnect(self).await
    }
}

#[async_trait]
impl Connector for ClientConfig {
    type Transport = SshTransport;

    async fn connect(self) -> ClientResult<SshTransport> {
        client_core::connect(self).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwarderState {
    Idle,
    KeyDisplay,
    Connected,
    TunnelActive,
    Closed,
}

pub struct Forwarder {
    notifier: SharedNotifier,
    state: ForwarderState,
}

impl Forwarder {
    pub fn new(notifier: SharedNotifier) -> Self {
        Self {
            notifier,
            state: ForwarderState::Idle,
        }
    }

    pub fn state(&self) -> ForwarderState {
        self.state
    }

    /// Report the public key files that would be used and the first key found.
    ///
    /// A missing key is reported through the notifier and is not an error.
    pub async fn show_public_key(&mut self, home: &Path, identities: &[PathBuf]) -> Result<Option<String>> {
        self.state = ForwarderState::KeyDisplay;
        let files = keys::public_key_files(home, identities);
        for file in &files {
            self.notifier.info(&format!("Public Key File: {}", file.display()));
        }
        match keys::read_public_key(&files).await {
            Ok(key) => {
                self.notifier.info(&format!("Public Key:      {key}"));
                Ok(Some(key))
            }
            Err(ClientError::NoPublicKey) => {
                self.notifier.error(&ClientError::NoPublicKey.to_string());
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Run `request` over a fresh connection until `cancel` turns true or
    /// the tunnel fails.
    ///
    /// Once connected, the tunnel is shut down and the connection closed
    /// before this returns, whatever the outcome.
    pub async fn run<C>(&mut self, connector: C, request: &TunnelRequest, mut cancel: watch::Receiver<bool>) -> Result<()>
    where
        C: Connector,
    {
        self.state = ForwarderState::Idle;
        let mut transport = tokio::select! {
            connected = connector.connect() => connected?,
            _ = async { cancel.wait_for(|stop| *stop).await.is_ok() } => {
                debug!("interrupted while connecting");
                self.state = ForwarderState::Closed;
                return Ok(());
            }
        };
        self.state = ForwarderState::Connected;
        self.notifier.info(&format!("Connected to {}", transport.authority()));

        let manager = TunnelManager::new(self.notifier.clone());
        let outcome = self.hold_tunnel(&manager, &mut transport, request, cancel).await;

        // nothing left to cancel on a dead connection
        let session = (!transport.is_closed()).then(|| transport.session());
        if let Err(err) = manager.shutdown(session).await {
            warn!(?err, "tunnel shutdown reported an error");
        }
        transport.disconnect().await;
        self.state = ForwarderState::Closed;
        self.notifier.info("Disconnected SSH connection.");
        outcome
    }

    async fn hold_tunnel<T>(
        &mut self,
        manager: &TunnelManager,
        transport: &mut T,
        request: &TunnelRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<()>
    where
        T: TunnelTransport,
    {
        let spec = request.spec();
        match spec.direction {
            Direction::Forward => {
                let bound = manager
                    .start_forward(transport.session(), spec.local_port, spec.dest_host.clone(), spec.remote_port)
                    .await?;
                info!(bind = %bound, "forward tunnel started");
            }
            Direction::Reverse => {
                let port = manager
                    .start_reverse(transport, spec.local_port, spec.dest_host.clone(), spec.remote_port)
                    .await?;
                info!(port, "reverse tunnel started");
            }
        }
        self.state = ForwarderState::TunnelActive;
        if let Some(descriptor) = manager.descriptor() {
            self.notifier.debug(&descriptor);
        }
        self.notifier.info("Press Ctrl C to close ssh tunnel.");

        tokio::select! {
            _ = async { cancel.wait_for(|stop| *stop).await.is_ok() } => {
                debug!("interrupt received; closing tunnel");
                Ok(())
            }
            err = manager.failure() => Err(err.into()),
            _ = transport.closed() => Err(SshCoreError::tunnel_failure("SSH connection closed").into()),
        }
    }
}

/// Cancellation signal that turns true on the first Ctrl-C.
pub fn interrupt_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tx.send_replace(true);
            }
            Err(err) => {
                warn!(?err, "unable to listen for Ctrl-C");
                // keep the sender alive so the tunnel is not cancelled
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

#[cfg(test)]
#[path = "forwarder_tests.rs"]
mod tests;
