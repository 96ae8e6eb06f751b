use std::{
    io::{self, Write},
    sync::Arc,
};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use russh::{
    Channel,
    client::{Msg, Session},
    keys::{HashAlg, PublicKey},
};
use ssh_core::forwarding::ForwardedConnection;
use tokio::{sync::mpsc, task};
use tracing::{debug, info, warn};

/// How an unknown server key is treated. Keys are never written to disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Show the fingerprint and ask.
    #[default]
    Prompt,
    /// Trust the key for this connection only.
    AcceptOnce,
}

pub struct HostKeyVerifier {
    authority: String,
    policy: HostKeyPolicy,
}

impl HostKeyVerifier {
    pub fn new(authority: String, policy: HostKeyPolicy) -> Self {
        Self { authority, policy }
    }

    pub async fn check(&self, server_key: &PublicKey) -> Result<bool> {
        let fingerprint = server_key.fingerprint(HashAlg::Sha256).to_string();
        match self.policy {
            HostKeyPolicy::Prompt => {
                let algo = server_key.algorithm().to_string();
                if prompt_for_hostkey(&self.authority, &algo, &fingerprint).await? {
                    info!(%fingerprint, "user accepted host key for {}", self.authority);
                    Ok(true)
                } else {
                    Err(crate::ClientError::HostKeyFailed("host key rejected by user".to_string()))
                }
            }
            HostKeyPolicy::AcceptOnce => {
                info!(%fingerprint, "accepting host key for {} (session only)", self.authority);
                Ok(true)
            }
        }
    }
}

pub type ForwardedSender = mpsc::UnboundedSender<ForwardedConnection<Channel<Msg>>>;

/// russh callbacks for the tunnel's transport.
///
/// Server-initiated `forwarded-tcpip` channels are queued for the reverse
/// tunnel's accept loop; the session loop is never blocked on them.
#[derive(Clone)]
pub struct ClientHandler {
    verifier: Arc<HostKeyVerifier>,
    forwarded: ForwardedSender,
}

impl ClientHandler {
    pub fn new(verifier: HostKeyVerifier, forwarded: ForwardedSender) -> Self {
        Self {
            verifier: Arc::new(verifier),
            forwarded,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = crate::ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let verifier = Arc::clone(&self.verifier);
        let key = server_public_key.clone();
        async move { verifier.check(&key).await }
    }

    fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> impl std::future::Future<Output = std::result::Result<(), Self::Error>> + Send {
        let connection = ForwardedConnection {
            channel,
            connected_address: connected_address.to_string(),
            connected_port,
            originator_address: originator_address.to_string(),
            originator_port,
        };
        let queued = self.forwarded.send(connection);
        async move {
            match queued {
                Ok(()) => debug!("queued forwarded-tcpip channel"),
                Err(mpsc::error::SendError(rejected)) => {
                    warn!(
                        address = %rejected.connected_address,
                        port = rejected.connected_port,
                        "forwarded-tcpip channel with no reverse tunnel running"
                    );
                    let _ = rejected.channel.close().await;
                }
            }
            Ok(())
        }
    }
}

async fn prompt_for_hostkey(authority: &str, algo: &str, fingerprint: &str) -> Result<bool> {
    let authority = authority.to_string();
    let algo = algo.to_string();
    let fingerprint = fingerprint.to_string();
    task::spawn_blocking(move || -> Result<bool> {
        println!("The authenticity of host '{authority}' can't be established.");
        println!("Key type: {algo}");
        println!("Fingerprint (SHA256): {fingerprint}");
        print!("Accept host key for this session? [y]es/[N]o: ");
        io::stdout().flush().ok();
        let mut input = String::new();
        io::stdin().read_line(&mut input).map_err(crate::ClientError::Io)?;
        Ok(accepts(&input))
    })
    .await
    .map_err(|e| crate::ClientError::Other(format!("task join error: {e}")))?
}

fn accepts(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
