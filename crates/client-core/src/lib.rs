mod auth;
pub mod error;
mod hostkeys;
pub mod keys;
mod transport;

use std::{path::PathBuf, sync::Arc, time::Duration};

use auth::{AuthPreferences, authenticate};
pub use error::{ClientError, ClientResult};
pub use hostkeys::{ClientHandler, HostKeyPolicy};
use hostkeys::HostKeyVerifier;
use russh::client;
use tokio::sync::mpsc;
use tracing::info;
pub use transport::SshTransport;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEPALIVE_MAX: usize = 3;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private keys to offer; empty means the default identities.
    pub identities: Vec<PathBuf>,
    pub agent_auth: bool,
    pub ssh_agent_socket: Option<PathBuf>,
    pub prompt_password: bool,
    pub allow_keyboard_interactive: bool,
    pub keepalive_interval: Option<Duration>,
    pub keepalive_max: Option<usize>,
    pub hostkey_policy: HostKeyPolicy,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            identities: Vec::new(),
            agent_auth: false,
            ssh_agent_socket: None,
            prompt_password: true,
            allow_keyboard_interactive: true,
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            keepalive_max: Some(DEFAULT_KEEPALIVE_MAX),
            hostkey_policy: HostKeyPolicy::Prompt,
        }
    }

    /// `user@host:port`, as shown to the user.
    pub fn authority(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Open the transport and authenticate.
///
/// Any failure before authentication completes is reported as
/// [`ClientError::Connect`] (or [`ClientError::HostKeyFailed`]); there is no
/// retry.
pub async fn connect(config: ClientConfig) -> ClientResult<SshTransport> {
    let authority = config.authority();
    establish(config)
        .await
        .map_err(|err| ClientError::connect(authority, err))
}

async fn establish(config: ClientConfig) -> ClientResult<SshTransport> {
    let ClientConfig {
        host,
        port,
        username,
        identities,
        agent_auth,
        ssh_agent_socket,
        prompt_password,
        allow_keyboard_interactive,
        keepalive_interval,
        keepalive_max,
        hostkey_policy,
    } = config;

    let identities = if identities.is_empty() {
        keys::home_dir().map(|home| keys::default_identities(&home)).unwrap_or_default()
    } else {
        identities
    };

    let ssh_config = Arc::new(client::Config {
        nodelay: true,
        inactivity_timeout: None,
        keepalive_interval,
        keepalive_max: keepalive_max.unwrap_or(DEFAULT_KEEPALIVE_MAX),
        ..Default::default()
    });

    let target = format!("{host}:{port}");
    let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
    let handler = ClientHandler::new(HostKeyVerifier::new(target.clone(), hostkey_policy), forwarded_tx);
    info!("connecting to {target}");
    let mut session = client::connect(ssh_config, (host.as_str(), port), handler).await?;

    let password_prompt = format!("{username}@{host}'s password: ");
    authenticate(
        &mut session,
        AuthPreferences {
            username: &username,
            identities: &identities,
            use_agent_auth: agent_auth,
            agent_socket: ssh_agent_socket.as_deref(),
            prompt_password,
            password_prompt: &password_prompt,
            allow_keyboard_interactive,
        },
    )
    .await?;

    let authority = format!("{username}@{host}:{port}");
    Ok(SshTransport::new(Arc::new(session), forwarded_rx, authority))
}
