use std::{env, path::PathBuf, time::Duration};

use clap::{ArgAction, Parser};
use client_core::{ClientConfig, DEFAULT_SSH_PORT, HostKeyPolicy};
use ssh_core::forwarding::parse_port_pair;
use tunnel_types::{TunnelRequest, tunnel::DEFAULT_DEST_HOST};

use crate::CliError;

type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Parser)]
#[command(
    name = "ssh-tunnel",
    version,
    about = "Create a forward (local -> ssh server) or reverse (ssh server -> local) TCP tunnel over an SSH connection."
)]
pub struct TunnelArgs {
    /// Enable debugging
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    pub debug: bool,
    /// The SSH server address
    #[arg(short = 's', long = "ssh-server-address", visible_alias = "ssh_server_address", value_name = "HOST")]
    ssh_server_address: Option<String>,
    /// The TCP port of the SSH server
    #[arg(short = 'p', long, value_name = "PORT", default_value_t = DEFAULT_SSH_PORT)]
    port: u16,
    /// The username to log into the SSH server with (defaults to the current user)
    #[arg(short = 'u', long, value_name = "USER")]
    username: Option<String>,
    /// Local TCP port then the port reached from the SSH server, e.g. 8080,80
    #[arg(short = 'f', long, value_name = "LOCAL,REMOTE", help_heading = "Tunnel Options")]
    forward: Option<String>,
    /// Port the SSH server listens on then the local TCP port, e.g. 8080,80
    #[arg(short = 'r', long, value_name = "REMOTE,LOCAL", help_heading = "Tunnel Options")]
    reverse: Option<String>,
    /// The destination host address
    #[arg(
        short = 't',
        long = "dest-host",
        visible_alias = "dest_host",
        value_name = "HOST",
        default_value = DEFAULT_DEST_HOST,
        help_heading = "Tunnel Options"
    )]
    dest_host: String,
    /// Show the local ssh public key that will be used to log in, then exit
    #[arg(short = 'k', long = "public-key", visible_alias = "public_key", action = ArgAction::SetTrue)]
    public_key: bool,
    /// Private key to use for public-key authentication (repeatable)
    #[arg(long = "identity", value_name = "KEY", action = ArgAction::Append, help_heading = "Auth Options")]
    identities: Vec<PathBuf>,
    /// Attempt authentication via the SSH agent specified in SSH_AUTH_SOCK
    #[arg(long = "agent-auth", action = ArgAction::SetTrue, help_heading = "Auth Options")]
    agent_auth: bool,
    /// Suppress password prompts (useful for key-only auth)
    #[arg(long = "no-password", action = ArgAction::SetTrue, help_heading = "Auth Options")]
    no_password: bool,
    /// Disable keyboard-interactive authentication
    #[arg(long = "no-keyboard-interactive", action = ArgAction::SetTrue, help_heading = "Auth Options")]
    no_keyboard_interactive: bool,
    /// Accept an unknown host key for this session only
    #[arg(long = "accept-hostkey", action = ArgAction::SetTrue, help_heading = "Connection Options")]
    accept_hostkey: bool,
    /// Send keepalive probes every N seconds (default 30)
    #[arg(long = "keepalive-interval", value_name = "SECONDS", help_heading = "Connection Options")]
    keepalive_interval: Option<u64>,
    /// Disconnect after this many unanswered keepalives (default 3)
    #[arg(long = "keepalive-max", value_name = "COUNT", help_heading = "Connection Options")]
    keepalive_max: Option<usize>,
}

/// What one invocation of the tool does.
#[derive(Clone, Debug)]
pub enum Invocation {
    ShowPublicKey { identities: Vec<PathBuf> },
    Tunnel { client: ClientConfig, request: TunnelRequest },
}

#[derive(Clone, Debug)]
pub struct TunnelConfig {
    pub debug: bool,
    pub invocation: Invocation,
}

impl TryFrom<TunnelArgs> for TunnelConfig {
    type Error = CliError;

    fn try_from(args: TunnelArgs) -> Result<Self> {
        let TunnelArgs {
            debug,
            ssh_server_address,
            port,
            username,
            forward,
            reverse,
            dest_host,
            public_key,
            identities,
            agent_auth,
            no_password,
            no_keyboard_interactive,
            accept_hostkey,
            keepalive_interval,
            keepalive_max,
        } = args;

        if public_key {
            return Ok(TunnelConfig {
                debug,
                invocation: Invocation::ShowPublicKey { identities },
            });
        }

        let request = tunnel_request(forward.as_deref(), reverse.as_deref(), dest_host)?;

        let host = ssh_server_address
            .filter(|host| !host.trim().is_empty())
            .ok_or_else(|| CliError::invalid("The -s/--ssh-server-address argument is required to create a tunnel."))?;

        let username = username
            .or_else(fallback_username)
            .ok_or_else(|| CliError::invalid("unable to determine username; use -u/--username"))?;

        let agent_socket = env::var_os("SSH_AUTH_SOCK").map(PathBuf::from);
        if agent_auth && agent_socket.is_none() {
            return Err(CliError::invalid("SSH_AUTH_SOCK must be set to use --agent-auth"));
        }

        let mut client = ClientConfig::new(host, port, username);
        client.identities = identities;
        client.agent_auth = agent_auth;
        client.ssh_agent_socket = agent_socket;
        client.prompt_password = !no_password;
        client.allow_keyboard_interactive = !no_keyboard_interactive;
        if let Some(seconds) = keepalive_interval {
            client.keepalive_interval = (seconds > 0).then(|| Duration::from_secs(seconds));
        }
        if keepalive_max.is_some() {
            client.keepalive_max = keepalive_max;
        }
        client.hostkey_policy = if accept_hostkey {
            HostKeyPolicy::AcceptOnce
        } else {
            HostKeyPolicy::Prompt
        };

        Ok(TunnelConfig {
            debug,
            invocation: Invocation::Tunnel { client, request },
        })
    }
}

/// Exactly one of `forward` and `reverse` must be given.
pub fn tunnel_request(forward: Option<&str>, reverse: Option<&str>, dest_host: String) -> Result<TunnelRequest> {
    match (forward, reverse) {
        (Some(ports), None) => Ok(TunnelRequest::forward(parse_port_pair(ports)?, dest_host)),
        (None, Some(ports)) => Ok(TunnelRequest::reverse(parse_port_pair(ports)?, dest_host)),
        (Some(_), Some(_)) => Err(CliError::invalid(
            "Only one of the -f/--forward or -r/--reverse command line arguments may be used.",
        )),
        (None, None) => Err(CliError::invalid(
            "Either the -f/--forward or -r/--reverse command line arguments must be used.",
        )),
    }
}

fn fallback_username() -> Option<String> {
    for key in ["SSH_TUNNEL_USER", "USER", "LOGNAME", "USERNAME"] {
        if let Ok(value) = env::var(key)
            && !value.is_empty()
        {
            return Some(value);
        }
    }
    let current = whoami::username();
    if current.is_empty() { None } else { Some(current) }
}
