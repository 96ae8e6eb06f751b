use client_core::ClientError;
use ssh_core::SshCoreError;
use thiserror::Error;

/// Errors surfaced by the command line tool
#[derive(Error, Debug)]
pub enum CliError {
    /// Options that cannot describe a tunnel
    #[error("{0}")]
    InvalidArguments(String),

    /// Connecting, authenticating or key lookup failed
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Port parsing or the tunnel itself failed
    #[error(transparent)]
    Tunnel(#[from] SshCoreError),
}

impl CliError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }
}
