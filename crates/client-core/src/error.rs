use thiserror::Error;

/// Errors that can occur in client-core operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport could not be established
    #[error("unable to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: Box<ClientError>,
    },

    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Host key verification failed
    #[error("host key verification failed: {0}")]
    HostKeyFailed(String),

    /// Cryptographic error
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// None of the public key files held a key
    #[error("No public key data found.")]
    NoPublicKey,

    /// Tunnel error raised below the transport
    #[error(transparent)]
    Tunnel(#[from] ssh_core::SshCoreError),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Wrap a failure that happened before the session was usable.
    ///
    /// Host-key rejections are kept as they are.
    pub fn connect(address: impl Into<String>, source: ClientError) -> Self {
        match source {
            ClientError::HostKeyFailed(_) | ClientError::Connect { .. } => source,
            other => ClientError::Connect {
                address: address.into(),
                source: Box::new(other),
            },
        }
    }
}
