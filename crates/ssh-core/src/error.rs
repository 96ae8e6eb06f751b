use thiserror::Error;

/// Errors that can occur in SSH core operations
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Port pair text that is not two comma separated integers
    #[error("Unable to extract TCP port numbers from {0}")]
    InvalidPortSpec(String),

    /// A manager only ever runs one tunnel
    #[error("a tunnel has already been started on this connection")]
    TunnelAlreadyStarted,

    /// The tunnel stopped accepting connections on its own
    #[error("tunnel failed: {0}")]
    TunnelFailure(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// Network binding failed
    #[error("failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Connection failed
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Opening a channel through the transport failed
    #[error("failed to open channel to {target}: {source}")]
    Channel {
        target: String,
        #[source]
        source: Box<SshCoreError>,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for SSH core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    pub fn invalid_port_spec(value: impl Into<String>) -> Self {
        Self::InvalidPortSpec(value.into())
    }

    pub fn tunnel_failure(message: impl Into<String>) -> Self {
        Self::TunnelFailure(message.into())
    }

    /// Wrap a transport error raised while opening a channel to `target`.
    pub fn channel(target: impl Into<String>, source: SshCoreError) -> Self {
        Self::Channel {
            target: target.into(),
            source: Box::new(source),
        }
    }
}
