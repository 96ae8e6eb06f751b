use std::fmt;

/// Bind address used for forward tunnels (all local interfaces).
pub const FORWARD_BIND_ADDRESS: &str = "0.0.0.0";
/// Bind address requested for reverse tunnels; empty lets the server choose.
pub const REVERSE_BIND_ADDRESS: &str = "";
/// Destination host used when none is given.
pub const DEFAULT_DEST_HOST: &str = "localhost";

/// Two TCP ports written as `"<source>,<destination>"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortPair {
    /// First port of the pair.
    pub source: u16,
    /// Second port of the pair.
    pub destination: u16,
}

impl PortPair {
    pub const fn new(source: u16, destination: u16) -> Self {
        Self { source, destination }
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.source, self.destination)
    }
}

/// Which side of the SSH connection listens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Listen locally, open `direct-tcpip` channels through the server.
    Forward,
    /// Ask the server to listen, connect locally for each forwarded channel.
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Reverse => f.write_str("reverse"),
        }
    }
}

/// Validated tunnel selection: exactly one direction with its port pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelRequest {
    pub direction: Direction,
    pub ports: PortPair,
    pub dest_host: String,
}

impl TunnelRequest {
    pub fn forward(ports: PortPair, dest_host: impl Into<String>) -> Self {
        Self { direction: Direction::Forward, ports, dest_host: dest_host.into() }
    }

    pub fn reverse(ports: PortPair, dest_host: impl Into<String>) -> Self {
        Self { direction: Direction::Reverse, ports, dest_host: dest_host.into() }
    }

    /// Resolves the port pair into local/remote roles.
    ///
    /// `-f A,B` listens locally on `A` and reaches `B` from the server.
    /// `-r A,B` has the server listen on `A` and connects locally to `B`.
    pub fn spec(&self) -> TunnelSpec {
        match self.direction {
            Direction::Forward => TunnelSpec {
                direction: Direction::Forward,
                local_port: self.ports.source,
                remote_port: self.ports.destination,
                dest_host: self.dest_host.clone(),
                bind_address: FORWARD_BIND_ADDRESS.to_string(),
            },
            Direction::Reverse => TunnelSpec {
                direction: Direction::Reverse,
                local_port: self.ports.destination,
                remote_port: self.ports.source,
                dest_host: self.dest_host.clone(),
                bind_address: REVERSE_BIND_ADDRESS.to_string(),
            },
        }
    }
}

/// Fully resolved tunnel as started by the tunnel manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelSpec {
    pub direction: Direction,
    /// Port on this machine: the listener for forward, the connect target for reverse.
    pub local_port: u16,
    /// Port on the far side: the target for forward, the server listener for reverse.
    pub remote_port: u16,
    /// Host connections are relayed to.
    pub dest_host: String,
    /// Address the listener binds to.
    pub bind_address: String,
}

impl TunnelSpec {
    /// Port the listening side binds.
    pub fn listen_port(&self) -> u16 {
        match self.direction {
            Direction::Forward => self.local_port,
            Direction::Reverse => self.remote_port,
        }
    }

    /// Port connections are relayed to on `dest_host`.
    pub fn target_port(&self) -> u16 {
        match self.direction {
            Direction::Forward => self.remote_port,
            Direction::Reverse => self.local_port,
        }
    }

    /// `dest_host:target_port`.
    pub fn target(&self) -> String {
        format!("{}:{}", self.dest_host, self.target_port())
    }
}

impl fmt::Display for TunnelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Forward => write!(
                f,
                "local {}:{} -> {} (via server)",
                self.bind_address,
                self.listen_port(),
                self.target()
            ),
            Direction::Reverse => {
                let bind = if self.bind_address.is_empty() { "*" } else { self.bind_address.as_str() };
                write!(
                    f,
                    "remote {}:{} -> {} (local)",
                    bind,
                    self.listen_port(),
                    self.target()
                )
            }
        }
    }
}
