//! Single-tunnel TCP port forwarding over one SSH transport.
//!
//! This module provides:
//! - the `"<A>,<B>"` port-pair parser
//! - the transport traits the tunnel runs against
//! - forward (local listener) and reverse (server listener) accept loops
//! - the bidirectional relay used for every accepted connection
//!
//! The main entry point is [`TunnelManager`], which owns the listener, the
//! set of active relays and the shutdown signal.

mod local;
mod manager;
mod parsing;
mod relay;
mod remote;
mod traits;

// Re-export public API
pub use manager::{RELAY_GRACE_PERIOD, TunnelManager};
pub use parsing::parse_port_pair;
pub use relay::{RelayStats, relay_streams};
pub use traits::{
    ForwardSession, ForwardStream, ForwardStreamIo, ForwardedConnection, RemoteForwardChannel, RemoteListener, RemoteRegistrar
};
