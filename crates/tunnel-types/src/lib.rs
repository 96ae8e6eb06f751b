//! Shared tunnel types used across ssh-tunnel.
//!
//! These types are intentionally dependency-light so they can be reused by
//! CLI parsing and the tunnel runtime without pulling in protocol
//! implementations.

pub mod tunnel;

pub use tunnel::{Direction, PortPair, TunnelRequest, TunnelSpec};
