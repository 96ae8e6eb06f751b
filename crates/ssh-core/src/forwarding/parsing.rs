use tunnel_types::PortPair;

use crate::{SshCoreError, SshResult};

/// Parse a port pair.
///
/// Format: `A,B` where both fields are TCP port numbers. Whitespace around
/// each field is ignored; anything else fails with
/// [`SshCoreError::InvalidPortSpec`].
pub fn parse_port_pair(spec: &str) -> SshResult<PortPair> {
    let fields: Vec<&str> = spec.split(',').collect();
    let [source, destination] = fields.as_slice() else {
        return Err(SshCoreError::invalid_port_spec(spec));
    };
    Ok(PortPair {
        source: parse_port(source, spec)?,
        destination: parse_port(destination, spec)?,
    })
}

fn parse_port(value: &str, spec: &str) -> SshResult<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| SshCoreError::invalid_port_spec(spec))
}

#[cfg(test)]
#[path = "parsing_tests.rs"]
mod tests;
