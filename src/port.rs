// Listen port discovery
//
// Order:
// 1. PORT from the environment, used verbatim
// 2. the first port of the range (8001 by default) if it can be bound
// 3. random picks inside the range, one attempt per port in the range
//
// Probing binds and immediately releases the port, so another process can
// still take it before the server binds.

use rand::Rng;
use std::net::TcpListener;
use tracing::debug;

/// Port discovery failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("no port available in range {start}-{end}")]
    NoPortAvailable { start: u16, end: u16 },
}

/// Whether `host:port` can currently be bound
pub fn is_port_available(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).is_ok()
}

/// Pick the listen port
///
/// # Errors
///
/// Returns `PortError::NoPortAvailable` if neither the first port nor any
/// random pick in the range could be bound.
pub fn find_available_port(
    env_port: Option<&str>,
    host: &str,
    range_start: u16,
    range_len: u16,
) -> Result<String, PortError> {
    if let Some(port) = env_port.filter(|p| !p.is_empty()) {
        debug!(port, "Using port from environment");
        return Ok(port.to_string());
    }

    let range_end = range_start.saturating_add(range_len.saturating_sub(1));

    if is_port_available(host, range_start) {
        return Ok(range_start.to_string());
    }

    let mut rng = rand::rng();
    for _ in 0..range_len {
        let candidate = rng.random_range(range_start..=range_end);
        if is_port_available(host, candidate) {
            debug!(port = candidate, "Default port busy, using alternative");
            return Ok(candidate.to_string());
        }
    }

    Err(PortError::NoPortAvailable {
        start: range_start,
        end: range_end,
    })
}
