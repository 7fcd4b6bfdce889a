//! Transport selection.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::TransportError;
use crate::tcp::TcpTransport;
use crate::traits::Transport;
use crate::unix::UnixTransport;

/// Which transport carries the broker connection.
///
/// Serial and CAN links exist in SHV deployments but wrap frames in their
/// own byte-stuffing layers; they plug in behind the same [`Transport`]
/// trait and are not part of this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Tcp { host: String, port: u16 },
    LocalDomain { path: PathBuf },
}

/// Creates a [`Transport`] out of a [`TransportConfig`].
///
/// ## Arguments
/// * `config` - The transport configuration to make the transport by.
/// * `connect_timeout` - Bound on a single connect attempt.
pub fn make_transport(
    config: &TransportConfig,
    connect_timeout: Duration,
) -> Result<Box<dyn Transport>, TransportError> {
    match config {
        TransportConfig::Tcp { host, port } => Ok(Box::new(TcpTransport::with_timeout(
            host.clone(),
            *port,
            connect_timeout,
        )?)),
        TransportConfig::LocalDomain { path } => Ok(Box::new(UnixTransport::with_timeout(
            path.clone(),
            connect_timeout,
        )?)),
    }
}

impl TransportConfig {
    /// Parse `host:port` into a TCP configuration.
    pub fn tcp_from_str(addr: &str) -> Result<Self, TransportError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| TransportError::Address(addr.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| TransportError::Address(addr.to_string()))?;
        if host.is_empty() {
            return Err(TransportError::Address(addr.to_string()));
        }
        Ok(TransportConfig::Tcp {
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_address_parsing() {
        assert_eq!(
            TransportConfig::tcp_from_str("broker.example:3755").unwrap(),
            TransportConfig::Tcp {
                host: "broker.example".into(),
                port: 3755
            }
        );
        assert!(TransportConfig::tcp_from_str("noport").is_err());
        assert!(TransportConfig::tcp_from_str(":3755").is_err());
        assert!(TransportConfig::tcp_from_str("host:notaport").is_err());
    }
}
