//! Local address discovery.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

use crate::CastError;

/// Returns the local interface address used to reach `remote_host`.
///
/// Connects an unbound UDP socket towards the controller and reads back the
/// source address the OS picked. No packets are sent.
///
/// # Errors
///
/// - `CastError::Transport` - Host does not resolve or no route exists
pub async fn local_ip_towards(remote_host: &str, remote_port: u16) -> Result<IpAddr, CastError> {
    let target = format!("{remote_host}:{remote_port}");
    let transport_error = |reason: String| CastError::Transport {
        addr: target.clone(),
        reason,
    };

    let remote = tokio::net::lookup_host((remote_host, remote_port))
        .await
        .map_err(|e| transport_error(format!("cannot resolve controller host: {e}")))?
        .next()
        .ok_or_else(|| transport_error("controller host has no addresses".to_string()))?;

    let unspecified = match remote {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };

    let socket = UdpSocket::bind(unspecified)
        .await
        .map_err(|e| transport_error(e.to_string()))?;
    socket
        .connect(remote)
        .await
        .map_err(|e| transport_error(format!("no route to controller: {e}")))?;

    let local = socket
        .local_addr()
        .map_err(|e| transport_error(e.to_string()))?
        .ip();
    tracing::debug!(%local, controller = %remote, "Detected local interface address");
    Ok(local)
}
