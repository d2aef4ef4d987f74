//! Broadcast UDP transport for the discovery exchange.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::protocol::{self, DISCOVERY_PORT};

/// Broadcast-capable UDP socket.
///
/// Responses arrive unicast at the ephemeral port the request left from, so
/// the same socket both sends requests and receives replies. Cloning shares
/// the underlying socket.
#[derive(Clone)]
pub(crate) struct BroadcastTransport {
    socket: Arc<UdpSocket>,
}

impl BroadcastTransport {
    /// Binds a nonblocking IPv4 socket on an ephemeral port with
    /// SO_BROADCAST and SO_REUSEADDR set before handing it to tokio.
    pub fn open() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;

        let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;
        debug!(local = %socket.local_addr()?, "discovery socket bound");

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Fire-and-forget discovery request to `(broadcast_addr, 3483)`.
    pub async fn send_request(&self, broadcast_addr: IpAddr) -> io::Result<()> {
        let target = SocketAddr::new(broadcast_addr, DISCOVERY_PORT);
        self.socket
            .send_to(protocol::encode_request(), target)
            .await?;
        Ok(())
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}
