use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs as _, UdpSocket},
};

use tracing::debug;

/// A destination for encoded metric payloads.
///
/// Each call to `emit` is expected to hand off exactly one payload, as one datagram. Implementations must not block
/// for any meaningful amount of time.
pub trait MetricSink: Send {
    /// Sends a single payload, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// If the payload could not be handed to the underlying transport, an error is returned. Callers treat this as a
    /// dropped payload and never retry.
    fn emit(&mut self, payload: &[u8]) -> io::Result<usize>;
}

/// A sink that sends each payload as a UDP datagram to a fixed peer.
///
/// The socket is connected to the peer when the sink is created, so sends don't repeat address resolution, and is put
/// into non-blocking mode so a send can never stall the caller.
pub struct UdpMetricSink {
    socket: UdpSocket,
    peer_addr: SocketAddr,
}

impl UdpMetricSink {
    /// Resolves `host:port`, binds an ephemeral local socket, and connects it to the resolved address.
    ///
    /// # Errors
    ///
    /// If the address can't be resolved, or the socket can't be created or configured, an error is returned. Whether or
    /// not anything is listening at the remote address has no bearing on this.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let addrs = (host, port).to_socket_addrs()?.collect::<Vec<_>>();
        let first = addrs.first().copied().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses found for '{host}'"))
        })?;

        // Only try peers of the same address family as the socket we bind.
        let peers = addrs.iter().copied().filter(|addr| addr.is_ipv4() == first.is_ipv4()).collect::<Vec<_>>();
        let socket = if first.is_ipv4() {
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?
        } else {
            UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0))?
        };
        socket.connect(&peers[..])?;
        socket.set_nonblocking(true)?;

        let peer_addr = socket.peer_addr()?;
        debug!(%peer_addr, local_addr = ?socket.local_addr().ok(), "Connected statsd UDP socket.");

        Ok(Self { socket, peer_addr })
    }

    /// Returns the address of the peer the socket is connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl MetricSink for UdpMetricSink {
    fn emit(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send(payload)
    }
}
