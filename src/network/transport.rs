//! Transport boundary
//!
//! The reliable/unreliable datagram library (channel multiplexing, sequencing,
//! fragmentation) is an external collaborator. This module defines the value
//! types and the trait the bootstrap layer consumes, plus a small raw UDP
//! probe socket used for the STUN exchange, which deliberately bypasses the
//! multiplexed transport.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::trace;

use super::error::NetworkError;

/// An IPv4 endpoint as the transport sees it. Plain value type, used both as
/// the peer-registry key and as a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransportAddress {
    /// Host address in host byte order
    pub ip: u32,
    pub port: u16,
}

impl TransportAddress {
    pub fn new(ip: u32, port: u16) -> Self {
        Self { ip, port }
    }

    /// An address with a zero ip or port is not a usable target.
    pub fn is_unset(&self) -> bool {
        self.ip == 0 || self.port == 0
    }
}

impl From<SocketAddrV4> for TransportAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            ip: u32::from(*addr.ip()),
            port: addr.port(),
        }
    }
}

impl From<TransportAddress> for SocketAddrV4 {
    fn from(addr: TransportAddress) -> Self {
        SocketAddrV4::new(Ipv4Addr::from(addr.ip), addr.port)
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4Addr::from(self.ip), self.port)
    }
}

/// A raw notification reported by the transport poll.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected(TransportAddress),
    Disconnected(TransportAddress),
    Data {
        from: TransportAddress,
        payload: Vec<u8>,
    },
}

impl TransportEvent {
    /// The remote endpoint this notification concerns.
    pub fn address(&self) -> TransportAddress {
        match self {
            TransportEvent::Connected(addr) => *addr,
            TransportEvent::Disconnected(addr) => *addr,
            TransportEvent::Data { from, .. } => *from,
        }
    }
}

/// The send/receive/connect primitives the bootstrap layer consumes.
///
/// `connect` is a request only: success is observed later as a
/// [`TransportEvent::Connected`]. `poll` must never block; it drains at most
/// one pending notification per call.
pub trait Transport: Send {
    fn connect(&mut self, addr: TransportAddress) -> Result<(), NetworkError>;

    fn disconnect(&mut self, addr: TransportAddress);

    fn send(
        &mut self,
        addr: TransportAddress,
        payload: &[u8],
        reliable: bool,
    ) -> Result<(), NetworkError>;

    fn poll(&mut self) -> Option<TransportEvent>;

    /// Point-in-time query of the transport's peer state table. Cheap enough
    /// for polling-style protocols to call every tick.
    fn is_connected_to(&self, addr: TransportAddress) -> bool;
}

/// Ephemeral non-blocking UDP socket for raw exchanges outside the
/// multiplexed transport (STUN binding requests).
pub struct UdpProbe {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpProbe {
    /// Bind to an ephemeral local port with SO_REUSEADDR enabled.
    pub fn bind() -> Result<Self, NetworkError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        let bind_addr: SocketAddr = "0.0.0.0:0".parse()?;
        socket.bind(&bind_addr.into())?;

        let socket: UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;
        trace!("UDP probe bound to {}", local_addr);

        Ok(Self { socket, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<(), NetworkError> {
        self.socket.send_to(data, addr)?;
        trace!("Sent {} raw bytes to {}", data.len(), addr);
        Ok(())
    }

    /// Drain one pending datagram, if any. Returns `None` when the socket has
    /// nothing to deliver right now.
    pub fn try_recv_from(&self) -> Result<Option<(Vec<u8>, SocketAddr)>, NetworkError> {
        let mut buf = vec![0u8; 2048];
        match self.socket.recv_from(&mut buf) {
            Ok((len, addr)) => {
                buf.truncate(len);
                trace!("Received {} raw bytes from {}", len, addr);
                Ok(Some((buf, addr)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
