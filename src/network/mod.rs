//! Client-side network bootstrap: the cooperative protocol scheduler, the
//! transport seam, per-peer packet encryption, and the concrete bootstrap
//! protocols (server connection, NAT discovery, lobby registration, clock
//! synchronisation).

pub mod crypto;
pub mod error;
pub mod event;
pub mod manager;
pub mod peer;
pub mod protocol;
pub mod protocols;
pub mod transport;

pub use crypto::CryptoContext;
pub use error::NetworkError;
pub use event::{Event, EventKind};
pub use manager::NetworkManager;
pub use peer::{Peer, PeerHandle};
pub use protocol::{Protocol, ProtocolCtx, RetryTimer};
pub use transport::{Transport, TransportAddress, TransportEvent, UdpProbe};
