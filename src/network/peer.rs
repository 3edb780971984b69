//! Peer registry entries
//!
//! One [`Peer`] exists per distinct remote address at a time. The registry
//! itself is owned by the [`NetworkManager`](super::manager::NetworkManager);
//! protocols only read peer state through shared references.

use std::sync::OnceLock;

use super::crypto::CryptoContext;
use super::transport::TransportAddress;

/// Opaque handle to the transport-level peer object. Exclusively owned by the
/// peer record; the transport hands it out when the connection is first
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerHandle(pub u64);

/// One remote endpoint and its session state.
///
/// The session token and the encryption context are both set exactly once,
/// after the handshake, and are immutable thereafter (the crypto context's
/// internal packet counter is the sole exception).
pub struct Peer {
    addr: TransportAddress,
    handle: PeerHandle,
    session_token: OnceLock<u32>,
    crypto: OnceLock<CryptoContext>,
}

impl Peer {
    pub fn new(addr: TransportAddress, handle: PeerHandle) -> Self {
        Self {
            addr,
            handle,
            session_token: OnceLock::new(),
            crypto: OnceLock::new(),
        }
    }

    pub fn address(&self) -> TransportAddress {
        self.addr
    }

    pub fn handle(&self) -> PeerHandle {
        self.handle
    }

    /// Record the token negotiated during the handshake. Returns `false` if a
    /// token was already set; the first value always wins.
    pub fn set_session_token(&self, token: u32) -> bool {
        self.session_token.set(token).is_ok()
    }

    pub fn session_token(&self) -> Option<u32> {
        self.session_token.get().copied()
    }

    /// Install the per-peer encryption context derived after key exchange.
    /// Returns `false` if one was already installed.
    pub fn install_crypto(&self, ctx: CryptoContext) -> bool {
        self.crypto.set(ctx).is_ok()
    }

    pub fn crypto(&self) -> Option<&CryptoContext> {
        self.crypto.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_set_once() {
        let peer = Peer::new(TransportAddress::new(0x7F000001, 2759), PeerHandle(1));
        assert_eq!(peer.session_token(), None);
        assert!(peer.set_session_token(0xDEAD));
        assert!(!peer.set_session_token(0xBEEF));
        assert_eq!(peer.session_token(), Some(0xDEAD));
    }

    #[test]
    fn test_crypto_installed_once() {
        let peer = Peer::new(TransportAddress::new(0x7F000001, 2759), PeerHandle(1));
        assert!(peer.crypto().is_none());
        assert!(peer.install_crypto(CryptoContext::new([7u8; 16], [3u8; 12])));
        assert!(!peer.install_crypto(CryptoContext::new([8u8; 16], [4u8; 12])));
        assert!(peer.crypto().is_some());
    }
}
