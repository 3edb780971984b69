//! Packet encryption
//!
//! Thin wrapper over AES-128-GCM (96-bit nonce, 128-bit tag) for two payload
//! kinds: the connection-handshake packet, sealed with the globally-shared
//! client key/IV established out of band, and per-peer data packets, sealed
//! with a key derived during the handshake.
//!
//! The nonce folds a strictly-increasing packet counter into the context IV,
//! so no nonce is ever reused for a given key. The counter travels in clear
//! ahead of the ciphertext.

use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use tracing::debug;

use super::error::NetworkError;

/// Size of the AES-GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the nonce (96 bits)
const NONCE_SIZE: usize = 12;

/// Bytes of explicit counter prefixed to every sealed packet
const COUNTER_SIZE: usize = 4;

/// Symmetric AEAD context bound to one key/IV pair.
///
/// Immutable after creation except for the packet counter, which only ever
/// increases. The counter space is 32 bits on the wire; exhausting it is
/// protocol-fatal rather than wrapping.
pub struct CryptoContext {
    cipher: Aes128Gcm,
    iv: [u8; NONCE_SIZE],
    // Tracked in 64 bits so exhaustion is detected without ever producing a
    // repeated 32-bit wire counter.
    counter: AtomicU64,
}

impl CryptoContext {
    pub fn new(key: [u8; 16], iv: [u8; NONCE_SIZE]) -> Self {
        let key = Key::<Aes128Gcm>::from_slice(&key);
        Self {
            cipher: Aes128Gcm::new(key),
            iv,
            counter: AtomicU64::new(0),
        }
    }

    /// Derive a per-peer context from handshake material. Both sides feed the
    /// same shared secret and session token and obtain the same key/IV; the
    /// direction is separated by the info string.
    pub fn derive_for_peer(shared_secret: &[u8], session_token: u32, client_to_server: bool) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(&session_token.to_be_bytes()), shared_secret);

        let key_info: &[u8] = if client_to_server {
            b"pitlane-packet-key-c2s"
        } else {
            b"pitlane-packet-key-s2c"
        };
        let iv_info: &[u8] = if client_to_server {
            b"pitlane-packet-iv-c2s"
        } else {
            b"pitlane-packet-iv-s2c"
        };

        let mut key = [0u8; 16];
        hk.expand(key_info, &mut key)
            .expect("HKDF expand should not fail for 16-byte output");
        let mut iv = [0u8; NONCE_SIZE];
        hk.expand(iv_info, &mut iv)
            .expect("HKDF expand should not fail for 12-byte output");

        Self::new(key, iv)
    }

    /// Seal a payload. Output layout: `counter:u32 BE || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, NetworkError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        if n >= u32::MAX as u64 {
            return Err(NetworkError::NonceExhausted);
        }
        let counter = n as u32;

        let nonce = self.derive_nonce(counter);
        let nonce = Nonce::from_slice(&nonce);

        let sealed = self
            .cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| NetworkError::Crypto)?;

        let mut out = Vec::with_capacity(COUNTER_SIZE + sealed.len());
        out.extend_from_slice(&counter.to_be_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a sealed packet. Fails closed: an authentication failure yields
    /// no plaintext and is logged at debug level only.
    pub fn decrypt(&self, packet: &[u8], aad: &[u8]) -> Result<Vec<u8>, NetworkError> {
        if packet.len() < COUNTER_SIZE + TAG_SIZE {
            return Err(NetworkError::Crypto);
        }

        let counter = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
        let nonce = self.derive_nonce(counter);
        let nonce = Nonce::from_slice(&nonce);

        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &packet[COUNTER_SIZE..],
                    aad,
                },
            )
            .map_err(|_| {
                debug!("Discarding packet that failed authentication");
                NetworkError::Crypto
            })
    }

    /// Nonce = IV with the packet counter XORed into its first four bytes.
    fn derive_nonce(&self, counter: u32) -> [u8; NONCE_SIZE] {
        let mut nonce = self.iv;
        for (b, c) in nonce.iter_mut().zip(counter.to_be_bytes()) {
            *b ^= c;
        }
        nonce
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> CryptoContext {
        CryptoContext::new([0x42u8; 16], [0x17u8; 12])
    }

    #[test]
    fn test_roundtrip() {
        let sender = test_context();
        let receiver = test_context();

        let plaintext = b"handshake: session parameters";
        let sealed = sender.encrypt(plaintext, b"").unwrap();
        let opened = receiver.decrypt(&sealed, b"").unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_roundtrip_with_aad() {
        let sender = test_context();
        let receiver = test_context();

        let sealed = sender.encrypt(b"payload", b"header").unwrap();
        assert_eq!(receiver.decrypt(&sealed, b"header").unwrap(), b"payload");

        // Same packet with different associated data must fail closed.
        assert!(matches!(
            receiver.decrypt(&sealed, b"other"),
            Err(NetworkError::Crypto)
        ));
    }

    #[test]
    fn test_corruption_fails_closed_at_every_position() {
        let sender = test_context();
        let receiver = test_context();

        let sealed = sender.encrypt(b"some message body", b"").unwrap();
        for i in 0..sealed.len() {
            let mut corrupted = sealed.clone();
            corrupted[i] ^= 0x01;
            assert!(
                receiver.decrypt(&corrupted, b"").is_err(),
                "corruption at byte {} must be rejected",
                i
            );
        }
    }

    #[test]
    fn test_mismatched_key_fails_closed() {
        let sender = test_context();
        let other = CryptoContext::new([0x43u8; 16], [0x17u8; 12]);

        let sealed = sender.encrypt(b"secret", b"").unwrap();
        assert!(other.decrypt(&sealed, b"").is_err());
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let receiver = test_context();
        assert!(receiver.decrypt(&[], b"").is_err());
        assert!(receiver.decrypt(&[0u8; COUNTER_SIZE + TAG_SIZE - 1], b"").is_err());
    }

    #[test]
    fn test_counter_increments_per_packet() {
        let sender = test_context();
        let a = sender.encrypt(b"same", b"").unwrap();
        let b = sender.encrypt(b"same", b"").unwrap();
        assert_eq!(u32::from_be_bytes([a[0], a[1], a[2], a[3]]), 0);
        assert_eq!(u32::from_be_bytes([b[0], b[1], b[2], b[3]]), 1);
        assert_ne!(a[4..], b[4..]);
    }

    #[test]
    fn test_counter_exhaustion_is_fatal() {
        let sender = test_context();
        sender
            .counter
            .store(u32::MAX as u64, Ordering::Relaxed);
        assert!(matches!(
            sender.encrypt(b"x", b""),
            Err(NetworkError::NonceExhausted)
        ));
        // And it stays exhausted; the counter is never reset.
        assert!(sender.encrypt(b"x", b"").is_err());
    }

    #[test]
    fn test_derived_contexts_agree() {
        let secret = [0x99u8; 32];
        let client = CryptoContext::derive_for_peer(&secret, 0x1234, true);
        let server = CryptoContext::derive_for_peer(&secret, 0x1234, true);
        let sealed = client.encrypt(b"derived", b"").unwrap();
        assert_eq!(server.decrypt(&sealed, b"").unwrap(), b"derived");

        // Opposite direction derives a distinct key.
        let reverse = CryptoContext::derive_for_peer(&secret, 0x1234, false);
        assert!(reverse.decrypt(&sealed, b"").is_err());
    }
}
