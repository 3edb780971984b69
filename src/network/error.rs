//! Network error types

use thiserror::Error;

/// Errors that can occur in the network bootstrap subsystem
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A protocol precondition was not met at setup time (missing target
    /// address, credentials, ...). Fatal to the protocol instance.
    #[error("Setup failed: {0}")]
    Setup(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("STUN request timed out")]
    StunTimeout,

    /// The STUN response was well-formed at the header level but violated
    /// the protocol in content (bad cookie, transaction id, truncated
    /// attributes). Rejects the single message, never the session.
    #[error("STUN protocol violation: {0}")]
    StunProtocol(String),

    #[error("All STUN attempts exhausted")]
    StunExhausted,

    /// AEAD authentication failure. Deliberately carries no detail: the
    /// rejection reason is never surfaced to the user.
    #[error("Packet authentication failed")]
    Crypto,

    /// The packet counter for a derived key would wrap, which would reuse
    /// a nonce. Protocol-fatal for the session.
    #[error("Packet counter exhausted for this key")]
    NonceExhausted,

    /// The lobby rejected the supplied credentials.
    #[error("Lobby rejected registration")]
    LobbyRejected,

    #[error("Lobby unreachable: {0}")]
    LobbyUnavailable(String),

    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
}
