//! pitlane - Client-side network bootstrap for a kart-racing game
//!
//! This library brings a game client online: it discovers the machine's
//! public address, registers it with the lobby, connects to a game server
//! and synchronises the local clock with it, all driven by a cooperative
//! protocol tick loop.

pub mod config;
pub mod network;

pub use config::{LobbyCredentials, NetworkConfig};
pub use network::{NetworkManager, Protocol, Transport, TransportAddress};
