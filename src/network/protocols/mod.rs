//! Concrete bootstrap protocols

mod connect_to_server;
mod get_public_address;
mod show_public_address;
mod timer_sync;

pub use connect_to_server::{ConnectToServer, CONNECT_RETRY_INTERVAL_MS};
pub use get_public_address::{DiscoveredAddress, GetPublicAddress};
pub use show_public_address::{RegistrationRequest, ShowPublicAddress};
pub use timer_sync::{NetworkTimerSynchronizer, TIME_SYNC_SAMPLE_CAPACITY};
