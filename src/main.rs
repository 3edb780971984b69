//! pitlane - Client-side network bootstrap for a kart-racing game

use std::net::SocketAddrV4;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pitlane::network::protocols::{GetPublicAddress, ShowPublicAddress};
use pitlane::network::{NetworkError, NetworkManager, Transport, TransportAddress, TransportEvent};
use pitlane::{LobbyCredentials, NetworkConfig};

#[derive(Parser)]
#[command(name = "pitlane")]
#[command(about = "Client-side network bootstrap for a kart-racing game")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover this machine's public address
    Discover {
        /// Discovery server (host:port), may be given multiple times
        #[arg(short, long)]
        server: Vec<String>,

        /// Give up after this many binding requests
        #[arg(long, default_value = "5")]
        attempts: u32,
    },

    /// Register this machine with the lobby so other players can find it
    Register {
        /// Lobby registration endpoint
        #[arg(short, long)]
        endpoint: String,

        /// Lobby account name
        #[arg(short, long)]
        username: String,

        /// Lobby account password
        #[arg(short, long, env = "PITLANE_LOBBY_PASSWORD")]
        password: String,

        /// Public address (IP:PORT); discovered automatically when omitted
        #[arg(short, long)]
        address: Option<SocketAddrV4>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Transport for flows that never touch a game server (discovery and lobby
/// registration run on their own sockets).
struct OfflineTransport;

impl Transport for OfflineTransport {
    fn connect(&mut self, _addr: TransportAddress) -> Result<(), NetworkError> {
        Err(NetworkError::Setup("no game transport attached"))
    }
    fn disconnect(&mut self, _addr: TransportAddress) {}
    fn send(
        &mut self,
        _addr: TransportAddress,
        _payload: &[u8],
        _reliable: bool,
    ) -> Result<(), NetworkError> {
        Err(NetworkError::Setup("no game transport attached"))
    }
    fn poll(&mut self) -> Option<TransportEvent> {
        None
    }
    fn is_connected_to(&self, _addr: TransportAddress) -> bool {
        false
    }
}

/// Drive the manager until every protocol has finished.
async fn run_to_completion(manager: &mut NetworkManager) {
    while manager.active_protocols() > 0 {
        manager.tick();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn run_discover(servers: Vec<String>, attempts: u32) -> Result<TransportAddress> {
    let servers = if servers.is_empty() {
        NetworkConfig::default().stun_servers
    } else {
        servers
    };

    let protocol = GetPublicAddress::new(servers).with_max_attempts(attempts);
    let result = protocol.result();

    let mut manager = NetworkManager::new(Box::new(OfflineTransport));
    manager.start_protocol(Box::new(protocol));
    run_to_completion(&mut manager).await;

    let discovered = *result.lock();
    discovered.ok_or_else(|| anyhow::anyhow!("Public address discovery failed"))
}

async fn run_register(
    endpoint: String,
    credentials: LobbyCredentials,
    address: Option<SocketAddrV4>,
) -> Result<()> {
    let public_addr = match address {
        Some(addr) => addr.into(),
        None => {
            info!("No public address given, discovering it first");
            run_discover(Vec::new(), 5).await?
        }
    };

    let protocol = ShowPublicAddress::new(endpoint, credentials, public_addr);
    let outcome = protocol.outcome();

    let mut manager = NetworkManager::new(Box::new(OfflineTransport));
    manager.start_protocol(Box::new(protocol));

    // The registration pauses instead of terminating when the lobby rejects
    // the credentials; there is no way to correct them mid-run here, so a
    // quiet loop means failure.
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while manager.active_protocols() > 0 {
        manager.tick();
        if std::time::Instant::now() > deadline {
            anyhow::bail!("Lobby registration did not complete; check the credentials");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    if !outcome.load(std::sync::atomic::Ordering::SeqCst) {
        anyhow::bail!("Lobby registration failed");
    }
    println!("Registered {} with the lobby.", public_addr);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Discover { server, attempts } => {
            let addr = run_discover(server, attempts).await?;
            println!("Public address: {}", addr);
        }
        Commands::Register {
            endpoint,
            username,
            password,
            address,
        } => {
            run_register(endpoint, LobbyCredentials { username, password }, address).await?;
        }
    }

    Ok(())
}
