//! Connection establishment with a paced retry loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::network::event::{Event, EventKind};
use crate::network::protocol::{Protocol, ProtocolCtx, RetryTimer};
use crate::network::transport::TransportAddress;

/// Default pause between connection attempts.
pub const CONNECT_RETRY_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Done,
}

/// Connects to a game server, retrying until the transport reports the
/// connection.
///
/// The primary success path is a `Connected` event matching the target; the
/// `is_connected_to` poll after each attempt is a fallback for transports
/// that connect without a distinct event. Every instance owns its retry
/// timer, so concurrent attempts to different servers pace independently.
pub struct ConnectToServer {
    server: TransportAddress,
    state: State,
    retry: RetryTimer,
    retry_interval_ms: u64,
    connected: Arc<AtomicBool>,
}

impl ConnectToServer {
    pub fn new(server: TransportAddress) -> Self {
        Self {
            server,
            state: State::Waiting,
            retry: RetryTimer::new(),
            retry_interval_ms: CONNECT_RETRY_INTERVAL_MS,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_retry_interval(mut self, interval_ms: u64) -> Self {
        self.retry_interval_ms = interval_ms;
        self
    }

    /// Flag the creator can watch; flips to true exactly when the protocol
    /// reaches its goal.
    pub fn outcome(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    fn done(&mut self, ctx: &mut ProtocolCtx) {
        if self.state == State::Done {
            return;
        }
        self.state = State::Done;
        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to server {}", self.server);
        ctx.request_terminate();
    }
}

impl Protocol for ConnectToServer {
    fn name(&self) -> &'static str {
        "connect-to-server"
    }

    fn setup(&mut self, ctx: &mut ProtocolCtx) {
        if self.server.is_unset() {
            warn!("No server address configured, aborting connection attempt");
            ctx.request_terminate();
        }
    }

    fn update(&mut self, ctx: &mut ProtocolCtx) {
        if self.state != State::Waiting || !self.retry.expired(ctx.now_ms) {
            return;
        }

        if let Err(e) = ctx.connect(self.server) {
            warn!("Connect request to {} failed: {}", self.server, e);
        }
        if ctx.is_connected_to(self.server) {
            self.done(ctx);
            return;
        }

        self.retry.schedule(ctx.now_ms, self.retry_interval_ms);
        info!(
            "Not yet connected to {}, retrying in {} seconds",
            self.server,
            self.retry_interval_ms / 1000
        );
    }

    fn notify_event(&mut self, event: &Event, ctx: &mut ProtocolCtx) {
        if event.kind != EventKind::Connected || event.address() != self.server {
            debug!("Ignoring unrelated event from {}", event.address());
            return;
        }
        self.done(ctx);
    }
}
