//! Lobby registration
//!
//! Publishes the discovered public address to the lobby service so other
//! players can find this host. The HTTP request runs on a spawned task and
//! its completion is observed on a later tick; the shared tick loop is never
//! blocked on the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::LobbyCredentials;
use crate::network::error::NetworkError;
use crate::network::event::Event;
use crate::network::protocol::{Protocol, ProtocolCtx, RetryTimer};
use crate::network::transport::TransportAddress;

/// Pause before re-sending a registration that failed at the transport level.
const REGISTER_RETRY_INTERVAL_MS: u64 = 5_000;

/// Reply prefixes the lobby uses instead of status codes.
const REPLY_SUCCESS: &str = "success";
const REPLY_FAIL: &str = "fail";

/// Parameters of one registration call.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub public_addr: TransportAddress,
}

type FetchReply = oneshot::Receiver<Result<String, NetworkError>>;
type Fetcher = Box<dyn Fn(RegistrationRequest) -> FetchReply + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    RequestPending,
    /// Registration was rejected; suspended until the credentials are
    /// corrected and [`ShowPublicAddress::resume`] is called.
    Paused,
    Done,
}

pub struct ShowPublicAddress {
    endpoint: String,
    credentials: LobbyCredentials,
    public_addr: TransportAddress,
    state: State,
    retry: RetryTimer,
    pending: Option<FetchReply>,
    fetch: Fetcher,
    registered: Arc<AtomicBool>,
}

impl ShowPublicAddress {
    /// Build with the real HTTP fetcher. Must be created inside a tokio
    /// runtime, since replies arrive on spawned tasks.
    pub fn new(
        endpoint: String,
        credentials: LobbyCredentials,
        public_addr: TransportAddress,
    ) -> Self {
        Self::with_fetcher(endpoint, credentials, public_addr, Box::new(http_fetch))
    }

    /// Seam for tests: inject replies without any HTTP traffic.
    pub fn with_fetcher(
        endpoint: String,
        credentials: LobbyCredentials,
        public_addr: TransportAddress,
        fetch: Fetcher,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            public_addr,
            state: State::Idle,
            retry: RetryTimer::new(),
            pending: None,
            fetch,
            registered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag the creator can watch; flips to true once the lobby accepted the
    /// registration.
    pub fn outcome(&self) -> Arc<AtomicBool> {
        self.registered.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.state == State::Paused
    }

    /// Leave the paused state, optionally with corrected credentials. The
    /// next tick re-sends the registration.
    pub fn resume(&mut self, credentials: Option<LobbyCredentials>) {
        if self.state != State::Paused {
            return;
        }
        if let Some(credentials) = credentials {
            self.credentials = credentials;
        }
        self.state = State::Idle;
        self.retry = RetryTimer::new();
    }

    fn begin_request(&mut self) {
        let request = RegistrationRequest {
            endpoint: self.endpoint.clone(),
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
            public_addr: self.public_addr,
        };
        info!(
            "Registering {} at {} with the lobby",
            self.credentials.username, self.public_addr
        );
        self.pending = Some((self.fetch)(request));
        self.state = State::RequestPending;
    }

    fn handle_reply(&mut self, reply: Result<String, NetworkError>, ctx: &mut ProtocolCtx) {
        match reply {
            Ok(body) if body.starts_with(REPLY_SUCCESS) => {
                info!("Lobby accepted the registration");
                self.state = State::Done;
                self.registered.store(true, Ordering::SeqCst);
                ctx.request_terminate();
            }
            Ok(body) if body.starts_with(REPLY_FAIL) => {
                error!("Lobby rejected the registration; please correct the credentials");
                self.state = State::Paused;
            }
            Ok(body) => {
                warn!(
                    "Unexpected lobby reply ({} bytes), retrying",
                    body.len()
                );
                self.schedule_retry(ctx.now_ms);
            }
            Err(e) => {
                warn!("Lobby unreachable: {}, retrying", e);
                self.schedule_retry(ctx.now_ms);
            }
        }
    }

    fn schedule_retry(&mut self, now_ms: u64) {
        self.state = State::Idle;
        self.retry.schedule(now_ms, REGISTER_RETRY_INTERVAL_MS);
    }
}

impl Protocol for ShowPublicAddress {
    fn name(&self) -> &'static str {
        "show-public-address"
    }

    fn setup(&mut self, ctx: &mut ProtocolCtx) {
        if self.endpoint.is_empty() {
            warn!("No lobby endpoint configured");
            ctx.request_terminate();
            return;
        }
        if self.credentials.username.is_empty() || self.credentials.password.is_empty() {
            warn!("Lobby credentials missing");
            ctx.request_terminate();
            return;
        }
        if self.public_addr.is_unset() {
            warn!("No public address to register");
            ctx.request_terminate();
        }
    }

    fn update(&mut self, ctx: &mut ProtocolCtx) {
        match self.state {
            State::Idle => {
                if self.retry.expired(ctx.now_ms) {
                    self.begin_request();
                }
            }
            State::RequestPending => {
                let Some(pending) = &mut self.pending else {
                    self.schedule_retry(ctx.now_ms);
                    return;
                };
                match pending.try_recv() {
                    Ok(reply) => {
                        self.pending = None;
                        self.handle_reply(reply, ctx);
                    }
                    Err(oneshot::error::TryRecvError::Empty) => {
                        debug!("Registration still in flight");
                    }
                    Err(oneshot::error::TryRecvError::Closed) => {
                        warn!("Registration task dropped its reply, retrying");
                        self.pending = None;
                        self.schedule_retry(ctx.now_ms);
                    }
                }
            }
            State::Paused | State::Done => {}
        }
    }

    fn notify_event(&mut self, _event: &Event, _ctx: &mut ProtocolCtx) {
        // Registration talks to the lobby over HTTP; transport events carry
        // nothing for it.
    }
}

/// Real fetcher: a GET against the lobby endpoint with the registration
/// parameters in the query string, reply body forwarded through a oneshot.
fn http_fetch(request: RegistrationRequest) -> FetchReply {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let url = format!(
            "{}?nick={}&ip={}&port={}&pwd={}",
            request.endpoint,
            request.username,
            request.public_addr.ip,
            request.public_addr.port,
            request.password,
        );
        let reply = async {
            let response = reqwest::get(&url)
                .await
                .map_err(|e| NetworkError::LobbyUnavailable(e.to_string()))?;
            response
                .text()
                .await
                .map_err(|e| NetworkError::LobbyUnavailable(e.to_string()))
        }
        .await;
        // The receiver may be gone if the protocol terminated meanwhile.
        let _ = tx.send(reply);
    });
    rx
}
