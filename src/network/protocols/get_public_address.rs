//! Public address discovery through a STUN-style binding exchange
//!
//! Sends a fixed 20-byte binding request over a dedicated ephemeral UDP
//! socket to a helper server picked at random from the configured list, and
//! extracts the mapped address the server saw. The exchange deliberately
//! bypasses the game transport: the point is to learn what this machine
//! looks like from outside the NAT.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::network::event::Event;
use crate::network::protocol::{Protocol, ProtocolCtx, RetryTimer};
use crate::network::transport::{TransportAddress, UdpProbe};

/// STUN message types
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;

/// STUN magic cookie (RFC 5389)
const MAGIC_COOKIE: [u8; 4] = [0x21, 0x12, 0xA4, 0x42];

/// Mapped-address attribute types accepted in responses
const MAPPED_ADDRESS_TYPES: [u16; 2] = [0x0000, 0x0001];

/// STUN header length; attributes follow
const HEADER_SIZE: usize = 20;

const DEFAULT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Slot the discovered public address is written into on success.
pub type DiscoveredAddress = Arc<Mutex<Option<TransportAddress>>>;

/// How a response was rejected. A mismatch means the datagram was not the
/// answer to our transaction (wrong cookie or id) and another attempt is
/// worthwhile; malformed content means the server answered our transaction
/// with garbage.
#[derive(Debug)]
enum ResponseError {
    Mismatch(String),
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    RequestSent,
}

pub struct GetPublicAddress {
    servers: Vec<String>,
    resolved: Vec<SocketAddr>,
    state: State,
    probe: Option<UdpProbe>,
    transaction_id: [u8; 12],
    timeout: RetryTimer,
    timeout_ms: u64,
    attempts: u32,
    max_attempts: u32,
    result: DiscoveredAddress,
}

impl GetPublicAddress {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            resolved: Vec::new(),
            state: State::Idle,
            probe: None,
            transaction_id: [0; 12],
            timeout: RetryTimer::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            result: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Slot the caller watches for the discovered address.
    pub fn result(&self) -> DiscoveredAddress {
        self.result.clone()
    }

    fn send_request(&mut self, ctx: &mut ProtocolCtx) {
        let server = {
            let mut rng = rand::thread_rng();
            *self
                .resolved
                .choose(&mut rng)
                .expect("setup guarantees at least one resolved server")
        };

        let probe = match UdpProbe::bind() {
            Ok(probe) => probe,
            Err(e) => {
                warn!("Could not open discovery socket: {}", e);
                self.attempts += 1;
                return;
            }
        };

        rand::thread_rng().fill(&mut self.transaction_id);
        let request = build_binding_request(&self.transaction_id);

        debug!("Sending binding request to {}", server);
        if let Err(e) = probe.send_to(&request, server) {
            warn!("Binding request to {} failed: {}", server, e);
            self.attempts += 1;
            return;
        }

        self.probe = Some(probe);
        self.state = State::RequestSent;
        self.attempts += 1;
        self.timeout.schedule(ctx.now_ms, self.timeout_ms);
    }

    fn reset_for_retry(&mut self) {
        self.probe = None;
        self.state = State::Idle;
    }

    fn poll_response(&mut self, ctx: &mut ProtocolCtx) {
        let Some(probe) = &self.probe else { return };

        match probe.try_recv_from() {
            Ok(Some((data, from))) => {
                match parse_binding_response(&data, &self.transaction_id) {
                    Ok(mapped) => {
                        info!("Discovered public address {} (via {})", mapped, from);
                        *self.result.lock() = Some(mapped);
                        ctx.request_terminate();
                    }
                    Err(ResponseError::Mismatch(reason)) => {
                        warn!("Rejected binding response from {}: {}", from, reason);
                        self.reset_for_retry();
                    }
                    Err(ResponseError::Malformed(reason)) => {
                        // The server answered our transaction with garbage;
                        // asking it again is pointless.
                        warn!("Malformed binding response from {}: {}", from, reason);
                        ctx.request_terminate();
                    }
                }
            }
            Ok(None) => {
                if self.timeout.expired(ctx.now_ms) {
                    debug!("Binding request timed out, retrying");
                    self.reset_for_retry();
                }
            }
            Err(e) => {
                warn!("Discovery socket error: {}", e);
                self.reset_for_retry();
            }
        }
    }
}

impl Protocol for GetPublicAddress {
    fn name(&self) -> &'static str {
        "get-public-address"
    }

    fn setup(&mut self, ctx: &mut ProtocolCtx) {
        if self.servers.is_empty() {
            warn!("No discovery servers configured");
            ctx.request_terminate();
            return;
        }

        // Resolve the configured hostnames once, up front, so the per-tick
        // path never blocks on DNS.
        for server in &self.servers {
            match server.to_socket_addrs() {
                Ok(addrs) => self.resolved.extend(addrs.filter(|a| a.is_ipv4())),
                Err(e) => warn!("Could not resolve discovery server {}: {}", server, e),
            }
        }
        if self.resolved.is_empty() {
            warn!("No discovery server resolved to an IPv4 address");
            ctx.request_terminate();
        }
    }

    fn update(&mut self, ctx: &mut ProtocolCtx) {
        match self.state {
            State::Idle => {
                if self.attempts >= self.max_attempts {
                    warn!(
                        "Public address discovery gave up after {} attempts",
                        self.attempts
                    );
                    ctx.request_terminate();
                    return;
                }
                self.send_request(ctx);
            }
            State::RequestSent => self.poll_response(ctx),
        }
    }

    fn notify_event(&mut self, _event: &Event, _ctx: &mut ProtocolCtx) {
        // The exchange runs on its own socket; game transport events are
        // irrelevant here.
    }
}

/// Build the fixed 20-byte binding request: message type, zero attribute
/// length, magic cookie, random transaction id.
fn build_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(HEADER_SIZE);
    msg.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&MAGIC_COOKIE);
    msg.extend_from_slice(transaction_id);
    msg
}

/// Validate a binding response and extract the IPv4 mapped address.
fn parse_binding_response(
    data: &[u8],
    expected_txn_id: &[u8; 12],
) -> Result<TransportAddress, ResponseError> {
    if data.len() < HEADER_SIZE {
        return Err(ResponseError::Mismatch(format!(
            "response too short ({} bytes)",
            data.len()
        )));
    }

    let msg_type = u16::from_be_bytes([data[0], data[1]]);
    if msg_type != BINDING_RESPONSE {
        return Err(ResponseError::Mismatch(format!(
            "unexpected message type 0x{:04x}",
            msg_type
        )));
    }
    if data[4..8] != MAGIC_COOKIE {
        return Err(ResponseError::Mismatch("magic cookie mismatch".into()));
    }
    if &data[8..HEADER_SIZE] != expected_txn_id {
        return Err(ResponseError::Mismatch("transaction id mismatch".into()));
    }

    // Header checks passed: from here on the response is ours, and content
    // problems are hard parse errors rather than retry conditions.
    let attr_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if attr_len == 0 {
        return Err(ResponseError::Malformed("empty attribute block".into()));
    }
    if data.len() < HEADER_SIZE + attr_len {
        return Err(ResponseError::Malformed(format!(
            "attribute block truncated ({} of {} bytes)",
            data.len() - HEADER_SIZE,
            attr_len
        )));
    }

    let end = HEADER_SIZE + attr_len;
    let mut offset = HEADER_SIZE;
    while offset < end {
        if offset + 4 > end {
            return Err(ResponseError::Malformed("truncated attribute header".into()));
        }
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let value_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        if offset + 4 + value_len > end {
            return Err(ResponseError::Malformed("truncated attribute value".into()));
        }
        let value = &data[offset + 4..offset + 4 + value_len];

        if MAPPED_ADDRESS_TYPES.contains(&attr_type) {
            return parse_mapped_address(value);
        }

        // Values are padded to a 4-byte boundary.
        offset += 4 + ((value_len + 3) & !3);
    }

    Err(ResponseError::Malformed(
        "no mapped-address attribute in response".into(),
    ))
}

/// Mapped-address value: reserved byte, family, port, then the address.
fn parse_mapped_address(value: &[u8]) -> Result<TransportAddress, ResponseError> {
    if value.len() < 8 {
        return Err(ResponseError::Malformed("mapped-address too short".into()));
    }
    let family = value[1];
    if family != 0x01 {
        return Err(ResponseError::Malformed(format!(
            "unsupported address family 0x{:02x}",
            family
        )));
    }
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
    Ok(TransportAddress::new(ip, port))
}
