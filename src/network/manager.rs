//! Network manager: owns the transport, the peer registry, and the running
//! protocols, and drives the poll → dispatch → update → sweep loop.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::error::NetworkError;
use super::event::Event;
use super::peer::{Peer, PeerHandle};
use super::protocol::{Protocol, ProtocolCtx};
use super::transport::{Transport, TransportAddress, TransportEvent};

/// Upper bound on raw notifications drained per tick, so a flood of traffic
/// cannot starve protocol updates.
pub const MAX_EVENTS_PER_TICK: usize = 32;

struct ProtocolSlot {
    protocol: Box<dyn Protocol>,
    terminated: bool,
}

pub struct NetworkManager {
    transport: Box<dyn Transport>,
    peers: HashMap<TransportAddress, Arc<Peer>>,
    protocols: Vec<ProtocolSlot>,
    next_handle: u64,
    anchor: Instant,
}

impl NetworkManager {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            peers: HashMap::new(),
            protocols: Vec::new(),
            next_handle: 0,
            anchor: Instant::now(),
        }
    }

    /// Register a protocol and run its `setup`. A protocol whose setup
    /// requests termination never receives events or updates; it is swept on
    /// the next tick boundary.
    pub fn start_protocol(&mut self, mut protocol: Box<dyn Protocol>) {
        let mut terminated = false;
        let now_ms = self.now_ms();
        let mut ctx = ProtocolCtx::new(now_ms, self.transport.as_mut(), &mut terminated);
        protocol.setup(&mut ctx);

        if terminated {
            warn!("Protocol {} failed setup, not started", protocol.name());
        } else {
            debug!("Protocol {} started", protocol.name());
        }
        self.protocols.push(ProtocolSlot {
            protocol,
            terminated,
        });
    }

    /// Number of protocols still in the dispatch set.
    pub fn active_protocols(&self) -> usize {
        self.protocols.iter().filter(|s| !s.terminated).count()
    }

    /// Thin request to the transport; also reserves the peer record so the
    /// later `Connected` event maps onto it.
    pub fn connect(&mut self, addr: TransportAddress) -> Result<(), NetworkError> {
        self.ensure_peer(addr);
        self.transport.connect(addr)
    }

    pub fn is_connected_to(&self, addr: TransportAddress) -> bool {
        self.transport.is_connected_to(addr)
    }

    pub fn peer(&self, addr: TransportAddress) -> Option<Arc<Peer>> {
        self.peers.get(&addr).cloned()
    }

    /// Advance the loop using the real monotonic clock.
    pub fn tick(&mut self) {
        let now_ms = self.now_ms();
        self.tick_at(now_ms);
    }

    /// One full tick at an explicit clock reading: drain a bounded batch of
    /// transport notifications into events, dispatch each event to every
    /// active protocol in arrival order, update every active protocol, then
    /// sweep termination requests. Sweeping only here keeps in-flight
    /// callbacks off half-destroyed protocols.
    pub fn tick_at(&mut self, now_ms: u64) {
        let events = self.drain_transport();

        for event in &events {
            self.dispatch(now_ms, |proto, ctx| proto.notify_event(event, ctx));
        }

        self.dispatch(now_ms, |proto, ctx| proto.update(ctx));

        self.protocols.retain(|slot| {
            if slot.terminated {
                debug!("Protocol {} terminated", slot.protocol.name());
            }
            !slot.terminated
        });
    }

    fn now_ms(&self) -> u64 {
        self.anchor.elapsed().as_millis() as u64
    }

    /// Poll at most [`MAX_EVENTS_PER_TICK`] raw notifications, wrapping each
    /// into an [`Event`] and keeping the registry in step: peers are created
    /// on first contact and dropped on disconnect. Nothing else mutates the
    /// registry.
    fn drain_transport(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while events.len() < MAX_EVENTS_PER_TICK {
            let Some(raw) = self.transport.poll() else {
                break;
            };
            let addr = raw.address();
            let peer = self.ensure_peer(addr);

            if matches!(raw, TransportEvent::Connected(_)) {
                info!("Peer {} connected", addr);
            }
            if matches!(raw, TransportEvent::Disconnected(_)) {
                info!("Peer {} disconnected", addr);
                self.peers.remove(&addr);
            }

            events.push(Event::new(raw, peer));
        }
        events
    }

    fn ensure_peer(&mut self, addr: TransportAddress) -> Arc<Peer> {
        if let Some(peer) = self.peers.get(&addr) {
            return peer.clone();
        }
        let handle = PeerHandle(self.next_handle);
        self.next_handle += 1;
        let peer = Arc::new(Peer::new(addr, handle));
        self.peers.insert(addr, peer.clone());
        peer
    }

    /// Run one callback on every active protocol, isolating panics: a
    /// misbehaving protocol is terminated and the tick continues.
    fn dispatch<F>(&mut self, now_ms: u64, mut call: F)
    where
        F: FnMut(&mut dyn Protocol, &mut ProtocolCtx),
    {
        let transport = self.transport.as_mut();
        for slot in &mut self.protocols {
            if slot.terminated {
                continue;
            }
            let mut terminated = false;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = ProtocolCtx::new(now_ms, &mut *transport, &mut terminated);
                call(slot.protocol.as_mut(), &mut ctx);
            }));
            if result.is_err() {
                error!(
                    "Protocol {} panicked; terminating it",
                    slot.protocol.name()
                );
                terminated = true;
            }
            if terminated {
                slot.terminated = true;
            }
        }
    }
}
