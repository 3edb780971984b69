//! Typed network events
//!
//! A raw transport notification is wrapped into an [`Event`] once per poll,
//! dispatched to every running protocol, then discarded. Events are never
//! retained past one dispatch cycle.

use std::sync::Arc;

use super::peer::Peer;
use super::transport::{TransportAddress, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    Disconnected,
    Message,
}

/// Immutable snapshot of one transport occurrence.
pub struct Event {
    pub kind: EventKind,
    pub peer: Arc<Peer>,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(raw: TransportEvent, peer: Arc<Peer>) -> Self {
        match raw {
            TransportEvent::Connected(_) => Self {
                kind: EventKind::Connected,
                peer,
                payload: Vec::new(),
            },
            TransportEvent::Disconnected(_) => Self {
                kind: EventKind::Disconnected,
                peer,
                payload: Vec::new(),
            },
            TransportEvent::Data { payload, .. } => Self {
                kind: EventKind::Message,
                peer,
                payload,
            },
        }
    }

    /// Address of the remote endpoint that produced this event. Protocols use
    /// this to cheaply discard events they don't care about.
    pub fn address(&self) -> TransportAddress {
        self.peer.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::peer::PeerHandle;

    #[test]
    fn test_event_from_raw() {
        let addr = TransportAddress::new(0x7F000001, 2759);
        let peer = Arc::new(Peer::new(addr, PeerHandle(0)));

        let ev = Event::new(TransportEvent::Connected(addr), peer.clone());
        assert_eq!(ev.kind, EventKind::Connected);
        assert!(ev.payload.is_empty());
        assert_eq!(ev.address(), addr);

        let ev = Event::new(
            TransportEvent::Data {
                from: addr,
                payload: vec![1, 2, 3],
            },
            peer,
        );
        assert_eq!(ev.kind, EventKind::Message);
        assert_eq!(ev.payload, vec![1, 2, 3]);
    }
}
