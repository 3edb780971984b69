//! Protocol state-machine framework
//!
//! A protocol is a self-contained asynchronous task driven by the manager's
//! tick loop: `setup` once when started, `update` once per tick, and
//! `notify_event` for every event the transport produced. Termination is
//! cooperative: a protocol calls [`ProtocolCtx::request_terminate`] and the
//! manager removes it at the next tick boundary, never mid-dispatch.

use super::error::NetworkError;
use super::event::Event;
use super::transport::{Transport, TransportAddress};

/// Deadlines further in the future than this are treated as clock drift
/// (a monotonic source has been observed jumping backwards by about an hour)
/// and the timer fires so it can be re-scheduled from the current reading.
pub const CLOCK_DRIFT_LIMIT_MS: u64 = 30 * 60 * 1000;

/// Per-call context handed to protocol callbacks.
///
/// Exposes the shared monotonic clock, the transport primitives a protocol
/// may use, and the termination request channel. Protocols never touch the
/// peer registry through this; registry mutation is the manager's alone.
pub struct ProtocolCtx<'a> {
    pub now_ms: u64,
    transport: &'a mut dyn Transport,
    terminate: &'a mut bool,
}

impl<'a> ProtocolCtx<'a> {
    pub(crate) fn new(
        now_ms: u64,
        transport: &'a mut dyn Transport,
        terminate: &'a mut bool,
    ) -> Self {
        Self {
            now_ms,
            transport,
            terminate,
        }
    }

    /// Ask the manager to drop this protocol at the next tick boundary.
    pub fn request_terminate(&mut self) {
        *self.terminate = true;
    }

    /// Request an outbound connection. Success is not synchronous; it shows
    /// up later as a `Connected` event.
    pub fn connect(&mut self, addr: TransportAddress) -> Result<(), NetworkError> {
        self.transport.connect(addr)
    }

    pub fn is_connected_to(&self, addr: TransportAddress) -> bool {
        self.transport.is_connected_to(addr)
    }

    pub fn send(
        &mut self,
        addr: TransportAddress,
        payload: &[u8],
        reliable: bool,
    ) -> Result<(), NetworkError> {
        self.transport.send(addr, payload, reliable)
    }
}

/// The capability set every network task implements.
///
/// `update` and `notify_event` must return promptly; anything slow runs on a
/// spawned task whose completion is observed on a later tick.
pub trait Protocol: Send {
    fn name(&self) -> &'static str;

    /// Validate configuration. Unmet preconditions fail fast by requesting
    /// termination here; the protocol then never joins the dispatch set.
    fn setup(&mut self, ctx: &mut ProtocolCtx);

    fn update(&mut self, ctx: &mut ProtocolCtx);

    /// Called for every event regardless of relevance; implementations match
    /// on the sender address and cheaply discard the rest.
    fn notify_event(&mut self, event: &Event, ctx: &mut ProtocolCtx);
}

/// Shared deadline logic so every protocol paces retries the same way.
///
/// A fresh timer is already expired, so the first attempt happens on the
/// first tick. Scheduling is always relative to the tick clock the manager
/// provides.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
    due_ms: Option<u64>,
}

impl RetryTimer {
    pub fn new() -> Self {
        Self { due_ms: None }
    }

    pub fn schedule(&mut self, now_ms: u64, interval_ms: u64) {
        self.due_ms = Some(now_ms + interval_ms);
    }

    /// Whether the deadline has passed. A deadline implausibly far in the
    /// future means the clock jumped backwards; the timer fires so the owner
    /// re-normalizes by scheduling again from the current reading.
    pub fn expired(&self, now_ms: u64) -> bool {
        match self.due_ms {
            None => true,
            Some(due) => now_ms >= due || due - now_ms > CLOCK_DRIFT_LIMIT_MS,
        }
    }
}

impl Default for RetryTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_timer_is_expired() {
        let timer = RetryTimer::new();
        assert!(timer.expired(0));
        assert!(timer.expired(123_456));
    }

    #[test]
    fn test_schedule_and_expiry() {
        let mut timer = RetryTimer::new();
        timer.schedule(1_000, 5_000);
        assert!(!timer.expired(1_000));
        assert!(!timer.expired(5_999));
        assert!(timer.expired(6_000));
        assert!(timer.expired(10_000));
    }

    #[test]
    fn test_backward_clock_jump_renormalizes() {
        let mut timer = RetryTimer::new();
        // Scheduled while the clock read one hour ahead, then the clock
        // "loses" that hour.
        let one_hour = 60 * 60 * 1000;
        timer.schedule(one_hour + 10_000, 5_000);
        assert!(timer.expired(10_000));

        // Re-scheduling from the new reading behaves normally again.
        timer.schedule(10_000, 5_000);
        assert!(!timer.expired(12_000));
        assert!(timer.expired(15_000));
    }
}
