//! Logical clock convergence with the game server
//!
//! Collects `(ping, server time, local receive time)` samples and accepts the
//! server clock once a window of samples agrees with the freshest estimate
//! within the configured tolerance. One-way latency is approximated as half
//! the round-trip time.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::network::event::{Event, EventKind};
use crate::network::protocol::{Protocol, ProtocolCtx, CLOCK_DRIFT_LIMIT_MS};
use crate::network::transport::TransportAddress;

/// Samples accumulated before an acceptance check.
pub const TIME_SYNC_SAMPLE_CAPACITY: usize = 20;

/// First payload byte of a time-sync message from the server.
const TIME_SYNC_MESSAGE: u8 = 0x54;

/// Wire size: tag, ping u32, server time u64.
const TIME_SYNC_MESSAGE_LEN: usize = 13;

#[derive(Debug, Clone, Copy)]
struct Sample {
    ping: u32,
    server_time: u64,
    received_ms: u64,
}

impl Sample {
    /// What the server's clock would read now, extrapolated from this sample.
    fn server_now(&self, now_ms: u64) -> u64 {
        self.server_time + (self.ping as u64) / 2 + (now_ms - self.received_ms)
    }
}

pub struct NetworkTimerSynchronizer {
    server: TransportAddress,
    tolerance_ms: u64,
    server_tick_period_ms: u64,
    samples: VecDeque<Sample>,
    last_sample_ms: Option<u64>,
    synchronised: bool,
    force_set: bool,
    /// Accepted difference between the server clock and the local tick clock.
    offset_ms: i64,
}

impl NetworkTimerSynchronizer {
    pub fn new(server: TransportAddress, tolerance_ms: u64, server_tick_period_ms: u64) -> Self {
        Self {
            server,
            tolerance_ms,
            server_tick_period_ms,
            samples: VecDeque::with_capacity(TIME_SYNC_SAMPLE_CAPACITY),
            last_sample_ms: None,
            synchronised: false,
            force_set: false,
            offset_ms: 0,
        }
    }

    pub fn is_synchronised(&self) -> bool {
        self.synchronised
    }

    /// The server's clock as currently estimated, once synchronised.
    pub fn server_time_now(&self, now_ms: u64) -> Option<u64> {
        self.synchronised
            .then(|| (now_ms as i64 + self.offset_ms) as u64)
    }

    /// Apply the next sample immediately, without averaging. Used on
    /// reconnect, when the old offset is known stale.
    pub fn enable_force_set(&mut self) {
        self.force_set = true;
    }

    /// Feed one sample. Converges the clock when a full window of estimates
    /// agrees within tolerance; otherwise discards the oldest half and keeps
    /// sampling. No-op once synchronised (unless force-set is armed).
    pub fn add_and_set_time(&mut self, ping: u32, server_time: u64, now_ms: u64) {
        if self.synchronised && !self.force_set {
            return;
        }

        if self.force_set {
            self.accept(server_time + (ping as u64) / 2, now_ms);
            self.force_set = false;
            info!("Clock force-set from a single sample");
            return;
        }

        // Retransmissions after packet loss can deliver near-identical
        // samples back to back; they would skew the average. A previous
        // timestamp implausibly far ahead of now means the clock jumped
        // backwards; that sample is stale, not recent.
        if let Some(last) = self.last_sample_ms {
            let stale = last.saturating_sub(now_ms) > CLOCK_DRIFT_LIMIT_MS;
            if !stale && now_ms.saturating_sub(last) < self.server_tick_period_ms / 2 {
                debug!("Dropping time sample arriving too soon after the last");
                return;
            }
        }
        self.last_sample_ms = Some(now_ms);

        self.samples.push_back(Sample {
            ping,
            server_time,
            received_ms: now_ms,
        });
        if self.samples.len() < TIME_SYNC_SAMPLE_CAPACITY {
            return;
        }

        let average: f64 = self
            .samples
            .iter()
            .map(|s| s.server_now(now_ms) as f64)
            .sum::<f64>()
            / self.samples.len() as f64;
        let fresh = server_time as f64 + (ping as f64) / 2.0;

        if (average - fresh).abs() <= self.tolerance_ms as f64 {
            self.accept(average as u64, now_ms);
            info!(
                "Clock synchronised, offset {} ms (ping {} ms)",
                self.offset_ms, ping
            );
        } else {
            // Early samples may have been noisy; keep the fresher half and
            // continue accumulating.
            let stale = self.samples.len() / 2;
            self.samples.drain(..stale);
            debug!(
                "Clock estimates {:.0} and {:.0} disagree beyond {} ms, resampling",
                average, fresh, self.tolerance_ms
            );
        }
    }

    fn accept(&mut self, server_now: u64, now_ms: u64) {
        self.offset_ms = server_now as i64 - now_ms as i64;
        self.synchronised = true;
        self.samples.clear();
    }
}

impl Protocol for NetworkTimerSynchronizer {
    fn name(&self) -> &'static str {
        "network-timer-sync"
    }

    fn setup(&mut self, ctx: &mut ProtocolCtx) {
        if self.server.is_unset() {
            warn!("No server to synchronise the clock with");
            ctx.request_terminate();
        }
    }

    fn update(&mut self, ctx: &mut ProtocolCtx) {
        if self.synchronised {
            ctx.request_terminate();
        }
    }

    fn notify_event(&mut self, event: &Event, ctx: &mut ProtocolCtx) {
        if event.kind != EventKind::Message || event.address() != self.server {
            return;
        }
        let payload = &event.payload;
        if payload.len() != TIME_SYNC_MESSAGE_LEN || payload[0] != TIME_SYNC_MESSAGE {
            return;
        }
        let ping = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
        let server_time = u64::from_be_bytes([
            payload[5], payload[6], payload[7], payload[8], payload[9], payload[10], payload[11],
            payload[12],
        ]);
        self.add_and_set_time(ping, server_time, ctx.now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE_MS: u64 = 10;
    const TICK_PERIOD_MS: u64 = 100;

    fn synchronizer() -> NetworkTimerSynchronizer {
        NetworkTimerSynchronizer::new(
            TransportAddress::new(0x7F000001, 2759),
            TOLERANCE_MS,
            TICK_PERIOD_MS,
        )
    }

    /// Feed consistent samples: constant offset, constant ping.
    fn feed_consistent(sync: &mut NetworkTimerSynchronizer, count: usize, offset: u64) {
        for i in 0..count {
            let now = (i as u64) * TICK_PERIOD_MS;
            sync.add_and_set_time(40, now + offset, now);
        }
    }

    #[test]
    fn test_consistent_samples_synchronise_exactly_once() {
        let mut sync = synchronizer();
        assert!(!sync.is_synchronised());

        feed_consistent(&mut sync, TIME_SYNC_SAMPLE_CAPACITY, 500_000);
        assert!(sync.is_synchronised());

        // Server ahead by the offset plus half the ping.
        let now = 5_000;
        let server = sync.server_time_now(now).unwrap();
        assert_eq!(server, now + 500_000 + 20);

        // Idempotent: wildly different samples after acceptance change nothing.
        sync.add_and_set_time(40, 9_999_999, 10_000);
        assert_eq!(sync.server_time_now(now).unwrap(), server);
    }

    #[test]
    fn test_disagreeing_samples_never_synchronise_and_stay_bounded() {
        let mut sync = synchronizer();
        // Server time drifts far faster than local time, so the averaged
        // estimate never agrees with the freshest one.
        for i in 0..200u64 {
            let now = i * TICK_PERIOD_MS;
            sync.add_and_set_time(40, now * 7, now);
            assert!(sync.samples.len() <= TIME_SYNC_SAMPLE_CAPACITY);
        }
        assert!(!sync.is_synchronised());
        assert_eq!(sync.server_time_now(0), None);
    }

    #[test]
    fn test_duplicate_burst_is_dropped() {
        let mut sync = synchronizer();
        // Two samples closer than half a tick period: only the first counts.
        sync.add_and_set_time(40, 1_000, 0);
        sync.add_and_set_time(40, 1_010, TICK_PERIOD_MS / 2 - 1);
        assert_eq!(sync.samples.len(), 1);

        sync.add_and_set_time(40, 1_100, TICK_PERIOD_MS);
        assert_eq!(sync.samples.len(), 2);
    }

    #[test]
    fn test_backward_clock_jump_does_not_suppress_sampling() {
        let mut sync = synchronizer();
        let one_hour = 60 * 60 * 1000;
        sync.add_and_set_time(40, 1_000, one_hour);
        assert_eq!(sync.samples.len(), 1);

        // The clock "loses" an hour. The previous sample timestamp is now in
        // the future; the next sample must still be counted instead of being
        // treated as a duplicate until the clock catches up.
        sync.add_and_set_time(40, 1_100, 1_000);
        assert_eq!(sync.samples.len(), 2);
    }

    #[test]
    fn test_noisy_prefix_recovers_after_halving() {
        let mut sync = synchronizer();
        // Ten wildly wrong samples, then consistent ones. The first full
        // window disagrees, the oldest half is dropped, and a later window
        // of consistent samples converges.
        for i in 0..10u64 {
            let now = i * TICK_PERIOD_MS;
            sync.add_and_set_time(40, 100_000_000 + now * 50, now);
        }
        for i in 10..60u64 {
            let now = i * TICK_PERIOD_MS;
            sync.add_and_set_time(40, now + 500_000, now);
            if sync.is_synchronised() {
                break;
            }
        }
        assert!(sync.is_synchronised());
    }

    #[test]
    fn test_force_set_applies_next_sample_immediately() {
        let mut sync = synchronizer();
        feed_consistent(&mut sync, TIME_SYNC_SAMPLE_CAPACITY, 500_000);
        assert!(sync.is_synchronised());

        // Reconnect: the server clock moved.
        sync.enable_force_set();
        sync.add_and_set_time(60, 900_000, 10_000);
        assert!(sync.is_synchronised());
        assert_eq!(sync.server_time_now(10_000).unwrap(), 900_000 + 30);
    }

    #[test]
    fn test_protocol_feeds_from_server_messages_only() {
        use crate::network::error::NetworkError;
        use crate::network::peer::{Peer, PeerHandle};
        use crate::network::transport::{Transport, TransportEvent};
        use std::sync::Arc;

        struct NullTransport;
        impl Transport for NullTransport {
            fn connect(&mut self, _addr: TransportAddress) -> Result<(), NetworkError> {
                Ok(())
            }
            fn disconnect(&mut self, _addr: TransportAddress) {}
            fn send(
                &mut self,
                _addr: TransportAddress,
                _payload: &[u8],
                _reliable: bool,
            ) -> Result<(), NetworkError> {
                Ok(())
            }
            fn poll(&mut self) -> Option<TransportEvent> {
                None
            }
            fn is_connected_to(&self, _addr: TransportAddress) -> bool {
                false
            }
        }

        fn message(ping: u32, server_time: u64) -> Vec<u8> {
            let mut payload = vec![TIME_SYNC_MESSAGE];
            payload.extend_from_slice(&ping.to_be_bytes());
            payload.extend_from_slice(&server_time.to_be_bytes());
            payload
        }

        let server = TransportAddress::new(0x7F000001, 2759);
        let stranger = TransportAddress::new(0x7F000001, 4444);
        let mut sync = NetworkTimerSynchronizer::new(server, TOLERANCE_MS, TICK_PERIOD_MS);
        let mut transport = NullTransport;

        // A stranger's message is discarded without sampling.
        let peer = Arc::new(Peer::new(stranger, PeerHandle(0)));
        let event = Event::new(
            TransportEvent::Data {
                from: stranger,
                payload: message(40, 1_000),
            },
            peer,
        );
        let mut terminated = false;
        let mut ctx = ProtocolCtx::new(0, &mut transport, &mut terminated);
        sync.notify_event(&event, &mut ctx);
        assert!(sync.samples.is_empty());

        // Messages from the server accumulate and eventually converge,
        // after which update() requests termination.
        let peer = Arc::new(Peer::new(server, PeerHandle(1)));
        for i in 0..TIME_SYNC_SAMPLE_CAPACITY as u64 {
            let now = i * TICK_PERIOD_MS;
            let event = Event::new(
                TransportEvent::Data {
                    from: server,
                    payload: message(40, now + 500_000),
                },
                peer.clone(),
            );
            let mut ctx = ProtocolCtx::new(now, &mut transport, &mut terminated);
            sync.notify_event(&event, &mut ctx);
        }
        assert!(sync.is_synchronised());

        let mut ctx = ProtocolCtx::new(99_999, &mut transport, &mut terminated);
        sync.update(&mut ctx);
        assert!(terminated);
    }
}
