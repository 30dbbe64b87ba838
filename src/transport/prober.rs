//! Liveness prober.
//!
//! Every period `P` the prober walks the registry: a session whose last PONG
//! is older than `2P` is unregistered and force-closed; every other session
//! gets a PING. `last_pong` is seeded at connect, so a new session always
//! survives its first probe window.
//!
//! A pass never waits on a session's outbound path. PINGs are written from
//! their own tasks, and a session whose previous write is still pending is
//! skipped. A peer that stopped reading therefore cannot stall probing of
//! the others, and is still evicted once its window runs out.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace, warn};

use crate::identifiers::SessionId;

use super::registry::Registry;
use super::session::Session;

// ============================================================================
// ProbeReport
// ============================================================================

/// Outcome of one probe pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Sessions a PING was dispatched to.
    pub pinged: usize,
    /// Sessions skipped because a write to them was still pending.
    pub busy: usize,
    /// Sessions evicted for missing two probe windows.
    pub evicted: Vec<SessionId>,
}

// ============================================================================
// LivenessProber
// ============================================================================

/// Periodic PING sender and dead-peer evictor.
#[derive(Debug, Clone)]
pub struct LivenessProber {
    registry: Arc<Registry>,
    interval: Duration,
}

impl LivenessProber {
    /// Creates a prober over `registry` with period `interval`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Returns the probe period.
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns how long a session may go without a PONG (two periods).
    #[inline]
    #[must_use]
    pub fn eviction_window(&self) -> Duration {
        self.interval * 2
    }

    /// Runs one probe pass as of `now`.
    pub async fn probe(&self, now: Instant) -> ProbeReport {
        let window = self.eviction_window();
        let outcomes = join_all(
            self.registry
                .sessions()
                .into_iter()
                .map(|session| self.probe_session(session, now, window)),
        )
        .await;

        let mut report = ProbeReport::default();
        for outcome in outcomes {
            match outcome {
                Probed::Pinged => report.pinged += 1,
                Probed::Busy => report.busy += 1,
                Probed::Evicted(id) => report.evicted.push(id),
                Probed::Unreachable => {}
            }
        }

        trace!(
            pinged = report.pinged,
            busy = report.busy,
            evicted = report.evicted.len(),
            "Probe pass"
        );
        report
    }

    async fn probe_session(&self, session: Arc<Session>, now: Instant, window: Duration) -> Probed {
        let silent_for = now.saturating_duration_since(session.last_pong());

        if silent_for > window {
            warn!(
                session_id = %session.id(),
                silent_ms = silent_for.as_millis() as u64,
                "Evicting unresponsive session"
            );
            self.registry.unregister(session.id());
            session.close().await;
            return Probed::Evicted(session.id());
        }

        if !session.is_open() {
            return Probed::Unreachable;
        }

        if session.is_writing() {
            trace!(session_id = %session.id(), "Write pending, ping skipped");
            return Probed::Busy;
        }

        tokio::spawn(async move {
            if let Err(e) = session.send_ping().await {
                // Write failure already closed the session; its worker tears down.
                debug!(session_id = %session.id(), error = %e, "Ping failed");
            }
        });
        Probed::Pinged
    }

    /// Probes every period until shutdown is signalled.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(interval_ms = self.interval.as_millis() as u64, "Prober started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe(Instant::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Prober terminated");
    }
}

/// Per-session probe result.
enum Probed {
    Pinged,
    Busy,
    Evicted(SessionId),
    Unreachable,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::{OpCode, read_frame};
    use crate::transport::session::tests::{stuck_send, test_session, test_session_with_capacity};

    const PERIOD: Duration = Duration::from_millis(1000);

    #[tokio::test]
    async fn test_eviction_window_is_two_periods() {
        let prober = LivenessProber::new(Registry::new(), PERIOD);
        assert_eq!(prober.eviction_window(), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_silent_session_evicted_after_exactly_two_periods() {
        let registry = Registry::new();
        let (session, _client) = test_session(&registry);
        registry.register(Arc::clone(&session));
        registry.join(session.id(), "lobby");

        let prober = LivenessProber::new(Arc::clone(&registry), PERIOD);
        let seeded = session.last_pong();

        let first = prober.probe(seeded + PERIOD).await;
        assert_eq!(first.pinged, 1);
        assert!(first.evicted.is_empty());

        let at_window = prober.probe(seeded + PERIOD * 2).await;
        assert_eq!(at_window.pinged, 1);
        assert!(registry.contains(session.id()));

        let past_window = prober
            .probe(seeded + PERIOD * 2 + Duration::from_millis(1))
            .await;
        assert_eq!(past_window.evicted, vec![session.id()]);
        assert!(!registry.contains(session.id()));
        assert_eq!(registry.room_member_count("lobby"), 0);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_pong_resets_window() {
        let registry = Registry::new();
        let (session, _client) = test_session(&registry);
        registry.register(Arc::clone(&session));
        let prober = LivenessProber::new(Arc::clone(&registry), PERIOD);

        tokio::time::sleep(Duration::from_millis(5)).await;
        session.mark_pong();
        let answered = session.last_pong();

        let report = prober.probe(answered + PERIOD * 2).await;
        assert!(report.evicted.is_empty());
        assert!(registry.contains(session.id()));
    }

    #[tokio::test]
    async fn test_probe_sends_ping() {
        let registry = Registry::new();
        let (session, mut client) = test_session(&registry);
        registry.register(Arc::clone(&session));
        let prober = LivenessProber::new(Arc::clone(&registry), PERIOD);

        prober.probe(Instant::now()).await;

        let frame = read_frame(&mut client, 1024).await.unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Ping);
    }

    #[tokio::test]
    async fn test_failed_ping_closes_session() {
        let registry = Registry::new();
        let (session, client) = test_session(&registry);
        registry.register(Arc::clone(&session));
        drop(client);
        let prober = LivenessProber::new(Arc::clone(&registry), PERIOD);

        let report = prober.probe(Instant::now()).await;
        assert_eq!(report.pinged, 1);

        tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .expect("failed ping closed the session");

        // Closed but not yet torn down by its worker: neither pinged nor evicted.
        let report = prober.probe(Instant::now()).await;
        assert_eq!(report, ProbeReport::default());
    }

    #[tokio::test]
    async fn test_unread_peer_does_not_stall_probing() {
        let registry = Registry::new();
        let (stuck, _unread) = test_session_with_capacity(&registry, 64);
        let (healthy, mut healthy_client) = test_session(&registry);
        registry.register(Arc::clone(&stuck));
        registry.register(Arc::clone(&healthy));
        let _sender = stuck_send(&stuck).await;
        let prober = LivenessProber::new(Arc::clone(&registry), PERIOD);

        for _ in 0..40 {
            let report = tokio::time::timeout(Duration::from_secs(1), prober.probe(Instant::now()))
                .await
                .expect("pass finished despite the unread peer");
            assert_eq!(report.busy, 1);
            assert!(report.evicted.is_empty());
        }

        let frame = read_frame(&mut healthy_client, 1024).await.unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Ping);
        assert!(healthy.is_open());
    }

    #[tokio::test]
    async fn test_unread_peer_evicted_after_window() {
        let registry = Registry::new();
        let (session, _unread) = test_session_with_capacity(&registry, 64);
        registry.register(Arc::clone(&session));
        registry.join(session.id(), "lobby");
        let sender = stuck_send(&session).await;
        let prober = LivenessProber::new(Arc::clone(&registry), PERIOD);

        let report = tokio::time::timeout(
            Duration::from_secs(3),
            prober.probe(session.last_pong() + PERIOD * 3),
        )
        .await
        .expect("eviction finished behind a blocked send");

        assert_eq!(report.evicted, vec![session.id()]);
        assert!(!registry.contains(session.id()));
        assert_eq!(registry.room_member_count("lobby"), 0);
        assert!(!session.is_open());

        let result = tokio::time::timeout(Duration::from_secs(3), sender)
            .await
            .expect("blocked send released")
            .expect("no panic");
        assert!(matches!(result, Err(crate::Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let prober = LivenessProber::new(Registry::new(), Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(prober.run(rx));

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("prober stopped")
            .expect("no panic");
    }
}
