//! Request/response correlation across connections.
//!
//! A [`CorrelationBridge`] lets an outside caller ask one connected client a
//! question and wait for its single answer. Concurrent callers asking under
//! the same key share one in-flight [`PendingRequest`]: only the caller that
//! created it sends the outbound request, and every waiter receives the same
//! result.
//!
//! # Lifecycle of a key
//!
//! 1. `request` atomically gets or creates the entry for the key. The
//!    creator invokes the send function; everyone else just joins.
//! 2. The entry is removed by exactly one of: `resolve` (answer arrived),
//!    `fail_target` (target disconnected), the deadline passing, or a failed
//!    send. Removal delivers the outcome to every waiter present.
//! 3. A later `request` for the same key starts over with a fresh entry.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use skyrelay_types::ConnectionId;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why a correlated request produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// No answer arrived before the deadline.
    #[error("no answer within {after_ms} ms")]
    Timeout {
        /// The configured bound, in milliseconds.
        after_ms: u64,
    },

    /// The target connection closed while the request was outstanding.
    #[error("target connection {target} disconnected")]
    TargetDisconnected {
        /// The connection that went away.
        target: ConnectionId,
    },

    /// The outbound request could not be handed to the target.
    #[error("failed to send request: {reason}")]
    SendFailed {
        /// What went wrong.
        reason: String,
    },

    /// The bridge was dropped before the request completed.
    #[error("request abandoned")]
    Abandoned,
}

type Waiter<V> = oneshot::Sender<Result<V, CorrelationError>>;

/// One outstanding request and everyone waiting on it.
#[derive(Debug)]
pub struct PendingRequest<V> {
    id: u64,
    target: ConnectionId,
    deadline: Instant,
    waiters: Vec<Waiter<V>>,
}

impl<V> PendingRequest<V> {
    /// Connection the request was sent to.
    pub const fn target(&self) -> ConnectionId {
        self.target
    }

    /// When the request times out.
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Number of callers currently waiting.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

fn deliver<V: Clone>(waiters: Vec<Waiter<V>>, outcome: &Result<V, CorrelationError>) -> usize {
    let mut delivered: usize = 0;
    for waiter in waiters {
        // A waiter that gave up has dropped its receiver; nothing to do.
        if waiter.send(outcome.clone()).is_ok() {
            delivered = delivered.saturating_add(1);
        }
    }
    delivered
}

/// Table of in-flight correlated requests keyed by `K`, answered with `V`.
#[derive(Debug)]
pub struct CorrelationBridge<K, V>
where
    K: Eq + Hash,
{
    name: &'static str,
    pending: DashMap<K, PendingRequest<V>>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl<K, V> CorrelationBridge<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
    V: Clone,
{
    /// Create a bridge whose requests time out after `timeout`.
    ///
    /// `name` only appears in log output.
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            pending: DashMap::new(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// The configured answer bound.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_error(&self) -> CorrelationError {
        CorrelationError::Timeout {
            after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Ask `target` a question under `key` and wait for the answer.
    ///
    /// If no request for `key` is in flight, one is created and `send` is
    /// invoked exactly once with the key to deliver it. If one is already in
    /// flight, this call joins it and `send` is never invoked. Every waiter
    /// receives the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::Timeout`] if no answer arrives in time,
    /// [`CorrelationError::TargetDisconnected`] if the target goes away first,
    /// or the error `send` returned.
    pub async fn request<F>(&self, key: K, target: ConnectionId, send: F) -> Result<V, CorrelationError>
    where
        F: FnOnce(&K) -> Result<(), CorrelationError>,
    {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let mut stale: Option<PendingRequest<V>> = None;

        let (id, deadline, created) = match self.pending.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().deadline > now {
                    let pending = slot.get_mut();
                    pending.waiters.push(tx);
                    debug!(
                        bridge = self.name,
                        key = %key,
                        waiters = pending.waiters.len(),
                        "Joined in-flight request"
                    );
                    (pending.id, pending.deadline, false)
                } else {
                    // Past its deadline but not yet reaped: start over.
                    let fresh = self.fresh(target, now, tx);
                    let (id, deadline) = (fresh.id, fresh.deadline);
                    stale = Some(std::mem::replace(slot.get_mut(), fresh));
                    (id, deadline, true)
                }
            }
            Entry::Vacant(slot) => {
                let fresh = self.fresh(target, now, tx);
                let (id, deadline) = (fresh.id, fresh.deadline);
                slot.insert(fresh);
                (id, deadline, true)
            }
        };

        if let Some(stale) = stale {
            deliver(stale.waiters, &Err(self.timeout_error()));
        }

        if created {
            debug!(bridge = self.name, key = %key, target = %target, "Sending request");
            if let Err(err) = send(&key) {
                warn!(bridge = self.name, key = %key, error = %err, "Request could not be sent");
                self.finish_if(&key, id, &Err(err));
            }
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_dropped)) => Err(CorrelationError::Abandoned),
            Err(_elapsed) => {
                let outcome = Err(self.timeout_error());
                if self.finish_if(&key, id, &outcome) {
                    warn!(bridge = self.name, key = %key, target = %target, "Request timed out");
                }
                outcome
            }
        }
    }

    fn fresh(&self, target: ConnectionId, now: Instant, first: Waiter<V>) -> PendingRequest<V> {
        PendingRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            target,
            deadline: now.checked_add(self.timeout).unwrap_or(now),
            waiters: vec![first],
        }
    }

    /// Remove the entry for `key` only if it is still request `id`, and
    /// deliver `outcome` to its waiters. Returns whether it was removed.
    fn finish_if(&self, key: &K, id: u64, outcome: &Result<V, CorrelationError>) -> bool {
        match self.pending.remove_if(key, |_, pending| pending.id == id) {
            Some((_, pending)) => {
                deliver(pending.waiters, outcome);
                true
            }
            None => false,
        }
    }

    /// Answer the in-flight request for `key`.
    ///
    /// Returns the number of waiters that received `value`. Resolving a key
    /// with nothing in flight is a silent no-op returning 0.
    pub fn resolve(&self, key: &K, value: V) -> usize {
        let Some((_, pending)) = self.pending.remove(key) else {
            debug!(bridge = self.name, key = %key, "Ignoring answer with no request in flight");
            return 0;
        };
        let delivered = deliver(pending.waiters, &Ok(value));
        debug!(bridge = self.name, key = %key, delivered, "Request resolved");
        delivered
    }

    /// Answer the in-flight request for `key` only if `responder` is the
    /// connection it was sent to.
    ///
    /// Answers from any other connection are ignored and return 0.
    pub fn resolve_from(&self, key: &K, responder: ConnectionId, value: V) -> usize {
        let Some((_, pending)) = self
            .pending
            .remove_if(key, |_, pending| pending.target == responder)
        else {
            debug!(
                bridge = self.name,
                key = %key,
                responder = %responder,
                "Ignoring answer not matching a request to this connection"
            );
            return 0;
        };
        let delivered = deliver(pending.waiters, &Ok(value));
        debug!(bridge = self.name, key = %key, delivered, "Request resolved");
        delivered
    }

    /// Fail every request addressed to `target`.
    ///
    /// Called when the target disconnects. Returns how many requests failed.
    pub fn fail_target(&self, target: ConnectionId) -> usize {
        let failed = self.drain_where(|pending| pending.target == target);
        let count = failed.len();
        let outcome = Err(CorrelationError::TargetDisconnected { target });
        for waiters in failed {
            deliver(waiters, &outcome);
        }
        if count > 0 {
            debug!(bridge = self.name, target = %target, count, "Failed requests to departed target");
        }
        count
    }

    /// Time out every request whose deadline has passed.
    ///
    /// Waiters time themselves out, so this only matters for entries whose
    /// callers all went away. Returns how many requests were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired = self.drain_where(|pending| pending.deadline <= now);
        let count = expired.len();
        let outcome = Err(self.timeout_error());
        for waiters in expired {
            deliver(waiters, &outcome);
        }
        if count > 0 {
            debug!(bridge = self.name, count, "Purged expired requests");
        }
        count
    }

    /// Remove matching entries under the shard locks and hand back their
    /// waiters, so outcomes are delivered after the locks are released.
    fn drain_where(&self, mut matches: impl FnMut(&PendingRequest<V>) -> bool) -> Vec<Vec<Waiter<V>>> {
        let mut drained = Vec::new();
        self.pending.retain(|_, pending| {
            if matches(pending) {
                drained.push(std::mem::take(&mut pending.waiters));
                false
            } else {
                true
            }
        });
        drained
    }

    /// Whether a request for `key` is in flight.
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Number of callers waiting on `key` (0 when nothing is in flight).
    pub fn waiters(&self, key: &K) -> usize {
        self.pending.get(key).map_or(0, |pending| pending.waiter_count())
    }

    /// Number of requests in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    type Bridge = CorrelationBridge<String, u32>;

    fn bridge(timeout_ms: u64) -> Arc<Bridge> {
        Arc::new(CorrelationBridge::new("test", Duration::from_millis(timeout_ms)))
    }

    async fn wait_for_waiters(bridge: &Bridge, key: &str, count: usize) {
        let key = key.to_owned();
        while bridge.waiters(&key) < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_send() {
        let bridge = bridge(10_000);
        let sends = Arc::new(AtomicUsize::new(0));
        let target = ConnectionId::new();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let bridge = Arc::clone(&bridge);
                let sends = Arc::clone(&sends);
                tokio::spawn(async move {
                    bridge
                        .request(String::from("userX"), target, |_| {
                            sends.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        wait_for_waiters(&bridge, "userX", 5).await;
        assert_eq!(bridge.resolve(&String::from("userX"), 42), 5);

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(sends.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out() {
        let bridge = bridge(500);
        let outcome = bridge
            .request(String::from("k"), ConnectionId::new(), |_| Ok(()))
            .await;
        assert_eq!(outcome, Err(CorrelationError::Timeout { after_ms: 500 }));
        assert!(!bridge.is_pending(&String::from("k")));
    }

    #[tokio::test(start_paused = true)]
    async fn late_joiner_times_out_with_first_caller() {
        let bridge = bridge(1_000);
        let target = ConnectionId::new();
        let first = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.request(String::from("k"), target, |_| Ok(())).await })
        };
        wait_for_waiters(&bridge, "k", 1).await;
        tokio::time::advance(Duration::from_millis(600)).await;

        let second = bridge
            .request(String::from("k"), target, |_| {
                Err(CorrelationError::SendFailed {
                    reason: String::from("must not be called"),
                })
            })
            .await;
        assert_eq!(second, Err(CorrelationError::Timeout { after_ms: 1_000 }));
        assert_eq!(first.await.unwrap(), Err(CorrelationError::Timeout { after_ms: 1_000 }));
    }

    #[test]
    fn resolve_without_request_is_a_no_op() {
        let bridge = Bridge::new("test", Duration::from_secs(1));
        assert_eq!(bridge.resolve(&String::from("nobody"), 7), 0);
        assert_eq!(bridge.resolve_from(&String::from("nobody"), ConnectionId::new(), 7), 0);
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn target_disconnect_fails_waiters() {
        let bridge = bridge(10_000);
        let target = ConnectionId::new();
        let waiter = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.request(String::from("k"), target, |_| Ok(())).await })
        };
        wait_for_waiters(&bridge, "k", 1).await;

        assert_eq!(bridge.fail_target(ConnectionId::new()), 0);
        assert_eq!(bridge.fail_target(target), 1);
        assert_eq!(
            waiter.await.unwrap(),
            Err(CorrelationError::TargetDisconnected { target })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_reaches_caller_and_clears_entry() {
        let bridge = bridge(10_000);
        let outcome = bridge
            .request(String::from("k"), ConnectionId::new(), |_| {
                Err(CorrelationError::SendFailed {
                    reason: String::from("closed"),
                })
            })
            .await;
        assert_eq!(
            outcome,
            Err(CorrelationError::SendFailed {
                reason: String::from("closed")
            })
        );
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn answer_from_wrong_connection_is_ignored() {
        let bridge = bridge(10_000);
        let target = ConnectionId::new();
        let waiter = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.request(String::from("k"), target, |_| Ok(())).await })
        };
        wait_for_waiters(&bridge, "k", 1).await;

        assert_eq!(bridge.resolve_from(&String::from("k"), ConnectionId::new(), 1), 0);
        assert!(bridge.is_pending(&String::from("k")));
        assert_eq!(bridge.resolve_from(&String::from("k"), target, 2), 1);
        assert_eq!(waiter.await.unwrap(), Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn resolved_key_starts_fresh() {
        let bridge = bridge(10_000);
        let sends = Arc::new(AtomicUsize::new(0));
        let target = ConnectionId::new();

        for expected in [1_u32, 2] {
            let waiter = {
                let bridge = Arc::clone(&bridge);
                let sends = Arc::clone(&sends);
                tokio::spawn(async move {
                    bridge
                        .request(String::from("k"), target, |_| {
                            sends.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            };
            wait_for_waiters(&bridge, "k", 1).await;
            bridge.resolve(&String::from("k"), expected);
            assert_eq!(waiter.await.unwrap(), Ok(expected));
        }
        assert_eq!(sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_reaps_abandoned_entries() {
        let bridge = bridge(1_000);
        let waiter = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move {
                bridge
                    .request(String::from("k"), ConnectionId::new(), |_| Ok(()))
                    .await
            })
        };
        wait_for_waiters(&bridge, "k", 1).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert_eq!(bridge.purge_expired(), 0);
        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(bridge.purge_expired(), 1);
        assert_eq!(bridge.in_flight(), 0);
    }
}
