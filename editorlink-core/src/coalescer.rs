//! Single-flight request coalescing
//!
//! When several equivalent requests arrive before the first one finishes, only
//! the first caller (the leader) runs the editor operation. Every later caller
//! (a follower) is parked on the in-flight entry and receives the leader's
//! outcome when it completes.
//!
//! The in-flight map is guarded by one mutex that is only held for map
//! lookups and mutations. Results are delivered after the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{CoalesceError, Outcome};

/// Capability to hand one outcome back to the client that issued a request.
pub trait ResponseSink: Send + Sync {
    /// Deliver `outcome` for `request_id`. Fails with `DeliveryFailed` when
    /// the client is gone.
    fn deliver(&self, request_id: &str, outcome: Outcome) -> Result<(), CoalesceError>;
}

impl<F> ResponseSink for F
where
    F: Fn(&str, Outcome) -> Result<(), CoalesceError> + Send + Sync,
{
    fn deliver(&self, request_id: &str, outcome: Outcome) -> Result<(), CoalesceError> {
        self(request_id, outcome)
    }
}

/// A request waiting for the outcome of an in-flight operation
#[derive(Clone)]
pub struct Waiter {
    request_id: String,
    sink: Arc<dyn ResponseSink>,
}

impl Waiter {
    pub fn new(request_id: impl Into<String>, sink: Arc<dyn ResponseSink>) -> Self {
        Self {
            request_id: request_id.into(),
            sink,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Deliver directly to this waiter's sink, bypassing any in-flight entry
    pub fn deliver(&self, outcome: Outcome) -> Result<(), CoalesceError> {
        self.sink.deliver(&self.request_id, outcome)
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// What the caller of [`Coalescer::try_begin_or_join`] must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Run the operation and call [`Coalescer::complete`] exactly once
    Leader,
    /// Do nothing; the outcome arrives through the waiter's sink
    Follower,
}

struct InFlightEntry {
    key: String,
    waiters: Vec<Waiter>,
    created_at: Instant,
    generation: u64,
    /// Set under the map lock when the sweeper evicts this entry
    swept: Arc<AtomicBool>,
}

/// Point-in-time view of one in-flight entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightInfo {
    pub key: String,
    pub waiters: usize,
    pub age_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    leaders: AtomicU64,
    followers: AtomicU64,
    completed: AtomicU64,
    evicted: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Counter snapshot reported by the health endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoalescerStats {
    pub leaders: u64,
    pub followers: u64,
    pub completed: u64,
    pub evicted: u64,
    pub delivery_failures: u64,
}

impl CoalescerStats {
    /// Fraction of requests that were served by joining another request
    pub fn dedup_ratio(&self) -> f64 {
        let total = self.leaders + self.followers;
        if total == 0 {
            0.0
        } else {
            self.followers as f64 / total as f64
        }
    }
}

/// Single-flight coalescer keyed by [`CoalesceKey`](crate::CoalesceKey) strings
#[derive(Default)]
pub struct Coalescer {
    in_flight: Mutex<HashMap<String, InFlightEntry>>,
    next_generation: AtomicU64,
    counters: Counters,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, InFlightEntry>> {
        // A panic while holding the lock cannot leave the map half-updated,
        // every mutation is a single insert, push or remove.
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `waiter` for `key`, creating the in-flight entry if needed.
    pub fn try_begin_or_join(&self, key: &str, waiter: Waiter) -> Result<Role, CoalesceError> {
        self.join_or_lead(key, waiter).map(|(role, _, _)| role)
    }

    fn join_or_lead(
        &self,
        key: &str,
        waiter: Waiter,
    ) -> Result<(Role, u64, Arc<AtomicBool>), CoalesceError> {
        if key.trim().is_empty() {
            return Err(CoalesceError::invalid_key("key must not be empty"));
        }

        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            tracing::info!(
                "Coalescing request {} onto in-flight '{}' ({} waiting)",
                waiter.request_id,
                key,
                entry.waiters.len() + 1
            );
            entry.waiters.push(waiter);
            self.counters.followers.fetch_add(1, Ordering::Relaxed);
            return Ok((Role::Follower, entry.generation, entry.swept.clone()));
        }

        tracing::debug!("Request {} leads '{}'", waiter.request_id, key);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let swept = Arc::new(AtomicBool::new(false));
        entries.insert(
            key.to_string(),
            InFlightEntry {
                key: key.to_string(),
                waiters: vec![waiter],
                created_at: Instant::now(),
                generation,
                swept: swept.clone(),
            },
        );
        self.counters.leaders.fetch_add(1, Ordering::Relaxed);
        Ok((Role::Leader, generation, swept))
    }

    /// Remove the entry for `key` and deliver `outcome` to all of its waiters.
    ///
    /// If the entry is already gone (swept as stale), `outcome` is delivered
    /// to `own` only. Returns the number of successful deliveries.
    pub fn complete(&self, key: &str, outcome: Outcome, own: &Waiter) -> usize {
        let removed = self.entries().remove(key);
        self.finish_removed(key, removed, outcome, own)
    }

    /// Like [`complete`](Self::complete), but leaves a newer entry for the
    /// same key untouched. A flight the sweeper already evicted delivers
    /// nothing: every waiter, `own` included, has had its `Timeout`.
    fn complete_generation(
        &self,
        key: &str,
        generation: u64,
        swept: &AtomicBool,
        outcome: Outcome,
        own: &Waiter,
    ) -> usize {
        let removed = {
            let mut entries = self.entries();
            if swept.load(Ordering::Acquire) {
                drop(entries);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    "Dropping late result for swept '{}' (request {})",
                    key,
                    own.request_id
                );
                return 0;
            }
            let current = entries.get(key).is_some_and(|e| e.generation == generation);
            if current {
                entries.remove(key)
            } else {
                None
            }
        };
        self.finish_removed(key, removed, outcome, own)
    }

    fn finish_removed(
        &self,
        key: &str,
        removed: Option<InFlightEntry>,
        outcome: Outcome,
        own: &Waiter,
    ) -> usize {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);

        match removed {
            Some(entry) => {
                tracing::info!(
                    "Completed '{}' for {} waiter(s), success={}",
                    entry.key,
                    entry.waiters.len(),
                    outcome.is_ok()
                );
                self.deliver_all(&entry.waiters, &outcome)
            }
            None => {
                tracing::warn!(
                    "No in-flight entry for '{}', delivering to request {} only",
                    key,
                    own.request_id
                );
                self.deliver_all(std::slice::from_ref(own), &outcome)
            }
        }
    }

    /// Evict entries older than `timeout` and fail their waiters with `Timeout`.
    pub fn sweep_stale(&self, now: Instant, timeout: Duration) -> usize {
        let stale: Vec<InFlightEntry> = {
            let mut entries = self.entries();
            let keys: Vec<String> = entries
                .values()
                .filter(|e| now.saturating_duration_since(e.created_at) > timeout)
                .map(|e| e.key.clone())
                .collect();
            keys.iter()
                .filter_map(|k| entries.remove(k))
                .inspect(|e| e.swept.store(true, Ordering::Release))
                .collect()
        };

        for entry in &stale {
            let elapsed = now.saturating_duration_since(entry.created_at);
            tracing::warn!(
                "Evicting stale in-flight '{}' after {:?} ({} waiter(s))",
                entry.key,
                elapsed,
                entry.waiters.len()
            );
            let outcome = Err(CoalesceError::Timeout {
                key: entry.key.clone(),
                elapsed_ms: elapsed.as_millis() as u64,
            });
            self.deliver_all(&entry.waiters, &outcome);
        }

        self.counters
            .evicted
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale.len()
    }

    fn deliver_all(&self, waiters: &[Waiter], outcome: &Outcome) -> usize {
        let mut delivered = 0;
        for waiter in waiters {
            match waiter.deliver(outcome.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    self.counters
                        .delivery_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("{}", e);
                }
            }
        }
        delivered
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries().len()
    }

    pub fn waiter_count(&self, key: &str) -> Option<usize> {
        self.entries().get(key).map(|e| e.waiters.len())
    }

    /// List in-flight entries, oldest first
    pub fn snapshot(&self) -> Vec<InFlightInfo> {
        let now = Instant::now();
        let entries = self.entries();
        let mut infos: Vec<(Instant, InFlightInfo)> = entries
            .values()
            .map(|e| {
                (
                    e.created_at,
                    InFlightInfo {
                        key: e.key.clone(),
                        waiters: e.waiters.len(),
                        age_ms: now.saturating_duration_since(e.created_at).as_millis() as u64,
                    },
                )
            })
            .collect();
        infos.sort_by(|(a_at, a), (b_at, b)| a_at.cmp(b_at).then_with(|| a.key.cmp(&b.key)));
        infos.into_iter().map(|(_, info)| info).collect()
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            leaders: self.counters.leaders.load(Ordering::Relaxed),
            followers: self.counters.followers.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            delivery_failures: self.counters.delivery_failures.load(Ordering::Relaxed),
        }
    }

    /// Join or lead `key`, wrapping leadership in a guard that always completes.
    pub fn begin(self: &Arc<Self>, key: &str, waiter: Waiter) -> Result<Flight, CoalesceError> {
        let own = waiter.clone();
        match self.join_or_lead(key, waiter)? {
            (Role::Follower, _, _) => Ok(Flight::Follower),
            (Role::Leader, generation, swept) => Ok(Flight::Leader(LeaderGuard {
                coalescer: Arc::clone(self),
                key: key.to_string(),
                generation,
                swept,
                own,
                finished: false,
            })),
        }
    }
}

/// Outcome of [`Coalescer::begin`]
#[derive(Debug)]
pub enum Flight {
    Leader(LeaderGuard),
    Follower,
}

/// Leadership of one in-flight key.
///
/// Dropping the guard without calling [`LeaderGuard::finish`] completes the
/// key with `OperationFailed`, so waiters are never left hanging.
pub struct LeaderGuard {
    coalescer: Arc<Coalescer>,
    key: String,
    generation: u64,
    swept: Arc<AtomicBool>,
    own: Waiter,
    finished: bool,
}

impl LeaderGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn request_id(&self) -> &str {
        self.own.request_id()
    }

    /// Complete the key with `outcome`. Returns the number of deliveries.
    pub fn finish(mut self, outcome: Outcome) -> usize {
        self.finished = true;
        self.coalescer
            .complete_generation(&self.key, self.generation, &self.swept, outcome, &self.own)
    }
}

impl fmt::Debug for LeaderGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderGuard")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("swept", &self.swept.load(Ordering::Relaxed))
            .field("own", &self.own)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.coalescer.complete_generation(
                &self.key,
                self.generation,
                &self.swept,
                Err(CoalesceError::operation_failed(
                    "leader dropped before completing",
                )),
                &self.own,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<(String, Outcome)>>,
    }

    impl RecordingSink {
        fn received(&self) -> Vec<(String, Outcome)> {
            self.received.lock().unwrap().clone()
        }
    }

    impl ResponseSink for RecordingSink {
        fn deliver(&self, request_id: &str, outcome: Outcome) -> Result<(), CoalesceError> {
            self.received
                .lock()
                .unwrap()
                .push((request_id.to_string(), outcome));
            Ok(())
        }
    }

    fn waiter(id: &str, sink: &Arc<RecordingSink>) -> Waiter {
        Waiter::new(id, sink.clone() as Arc<dyn ResponseSink>)
    }

    #[test]
    fn test_first_request_leads_rest_follow() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());

        assert_eq!(
            coalescer.try_begin_or_join("/Game/Foo/Bar", waiter("req-1", &sink)).unwrap(),
            Role::Leader
        );
        assert_eq!(
            coalescer.try_begin_or_join("/Game/Foo/Bar", waiter("req-2", &sink)).unwrap(),
            Role::Follower
        );
        assert_eq!(
            coalescer.try_begin_or_join("/Game/Foo/Bar", waiter("req-3", &sink)).unwrap(),
            Role::Follower
        );
        assert_eq!(coalescer.waiter_count("/Game/Foo/Bar"), Some(3));

        let delivered = coalescer.complete(
            "/Game/Foo/Bar",
            Ok(json!({"path": "/Game/Foo/Bar"})),
            &waiter("req-1", &sink),
        );
        assert_eq!(delivered, 3);

        let received = sink.received();
        let ids: Vec<&str> = received.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["req-1", "req-2", "req-3"]);
        for (_, outcome) in &received {
            assert_eq!(outcome, &Ok(json!({"path": "/Game/Foo/Bar"})));
        }
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[test]
    fn test_concurrent_begins_elect_one_leader() {
        let coalescer = Arc::new(Coalescer::new());
        let sink = Arc::new(RecordingSink::default());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let coalescer = coalescer.clone();
                let sink = sink.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    coalescer
                        .try_begin_or_join("asset:/Game/Hero", waiter(&format!("req-{}", i), &sink))
                        .unwrap()
                })
            })
            .collect();

        let roles: Vec<Role> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(roles.iter().filter(|r| **r == Role::Leader).count(), 1);
        assert_eq!(roles.iter().filter(|r| **r == Role::Follower).count(), 15);

        coalescer.complete("asset:/Game/Hero", Ok(json!(true)), &waiter("req-0", &sink));
        assert_eq!(sink.received().len(), 16);
        assert_eq!(coalescer.stats().leaders, 1);
        assert_eq!(coalescer.stats().followers, 15);
    }

    #[test]
    fn test_failure_is_relayed_to_every_waiter() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());
        coalescer.try_begin_or_join("k", waiter("a", &sink)).unwrap();
        coalescer.try_begin_or_join("k", waiter("b", &sink)).unwrap();

        let err = CoalesceError::operation_failed("parent class not found");
        coalescer.complete("k", Err(err.clone()), &waiter("a", &sink));

        let received = sink.received();
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|(_, o)| o == &Err(err.clone())));
    }

    #[test]
    fn test_distinct_keys_do_not_interfere() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());

        assert_eq!(coalescer.try_begin_or_join("k1", waiter("a", &sink)).unwrap(), Role::Leader);
        assert_eq!(coalescer.try_begin_or_join("k2", waiter("b", &sink)).unwrap(), Role::Leader);

        coalescer.complete("k1", Ok(json!(1)), &waiter("a", &sink));
        assert_eq!(coalescer.waiter_count("k2"), Some(1));
        assert_eq!(sink.received(), vec![("a".to_string(), Ok(json!(1)))]);
    }

    #[test]
    fn test_key_can_be_reused_after_completion() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());

        coalescer.try_begin_or_join("k", waiter("first", &sink)).unwrap();
        coalescer.complete("k", Ok(json!("one")), &waiter("first", &sink));

        assert_eq!(
            coalescer.try_begin_or_join("k", waiter("second", &sink)).unwrap(),
            Role::Leader
        );
        coalescer.complete("k", Ok(json!("two")), &waiter("second", &sink));
        assert_eq!(
            sink.received(),
            vec![
                ("first".to_string(), Ok(json!("one"))),
                ("second".to_string(), Ok(json!("two"))),
            ]
        );
    }

    #[test]
    fn test_empty_key_is_rejected_without_mutation() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());

        for key in ["", "   "] {
            let err = coalescer.try_begin_or_join(key, waiter("a", &sink)).unwrap_err();
            assert_eq!(err.code(), "INVALID_KEY");
        }
        assert_eq!(coalescer.in_flight_count(), 0);
        assert_eq!(coalescer.stats(), CoalescerStats::default());
    }

    #[test]
    fn test_sweep_evicts_stale_entries_with_timeout() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());
        coalescer.try_begin_or_join("stale", waiter("a", &sink)).unwrap();
        coalescer.try_begin_or_join("stale", waiter("b", &sink)).unwrap();

        let timeout = Duration::from_secs(60);
        assert_eq!(coalescer.sweep_stale(Instant::now(), timeout), 0);

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(coalescer.sweep_stale(later, timeout), 1);
        assert_eq!(coalescer.sweep_stale(later, timeout), 0);
        assert_eq!(coalescer.in_flight_count(), 0);

        let received = sink.received();
        assert_eq!(received.len(), 2);
        for (_, outcome) in received {
            assert!(matches!(outcome, Err(CoalesceError::Timeout { ref key, .. }) if key == "stale"));
        }
        assert_eq!(coalescer.stats().evicted, 1);
    }

    #[test]
    fn test_sweep_keeps_fresh_entries() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());
        coalescer.try_begin_or_join("old", waiter("a", &sink)).unwrap();
        thread::sleep(Duration::from_millis(30));
        coalescer.try_begin_or_join("new", waiter("b", &sink)).unwrap();

        let evicted = coalescer.sweep_stale(Instant::now(), Duration::from_millis(20));
        assert_eq!(evicted, 1);
        assert_eq!(coalescer.waiter_count("old"), None);
        assert_eq!(coalescer.waiter_count("new"), Some(1));
    }

    #[test]
    fn test_complete_without_entry_delivers_to_caller_only() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());

        let delivered = coalescer.complete("missing", Ok(json!("late")), &waiter("me", &sink));
        assert_eq!(delivered, 1);
        assert_eq!(sink.received(), vec![("me".to_string(), Ok(json!("late")))]);
    }

    #[test]
    fn test_delivery_failure_does_not_stop_fanout() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());
        let gone: Arc<dyn ResponseSink> =
            Arc::new(|request_id: &str, _outcome: Outcome| -> Result<(), CoalesceError> {
            Err(CoalesceError::DeliveryFailed {
                request_id: request_id.to_string(),
            })
        });

        coalescer.try_begin_or_join("k", waiter("a", &sink)).unwrap();
        coalescer.try_begin_or_join("k", Waiter::new("disconnected", gone)).unwrap();
        coalescer.try_begin_or_join("k", waiter("c", &sink)).unwrap();

        let delivered = coalescer.complete("k", Ok(json!(null)), &waiter("a", &sink));
        assert_eq!(delivered, 2);
        assert_eq!(coalescer.stats().delivery_failures, 1);
        let ids: Vec<String> = sink.received().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_leader_guard_finish() {
        let coalescer = Arc::new(Coalescer::new());
        let sink = Arc::new(RecordingSink::default());

        let guard = match coalescer.begin("k", waiter("lead", &sink)).unwrap() {
            Flight::Leader(guard) => guard,
            Flight::Follower => panic!("expected leader"),
        };
        assert_eq!(guard.key(), "k");
        assert_eq!(guard.request_id(), "lead");
        assert!(matches!(coalescer.begin("k", waiter("follow", &sink)).unwrap(), Flight::Follower));

        assert_eq!(guard.finish(Ok(json!("done"))), 2);
        assert_eq!(sink.received().len(), 2);
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[test]
    fn test_dropped_leader_guard_fails_waiters() {
        let coalescer = Arc::new(Coalescer::new());
        let sink = Arc::new(RecordingSink::default());

        {
            let _guard = coalescer.begin("k", waiter("lead", &sink)).unwrap();
            coalescer.begin("k", waiter("follow", &sink)).unwrap();
        }

        let received = sink.received();
        assert_eq!(received.len(), 2);
        for (_, outcome) in received {
            assert_eq!(outcome.unwrap_err().code(), "OPERATION_FAILED");
        }
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[test]
    fn test_late_leader_does_not_complete_newer_flight() {
        let coalescer = Arc::new(Coalescer::new());
        let sink = Arc::new(RecordingSink::default());

        let Flight::Leader(old) = coalescer.begin("k", waiter("old", &sink)).unwrap() else {
            panic!("expected leader");
        };
        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(coalescer.sweep_stale(later, Duration::from_secs(60)), 1);

        let Flight::Leader(new) = coalescer.begin("k", waiter("new", &sink)).unwrap() else {
            panic!("expected leader");
        };
        assert_eq!(old.finish(Ok(json!("stale result"))), 0);
        assert_eq!(coalescer.waiter_count("k"), Some(1));

        new.finish(Ok(json!("fresh result")));
        let received = sink.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].0, "old");
        assert_eq!(received[0].1.as_ref().unwrap_err().code(), "TIMEOUT");
        assert_eq!(received[1], ("new".to_string(), Ok(json!("fresh result"))));
    }

    #[test]
    fn test_swept_leader_result_reaches_no_one_twice() {
        let coalescer = Arc::new(Coalescer::new());
        let sink = Arc::new(RecordingSink::default());

        let Flight::Leader(guard) = coalescer.begin("k", waiter("lead", &sink)).unwrap() else {
            panic!("expected leader");
        };
        coalescer.begin("k", waiter("follow", &sink)).unwrap();

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(coalescer.sweep_stale(later, Duration::from_secs(60)), 1);
        assert_eq!(guard.finish(Ok(json!("too late"))), 0);

        let received = sink.received();
        let ids: Vec<&str> = received.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["lead", "follow"]);
        assert!(received.iter().all(|(_, o)| o.as_ref().unwrap_err().code() == "TIMEOUT"));
    }

    #[test]
    fn test_swept_leader_dropped_without_finishing() {
        let coalescer = Arc::new(Coalescer::new());
        let sink = Arc::new(RecordingSink::default());

        let guard = coalescer.begin("k", waiter("lead", &sink)).unwrap();
        let later = Instant::now() + Duration::from_secs(61);
        coalescer.sweep_stale(later, Duration::from_secs(60));
        drop(guard);

        assert_eq!(sink.received().len(), 1);
    }

    #[test]
    fn test_snapshot_and_dedup_ratio() {
        let coalescer = Coalescer::new();
        let sink = Arc::new(RecordingSink::default());
        coalescer.try_begin_or_join("a", waiter("1", &sink)).unwrap();
        coalescer.try_begin_or_join("a", waiter("2", &sink)).unwrap();
        coalescer.try_begin_or_join("a", waiter("3", &sink)).unwrap();
        coalescer.try_begin_or_join("b", waiter("4", &sink)).unwrap();

        let snapshot = coalescer.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].key, "a");
        assert_eq!(snapshot[0].waiters, 3);
        assert_eq!(snapshot[1].key, "b");

        assert!((coalescer.stats().dedup_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
