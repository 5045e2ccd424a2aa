//! Per-subscriber procedure timers
//!
//! Poll-driven timer manager: the embedding event loop asks for the next
//! deadline, sleeps until then, and calls [`EmmTimerMgr::dispatch_expired`].
//! One timer may run per (subscriber, purpose) pair; starting it again
//! supersedes the running instance, whose callback never fires. Each purpose
//! carries a retransmission budget, and starting past the budget fails so
//! the driver takes a recovery decision instead of retrying forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::EmmConfig;
use crate::context::{EmmContext, UeId};
use crate::error::{EmmCtxError, EmmCtxResult};
use crate::store::EmmContextStore;

// ============================================================================
// Timer Purpose
// ============================================================================

/// What a running timer is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    /// Identity response from the UE
    Identity,
    /// Authentication response from the UE
    Authentication,
    /// Context-transfer response from a peer node
    ContextTransfer,
    /// Authentication material from the subscriber-data source
    SubscriberData,
    /// Generic short procedure-retry interval
    Retry,
}

impl TimerPurpose {
    /// Every purpose, in declaration order
    pub const ALL: [TimerPurpose; 5] = [
        TimerPurpose::Identity,
        TimerPurpose::Authentication,
        TimerPurpose::ContextTransfer,
        TimerPurpose::SubscriberData,
        TimerPurpose::Retry,
    ];

    /// Short display name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            TimerPurpose::Identity => "identity",
            TimerPurpose::Authentication => "authentication",
            TimerPurpose::ContextTransfer => "context-transfer",
            TimerPurpose::SubscriberData => "subscriber-data",
            TimerPurpose::Retry => "retry",
        }
    }

    /// How many times the timer may be started for one procedure run
    /// before the driver must give up.
    pub fn max_attempts(&self) -> u32 {
        match self {
            TimerPurpose::Identity | TimerPurpose::Authentication => 5,
            TimerPurpose::ContextTransfer | TimerPurpose::SubscriberData => 3,
            TimerPurpose::Retry => 4,
        }
    }
}

// ============================================================================
// Timer Events and Callbacks
// ============================================================================

/// Delivered to a timer callback on expiry
#[derive(Debug, Clone, Copy)]
pub struct TimerEvent {
    /// Subscriber the timer belongs to
    pub ue_id: UeId,
    /// What the timer was waiting for
    pub purpose: TimerPurpose,
    /// Which start of this timer expired (1-based)
    pub attempt: u32,
}

/// Expiry handler. Runs holding the subscriber's context exclusively; the
/// dispatcher looks the context up and locks it, so the callback never races
/// a signalling path touching the same subscriber.
pub type TimerCallback = Box<dyn FnOnce(TimerEvent, &mut EmmContext) + Send>;

struct TimerEntry {
    deadline: Instant,
    attempt: u32,
    // Distinguishes this arm from any later arm of the same key, so a
    // dispatch snapshot never fires a superseded callback
    generation: u64,
    callback: TimerCallback,
}

// ============================================================================
// Timer Manager
// ============================================================================

/// Timer registry for one context store.
///
/// The manager never spawns threads; drive it by polling
/// [`next_deadline`](Self::next_deadline) and calling
/// [`dispatch_expired`](Self::dispatch_expired) from the event loop.
pub struct EmmTimerMgr {
    deadlines: [(TimerPurpose, Duration); 5],
    entries: Mutex<HashMap<(UeId, TimerPurpose), TimerEntry>>,
    attempts: Mutex<HashMap<(UeId, TimerPurpose), u32>>,
    generation: AtomicU64,
}

impl EmmTimerMgr {
    /// Create a manager with deadlines taken from configuration
    pub fn new(config: &EmmConfig) -> Self {
        let deadlines = [
            (TimerPurpose::Identity, config.deadline(TimerPurpose::Identity)),
            (
                TimerPurpose::Authentication,
                config.deadline(TimerPurpose::Authentication),
            ),
            (
                TimerPurpose::ContextTransfer,
                config.deadline(TimerPurpose::ContextTransfer),
            ),
            (
                TimerPurpose::SubscriberData,
                config.deadline(TimerPurpose::SubscriberData),
            ),
            (TimerPurpose::Retry, config.deadline(TimerPurpose::Retry)),
        ];
        Self {
            deadlines,
            entries: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn deadline_for(&self, purpose: TimerPurpose) -> Duration {
        self.deadlines
            .iter()
            .find(|(p, _)| *p == purpose)
            .map(|(_, d)| *d)
            .unwrap_or(Duration::ZERO)
    }

    /// Start (or restart) the timer for a (subscriber, purpose) pair.
    ///
    /// A running instance for the same pair is superseded and its callback
    /// dropped. Fails with [`EmmCtxError::RetryExhausted`] once the purpose's
    /// retransmission budget is used up; the budget resets on
    /// [`stop`](Self::stop) / [`stop_all`](Self::stop_all) and once an
    /// expiry ends the run without a re-arm.
    pub fn start(
        &self,
        ue_id: UeId,
        purpose: TimerPurpose,
        callback: TimerCallback,
    ) -> EmmCtxResult<()> {
        let key = (ue_id, purpose);

        let mut attempts = self.attempts.lock().unwrap();
        let attempt = attempts.get(&key).copied().unwrap_or(0) + 1;
        if attempt > purpose.max_attempts() {
            log::warn!(
                "UE {ue_id} {} timer budget exhausted after {} attempts",
                purpose.name(),
                attempt - 1
            );
            return Err(EmmCtxError::RetryExhausted {
                purpose: purpose.name(),
                ue_id,
            });
        }
        attempts.insert(key, attempt);
        drop(attempts);

        let entry = TimerEntry {
            deadline: Instant::now() + self.deadline_for(purpose),
            attempt,
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            callback,
        };
        let superseded = self.entries.lock().unwrap().insert(key, entry).is_some();
        log::debug!(
            "UE {ue_id} started {} timer, attempt {attempt}{}",
            purpose.name(),
            if superseded { " (superseded running instance)" } else { "" }
        );
        Ok(())
    }

    /// Stop the timer for a (subscriber, purpose) pair and reset its
    /// retransmission budget. Stopping an idle timer is a no-op. Once this
    /// returns, the stopped arm's callback will not fire unless it had
    /// already begun executing.
    pub fn stop(&self, ue_id: UeId, purpose: TimerPurpose) {
        let key = (ue_id, purpose);
        let was_running = self.entries.lock().unwrap().remove(&key).is_some();
        self.attempts.lock().unwrap().remove(&key);
        if was_running {
            log::debug!("UE {ue_id} stopped {} timer", purpose.name());
        }
    }

    /// Stop every timer of one subscriber. Called when the context is
    /// released.
    pub fn stop_all(&self, ue_id: UeId) {
        self.entries
            .lock()
            .unwrap()
            .retain(|(id, _), _| *id != ue_id);
        self.attempts
            .lock()
            .unwrap()
            .retain(|(id, _), _| *id != ue_id);
    }

    /// Whether a timer is currently running for the pair
    pub fn is_running(&self, ue_id: UeId, purpose: TimerPurpose) -> bool {
        self.entries.lock().unwrap().contains_key(&(ue_id, purpose))
    }

    /// Earliest pending deadline, if any timer is running
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .map(|entry| entry.deadline)
            .min()
    }

    /// How long the event loop may sleep before the next expiry
    pub fn poll_interval(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Fire every timer whose deadline has passed.
    ///
    /// Due arms are snapshotted first, then each is claimed back under the
    /// registry lock immediately before its callback runs: a `stop` issued
    /// in the meantime (from an earlier callback in the same batch, or from
    /// another thread) cancels the arm, and a restart supersedes it via its
    /// generation. Callbacks run outside the registry lock, holding their
    /// subscriber's context lock; an arm whose context has already left the
    /// store is dropped silently. Returns the number of callbacks fired.
    /// The retransmission budget of a fired arm survives only when the
    /// callback re-arms the timer, so a restart counts as the next attempt;
    /// otherwise the procedure run is over and the budget is released.
    pub fn dispatch_expired(&self, now: Instant, store: &EmmContextStore) -> usize {
        let due: Vec<((UeId, TimerPurpose), u64)> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, entry)| (*key, entry.generation))
            .collect();

        let mut fired = 0;
        for (key, generation) in due {
            let (ue_id, purpose) = key;
            let entry = {
                let mut entries = self.entries.lock().unwrap();
                match entries.get(&key) {
                    Some(current) if current.generation == generation => entries.remove(&key),
                    // Stopped or superseded since the snapshot
                    _ => None,
                }
            };
            let Some(entry) = entry else {
                continue;
            };

            let Some(ctx) = store.get(ue_id) else {
                log::debug!(
                    "UE {ue_id} {} timer expired after context release",
                    purpose.name()
                );
                self.attempts.lock().unwrap().remove(&key);
                continue;
            };
            log::debug!(
                "UE {ue_id} {} timer expired, attempt {}",
                purpose.name(),
                entry.attempt
            );
            let event = TimerEvent {
                ue_id,
                purpose,
                attempt: entry.attempt,
            };
            {
                let mut guard = ctx.lock().unwrap();
                (entry.callback)(event, &mut guard);
            }
            fired += 1;

            // The run ended unless the callback re-armed this timer
            if !self.entries.lock().unwrap().contains_key(&key) {
                self.attempts.lock().unwrap().remove(&key);
            }
        }
        fired
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config() -> EmmConfig {
        EmmConfig {
            t_identity_ms: 10,
            t_authentication_ms: 10,
            t_context_transfer_ms: 10,
            t_subscriber_data_ms: 10,
            t_retry_ms: 5,
            ..Default::default()
        }
    }

    fn setup() -> (EmmTimerMgr, EmmContextStore, UeId) {
        let config = fast_config();
        let mgr = EmmTimerMgr::new(&config);
        let store = EmmContextStore::new(&config);
        let ue_id = store.create().unwrap().lock().unwrap().ue_id();
        (mgr, store, ue_id)
    }

    fn counting_callback(counter: &Arc<AtomicU32>) -> TimerCallback {
        let counter = counter.clone();
        Box::new(move |_event, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn noop() -> TimerCallback {
        Box::new(|_: TimerEvent, _: &mut EmmContext| {})
    }

    #[test]
    fn test_start_and_expire() {
        let (mgr, store, ue_id) = setup();
        let fired = Arc::new(AtomicU32::new(0));

        mgr.start(ue_id, TimerPurpose::Identity, counting_callback(&fired))
            .unwrap();
        assert!(mgr.is_running(ue_id, TimerPurpose::Identity));

        // Not yet due
        assert_eq!(mgr.dispatch_expired(Instant::now(), &store), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let later = Instant::now() + Duration::from_millis(50);
        assert_eq!(mgr.dispatch_expired(later, &store), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!mgr.is_running(ue_id, TimerPurpose::Identity));
    }

    #[test]
    fn test_stop_before_deadline_suppresses_callback() {
        let (mgr, store, ue_id) = setup();
        let fired = Arc::new(AtomicU32::new(0));

        mgr.start(ue_id, TimerPurpose::Authentication, counting_callback(&fired))
            .unwrap();
        mgr.stop(ue_id, TimerPurpose::Authentication);

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(mgr.dispatch_expired(later, &store), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_supersedes_running_instance() {
        let (mgr, store, ue_id) = setup();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        mgr.start(ue_id, TimerPurpose::Retry, counting_callback(&first))
            .unwrap();
        mgr.start(ue_id, TimerPurpose::Retry, counting_callback(&second))
            .unwrap();

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(mgr.dispatch_expired(later, &store), 1);
        // Only the superseding instance fires
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attempt_budget() {
        let (mgr, _store, ue_id) = setup();

        let budget = TimerPurpose::Retry.max_attempts();
        for _ in 0..budget {
            mgr.start(ue_id, TimerPurpose::Retry, noop()).unwrap();
        }
        assert!(matches!(
            mgr.start(ue_id, TimerPurpose::Retry, noop()),
            Err(EmmCtxError::RetryExhausted { purpose: "retry", ue_id: id }) if id == ue_id
        ));

        // Stop resets the budget
        mgr.stop(ue_id, TimerPurpose::Retry);
        mgr.start(ue_id, TimerPurpose::Retry, noop()).unwrap();
    }

    #[test]
    fn test_attempt_resets_when_expiry_is_not_rearmed() {
        let (mgr, store, ue_id) = setup();
        let seen = Arc::new(AtomicU32::new(0));

        // Each start/expire pair is a fresh run: the callback does not
        // re-arm, so the budget is released and the attempt stays 1.
        for round in 1..=3u32 {
            let seen_cb = seen.clone();
            mgr.start(
                ue_id,
                TimerPurpose::SubscriberData,
                Box::new(move |event, ctx| {
                    assert_eq!(event.attempt, 1);
                    assert_eq!(event.ue_id, ctx.ue_id());
                    assert_eq!(event.purpose, TimerPurpose::SubscriberData);
                    seen_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
            let later = Instant::now() + Duration::from_secs(1);
            assert_eq!(mgr.dispatch_expired(later, &store), 1);
            assert_eq!(seen.load(Ordering::SeqCst), round);
        }
    }

    #[test]
    fn test_stop_from_batch_callback_cancels_peer() {
        let config = fast_config();
        let mgr = Arc::new(EmmTimerMgr::new(&config));
        let store = EmmContextStore::new(&config);
        let ue_id = store.create().unwrap().lock().unwrap().ue_id();
        let fired = Arc::new(AtomicU32::new(0));

        // Two arms expire together; each callback stops the other's arm.
        // Whichever runs first must cancel its peer, so exactly one fires.
        for (purpose, peer) in [
            (TimerPurpose::Identity, TimerPurpose::Authentication),
            (TimerPurpose::Authentication, TimerPurpose::Identity),
        ] {
            let fired_cb = fired.clone();
            let mgr_cb = mgr.clone();
            mgr.start(
                ue_id,
                purpose,
                Box::new(move |event, _ctx| {
                    fired_cb.fetch_add(1, Ordering::SeqCst);
                    mgr_cb.stop(event.ue_id, peer);
                }),
            )
            .unwrap();
        }

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(mgr.dispatch_expired(later, &store), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!mgr.is_running(ue_id, TimerPurpose::Identity));
        assert!(!mgr.is_running(ue_id, TimerPurpose::Authentication));
    }

    #[test]
    fn test_restart_from_batch_callback_supersedes_peer() {
        let config = fast_config();
        let mgr = Arc::new(EmmTimerMgr::new(&config));
        let store = EmmContextStore::new(&config);
        let ue_id = store.create().unwrap().lock().unwrap().ue_id();
        let fired = Arc::new(AtomicU32::new(0));

        // Two arms expire together; each callback restarts the other.
        // The restart supersedes the peer's expired arm, so only one
        // callback from the batch fires and the peer stays armed afresh.
        for (purpose, peer) in [
            (TimerPurpose::Identity, TimerPurpose::Authentication),
            (TimerPurpose::Authentication, TimerPurpose::Identity),
        ] {
            let fired_cb = fired.clone();
            let mgr_cb = mgr.clone();
            mgr.start(
                ue_id,
                purpose,
                Box::new(move |event, _ctx| {
                    fired_cb.fetch_add(1, Ordering::SeqCst);
                    mgr_cb.start(event.ue_id, peer, Box::new(|_, _| {})).unwrap();
                }),
            )
            .unwrap();
        }

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(mgr.dispatch_expired(later, &store), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let running = [TimerPurpose::Identity, TimerPurpose::Authentication]
            .iter()
            .filter(|purpose| mgr.is_running(ue_id, **purpose))
            .count();
        assert_eq!(running, 1);
    }

    #[test]
    fn test_stop_all_clears_one_subscriber_only() {
        let (mgr, store, first) = setup();
        let second = store.create().unwrap().lock().unwrap().ue_id();

        mgr.start(first, TimerPurpose::Identity, noop()).unwrap();
        mgr.start(first, TimerPurpose::Retry, noop()).unwrap();
        mgr.start(second, TimerPurpose::Identity, noop()).unwrap();

        mgr.stop_all(first);
        assert!(!mgr.is_running(first, TimerPurpose::Identity));
        assert!(!mgr.is_running(first, TimerPurpose::Retry));
        assert!(mgr.is_running(second, TimerPurpose::Identity));
    }

    #[test]
    fn test_released_context_timer_dropped_silently() {
        let (mgr, store, ue_id) = setup();
        mgr.start(ue_id, TimerPurpose::Identity, Box::new(|_, _| panic!("must not fire")))
            .unwrap();
        store.remove(ue_id, false).unwrap();

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(mgr.dispatch_expired(later, &store), 0);
        assert!(!mgr.is_running(ue_id, TimerPurpose::Identity));
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let config = EmmConfig {
            t_identity_ms: 60_000,
            t_retry_ms: 100,
            ..Default::default()
        };
        let mgr = EmmTimerMgr::new(&config);

        assert!(mgr.next_deadline().is_none());
        mgr.start(1, TimerPurpose::Identity, noop()).unwrap();
        mgr.start(2, TimerPurpose::Retry, noop()).unwrap();

        let next = mgr.next_deadline().unwrap();
        assert!(next <= Instant::now() + Duration::from_millis(200));

        let interval = mgr.poll_interval(Instant::now()).unwrap();
        assert!(interval <= Duration::from_millis(200));
    }

    #[test]
    fn test_callback_can_restart_timer() {
        let config = fast_config();
        let mgr = Arc::new(EmmTimerMgr::new(&config));
        let store = EmmContextStore::new(&config);
        let ue_id = store.create().unwrap().lock().unwrap().ue_id();
        let fired = Arc::new(AtomicU32::new(0));

        {
            let fired = fired.clone();
            let mgr2 = mgr.clone();
            mgr.start(
                ue_id,
                TimerPurpose::Retry,
                Box::new(move |event, _ctx| {
                    assert_eq!(event.attempt, 1);
                    fired.fetch_add(1, Ordering::SeqCst);
                    // Restarting from inside the callback must not deadlock,
                    // and it keeps the run's budget: the re-arm is attempt 2
                    let fired = fired.clone();
                    mgr2.start(
                        event.ue_id,
                        event.purpose,
                        Box::new(move |event2, _| {
                            assert_eq!(event2.attempt, 2);
                            fired.fetch_add(1, Ordering::SeqCst);
                        }),
                    )
                    .unwrap();
                }),
            )
            .unwrap();
        }

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(mgr.dispatch_expired(later, &store), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(mgr.is_running(ue_id, TimerPurpose::Retry));

        let later2 = Instant::now() + Duration::from_secs(2);
        assert_eq!(mgr.dispatch_expired(later2, &store), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
