//! Long-poll progress tracker.
//!
//! A `ProgressTracker` owns the run registry and at most one waiter per run.
//! Writers update a run through a [`RunHandle`]; every update asks the waiter
//! (if any) to wake. Wakes are coalesced per waiter by a small state machine:
//!
//! ```text
//! Idle --wake--> Pending { deadline = now + window, fire_at = now + delay }
//! Pending --wake, now < deadline--> Pending { fire_at = now + delay }
//! Pending --wake, now >= deadline--> unchanged
//! Pending --fire_at reached--> Delivered (waiter removed, snapshot sent)
//! ```
//!
//! One delivery task is spawned per waiter, on its first wake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::registry::RunRegistry;
use super::state::RunState;
use crate::errors::TrackerError;

/// Timing knobs for the long-poll protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long a `wait` blocks without a wake before failing.
    pub wait_timeout: Duration,
    /// Upper bound on how long repeated wakes may keep postponing delivery.
    pub coalesce_window: Duration,
    /// Delay between a wake request and delivery.
    pub delivery_delay: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(30),
            coalesce_window: Duration::from_millis(100),
            delivery_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WakePhase {
    Idle,
    Pending { deadline: Instant, fire_at: Instant },
}

struct Waiter {
    ticket: u64,
    tx: oneshot::Sender<RunState>,
    phase: WakePhase,
}

#[derive(Default)]
struct Inner {
    registry: RunRegistry,
    waiters: HashMap<String, Waiter>,
}

struct Shared {
    label: String,
    config: TrackerConfig,
    inner: Mutex<Inner>,
    next_ticket: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of live runs plus the long-poll waiters blocked on them.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct ProgressTracker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("label", &self.shared.label)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// `label` only appears in log fields.
    pub fn new(label: impl Into<String>, config: TrackerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                config,
                inner: Mutex::new(Inner::default()),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.shared.config
    }

    /// Register a fresh run, replacing any prior state under the same id.
    pub fn add_run(&self, id: &str) -> RunHandle {
        self.shared.lock().registry.insert(id);
        debug!(tracker = %self.shared.label, run_id = id, "Run registered");
        RunHandle {
            tracker: self.clone(),
            id: Arc::from(id),
        }
    }

    pub fn has_run(&self, id: &str) -> bool {
        self.shared.lock().registry.contains(id)
    }

    /// Snapshot of the run's current state.
    pub fn get_run(&self, id: &str) -> Option<RunState> {
        self.shared.lock().registry.get(id).cloned()
    }

    pub fn run_count(&self) -> usize {
        self.shared.lock().registry.len()
    }

    pub fn has_waiter(&self, id: &str) -> bool {
        self.shared.lock().waiters.contains_key(id)
    }

    /// Resolve the run's waiter with its final state, then forget the run.
    ///
    /// No-op for unknown runs.
    pub fn finish_run(&self, id: &str) {
        let mut inner = self.shared.lock();
        let Some(state) = inner.registry.remove(id) else {
            return;
        };
        if let Some(waiter) = inner.waiters.remove(id) {
            let _ = waiter.tx.send(state);
        }
        debug!(tracker = %self.shared.label, run_id = id, "Run finished");
    }

    /// Block until the run changes, finishes, or the wait times out.
    ///
    /// Without `last_seen` the caller wants a snapshot: the wait is woken
    /// right away, so it returns after the delivery delay instead of blocking.
    pub async fn wait(
        &self,
        id: &str,
        last_seen: Option<&RunState>,
    ) -> Result<RunState, TrackerError> {
        let (ticket, mut rx) = {
            let mut inner = self.shared.lock();
            if inner.waiters.contains_key(id) {
                return Err(TrackerError::AlreadyWaiting);
            }
            if !inner.registry.contains(id) {
                return Err(TrackerError::MissingRun);
            }

            let ticket = self.shared.next_ticket.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            inner.waiters.insert(
                id.to_string(),
                Waiter {
                    ticket,
                    tx,
                    phase: WakePhase::Idle,
                },
            );
            if last_seen.is_none() {
                self.request_wake(&mut inner, id);
            }
            (ticket, rx)
        };

        let guard = WaiterGuard {
            shared: &self.shared,
            id,
            ticket,
        };

        match tokio::time::timeout(self.shared.config.wait_timeout, &mut rx).await {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(_)) => Err(TrackerError::MissingRun),
            Err(_) => {
                drop(guard);
                // A delivery may have raced the timer.
                rx.try_recv().map_err(|_| TrackerError::WaitTimeout)
            }
        }
    }

    /// Advance the waiter's wake state machine. Caller holds the lock.
    fn request_wake(&self, inner: &mut Inner, id: &str) {
        let Some(waiter) = inner.waiters.get_mut(id) else {
            return;
        };
        let now = Instant::now();
        let delay = self.shared.config.delivery_delay;

        match waiter.phase {
            WakePhase::Idle => {
                waiter.phase = WakePhase::Pending {
                    deadline: now + self.shared.config.coalesce_window,
                    fire_at: now + delay,
                };
                let shared = Arc::clone(&self.shared);
                let id = id.to_string();
                let ticket = waiter.ticket;
                tokio::spawn(async move { deliver_when_due(shared, id, ticket).await });
            }
            WakePhase::Pending { deadline, .. } if now < deadline => {
                waiter.phase = WakePhase::Pending {
                    deadline,
                    fire_at: now + delay,
                };
            }
            WakePhase::Pending { .. } => {}
        }
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut RunState)) {
        let mut inner = self.shared.lock();
        let Some(state) = inner.registry.get_mut(id) else {
            trace!(tracker = %self.shared.label, run_id = id, "Update for unknown run dropped");
            return;
        };
        apply(state);
        self.request_wake(&mut inner, id);
    }
}

/// The single delivery task of one waiter.
async fn deliver_when_due(shared: Arc<Shared>, id: String, ticket: u64) {
    loop {
        let fire_at = {
            let inner = shared.lock();
            match inner.waiters.get(&id) {
                Some(Waiter {
                    ticket: t,
                    phase: WakePhase::Pending { fire_at, .. },
                    ..
                }) if *t == ticket => *fire_at,
                _ => return,
            }
        };

        tokio::time::sleep_until(fire_at).await;

        let mut inner = shared.lock();
        let due = matches!(
            inner.waiters.get(&id),
            Some(Waiter {
                ticket: t,
                phase: WakePhase::Pending { fire_at, .. },
                ..
            }) if *t == ticket && *fire_at <= Instant::now()
        );
        if !due {
            continue;
        }
        let snapshot = inner.registry.get(&id).cloned().unwrap_or_default();
        if let Some(waiter) = inner.waiters.remove(&id) {
            trace!(tracker = %shared.label, run_id = %id, "Delivering coalesced update");
            let _ = waiter.tx.send(snapshot);
        }
        return;
    }
}

/// Removes the waiter when its `wait` call ends, including when the future
/// is dropped because the client went away.
struct WaiterGuard<'a> {
    shared: &'a Arc<Shared>,
    id: &'a str,
    ticket: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner
            .waiters
            .get(self.id)
            .is_some_and(|w| w.ticket == self.ticket)
        {
            inner.waiters.remove(self.id);
        }
    }
}

/// Write access to one run, returned by [`ProgressTracker::add_run`].
///
/// Updates after the run has finished are silently dropped.
#[derive(Clone)]
pub struct RunHandle {
    tracker: ProgressTracker,
    id: Arc<str>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle").field("id", &self.id).finish()
    }
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Set progress, clamped to `[0, 100]`. NaN is ignored.
    pub fn set_progress(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(0.0, 100.0);
        self.tracker
            .update(&self.id, |state| state.progress = Some(value));
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.tracker
            .update(&self.id, |state| state.message = Some(message));
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.tracker.update(&self.id, |state| state.error = Some(error));
    }

    pub fn snapshot(&self) -> Option<RunState> {
        self.tracker.get_run(&self.id)
    }

    pub fn finish(&self) {
        self.tracker.finish_run(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new("test", TrackerConfig::default())
    }

    async fn until_waiting(tracker: &ProgressTracker, id: &str) {
        while !tracker.has_waiter(id) {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_wait(
        tracker: &ProgressTracker,
        id: &'static str,
        last_seen: Option<RunState>,
    ) -> tokio::task::JoinHandle<Result<RunState, TrackerError>> {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.wait(id, last_seen.as_ref()).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_wait_resolves_promptly() {
        let tracker = tracker();
        tracker.add_run("a");

        let start = Instant::now();
        let state = tracker.wait("a", None).await.unwrap();

        assert_eq!(state, RunState::default());
        assert!(start.elapsed() <= Duration::from_millis(150));
        assert!(!tracker.has_waiter("a"));
        assert!(tracker.has_run("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_run_is_missing_with_or_without_last_seen() {
        let tracker = tracker();
        let seen = RunState::default();

        assert_eq!(
            tracker.wait("nope", Some(&seen)).await,
            Err(TrackerError::MissingRun)
        );
        assert_eq!(tracker.wait("nope", None).await, Err(TrackerError::MissingRun));
        assert!(!tracker.has_waiter("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_waiter_is_rejected_without_disturbing_first() {
        let tracker = tracker();
        let run = tracker.add_run("a");

        let first = spawn_wait(&tracker, "a", Some(RunState::default()));
        until_waiting(&tracker, "a").await;

        assert_eq!(
            tracker.wait("a", Some(&RunState::default())).await,
            Err(TrackerError::AlreadyWaiting)
        );
        assert!(tracker.has_waiter("a"));

        run.set_message("still here");
        let state = first.await.unwrap().unwrap();
        assert_eq!(state.message.as_deref(), Some("still here"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setter_wakes_waiter_within_window() {
        let tracker = tracker();
        let run = tracker.add_run("a");

        let waiter = spawn_wait(&tracker, "a", Some(RunState::default()));
        until_waiting(&tracker, "a").await;

        let start = Instant::now();
        run.set_progress(25.0);
        let state = waiter.await.unwrap().unwrap();

        assert_eq!(state.progress, Some(25.0));
        assert!(start.elapsed() <= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_coalesce_into_one_delivery() {
        let tracker = tracker();
        let run = tracker.add_run("a");

        let waiter = spawn_wait(&tracker, "a", Some(RunState::default()));
        until_waiting(&tracker, "a").await;

        for i in 1..=5 {
            run.set_progress(f64::from(i) * 10.0);
            run.set_message(format!("step {i}"));
        }
        let state = waiter.await.unwrap().unwrap();

        assert_eq!(state.progress, Some(50.0));
        assert_eq!(state.message.as_deref(), Some("step 5"));
        assert!(!tracker.has_waiter("a"));

        // Nothing left over: the next wait has to wait for a fresh update.
        let next = spawn_wait(&tracker, "a", Some(state.clone()));
        until_waiting(&tracker, "a").await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!next.is_finished());
        run.set_error("late");
        assert_eq!(next.await.unwrap().unwrap().error.as_deref(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_updates_cannot_postpone_delivery_forever() {
        let tracker = tracker();
        let run = tracker.add_run("a");

        let waiter = spawn_wait(&tracker, "a", Some(RunState::default()));
        until_waiting(&tracker, "a").await;

        let start = Instant::now();
        let writer = {
            let run = run.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    run.set_progress(f64::from(i));
                    tokio::time::sleep(Duration::from_millis(40)).await;
                }
            })
        };

        let state = waiter.await.unwrap().unwrap();
        assert!(start.elapsed() <= Duration::from_millis(150));
        assert!(state.progress.is_some());
        writer.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_run_resolves_waiter_immediately() {
        let tracker = tracker();
        let run = tracker.add_run("a");
        run.set_progress(100.0);
        run.set_message("done");

        let waiter = spawn_wait(&tracker, "a", Some(RunState::default()));
        until_waiting(&tracker, "a").await;

        let start = Instant::now();
        tracker.finish_run("a");
        let state = waiter.await.unwrap().unwrap();

        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(state.progress, Some(100.0));
        assert_eq!(state.message.as_deref(), Some("done"));
        assert!(!tracker.has_run("a"));

        // Idempotent.
        tracker.finish_run("a");
        assert!(!tracker.has_run("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_and_keeps_run() {
        let tracker = tracker();
        tracker.add_run("a");

        let start = Instant::now();
        let result = tracker.wait("a", Some(&RunState::default())).await;

        assert_eq!(result, Err(TrackerError::WaitTimeout));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(tracker.has_run("a"));
        assert!(!tracker.has_waiter("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_wait_releases_waiter() {
        let tracker = tracker();
        tracker.add_run("a");

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            tracker.wait("a", Some(&RunState::default())),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(!tracker.has_waiter("a"));

        let state = tracker.wait("a", None).await.unwrap();
        assert_eq!(state, RunState::default());
    }

    #[tokio::test]
    async fn test_setters_clamp_and_ignore_unknown_runs() {
        let tracker = tracker();
        let run = tracker.add_run("a");

        run.set_progress(150.0);
        assert_eq!(tracker.get_run("a").unwrap().progress, Some(100.0));
        run.set_progress(-3.0);
        assert_eq!(tracker.get_run("a").unwrap().progress, Some(0.0));
        run.set_progress(f64::NAN);
        assert_eq!(tracker.get_run("a").unwrap().progress, Some(0.0));

        run.finish();
        run.set_message("after finish");
        assert_eq!(tracker.get_run("a"), None);
        assert_eq!(tracker.run_count(), 0);
    }

    #[tokio::test]
    async fn test_add_run_overwrites_existing_state() {
        let tracker = tracker();
        tracker.add_run("a").set_error("old failure");

        let run = tracker.add_run("a");
        assert_eq!(run.snapshot(), Some(RunState::default()));
        assert_eq!(run.id(), "a");
    }
}
