//! Beacon ranging coordination.
//!
//! [`BeaconRangingCoordinator`] turns asynchronous, best-effort radio
//! callbacks into one deterministic [`Outcome`] per session:
//!
//! ```text
//!  request_ranging ──► preconditions ──► register completion + timer
//!                                              │
//!                              Idle ──────────►│ start session, start_ranging × N
//!                              Ranging ───────►│ attach
//!                                              ▼
//!  radio events ──► resolved / failed accounting ──► all accounted?
//!  timeout      ──────────────────────────────────►  ─┐
//!  stop_ranging ──────────────────────────────────►  ─┴─► stop_ranging × N,
//!                                                        snapshot, flush all
//!                                                        completions, Idle
//! ```
//!
//! A single mutex guards the session and the pending completions. Every
//! transition (register, account, terminate) happens under it, so two events
//! resolving the last two targets concurrently terminate exactly once, and a
//! late event cannot touch a session that has already been cleared.
//! Completions are invoked after the lock is released.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{RangingError, Result};
use crate::observer::{
    EventSink, FailureObserver, LifecycleEvent, StopReason, TracingEventSink,
    TracingFailureObserver,
};
use crate::radio::{PermissionProvider, RadioAdapter, RadioEvent};
use crate::types::{
    BeaconTarget, Outcome, Proximity, RangingState, RangingStatus, SessionSnapshot,
};

/// Default per-completion timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback receiving a session's outcome.
pub type Completion = Box<dyn FnOnce(Outcome) + Send + 'static>;

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`BeaconRangingCoordinator`].
pub struct CoordinatorBuilder {
    radio: Arc<dyn RadioAdapter>,
    permissions: Arc<dyn PermissionProvider>,
    sink: Arc<dyn EventSink>,
    observer: Arc<dyn FailureObserver>,
    timeout: Duration,
    runtime: Option<Handle>,
}

impl CoordinatorBuilder {
    /// Per-completion timeout. Defaults to [`DEFAULT_TIMEOUT`].
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lifecycle trace sink. Defaults to [`TracingEventSink`].
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Observer for rejected requests. Defaults to [`TracingFailureObserver`].
    #[must_use]
    pub fn failure_observer(mut self, observer: Arc<dyn FailureObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Runtime used for timeout timers and the event pump. Defaults to the
    /// runtime current at [`build`](Self::build) time.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`RangingError::NoRuntime`] if no runtime handle was supplied
    /// and none is current.
    pub fn build(self) -> Result<Arc<BeaconRangingCoordinator>> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| RangingError::NoRuntime)?,
        };

        Ok(Arc::new_cyclic(|this| BeaconRangingCoordinator {
            this: this.clone(),
            radio: self.radio,
            permissions: self.permissions,
            sink: self.sink,
            observer: self.observer,
            timeout: self.timeout,
            runtime,
            inner: Mutex::new(Inner::default()),
        }))
    }
}

// ============================================================================
// Session state
// ============================================================================

struct Session {
    generation: u64,
    targets: Vec<BeaconTarget>,
    resolved: HashSet<String>,
    failed: HashSet<String>,
    rssi: BTreeMap<String, i16>,
    proximity: BTreeMap<String, Proximity>,
}

impl Session {
    fn new(generation: u64, targets: Vec<BeaconTarget>) -> Self {
        let mut seen = HashSet::new();
        let targets = targets
            .into_iter()
            .filter(|t| seen.insert(t.id.clone()))
            .collect();

        Self {
            generation,
            targets,
            resolved: HashSet::new(),
            failed: HashSet::new(),
            rssi: BTreeMap::new(),
            proximity: BTreeMap::new(),
        }
    }

    fn contains(&self, region_id: &str) -> bool {
        self.targets.iter().any(|t| t.id == region_id)
    }

    /// A reading always wins over an earlier failure for the same region.
    fn record_update(&mut self, region_id: &str, rssi: i16, proximity: Proximity) -> bool {
        if !self.contains(region_id) {
            return false;
        }
        self.failed.remove(region_id);
        self.resolved.insert(region_id.to_string());
        self.rssi.insert(region_id.to_string(), rssi);
        self.proximity.insert(region_id.to_string(), proximity);
        true
    }

    /// A failure after a reading is ignored; the reading stands.
    fn record_failure(&mut self, region_id: &str) -> bool {
        if !self.contains(region_id) || self.resolved.contains(region_id) {
            return false;
        }
        self.failed.insert(region_id.to_string())
    }

    fn is_complete(&self) -> bool {
        self.resolved.len() + self.failed.len() == self.targets.len()
    }

    fn ids_in(&self, set: &HashSet<String>) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| set.contains(&t.id))
            .map(|t| t.id.clone())
            .collect()
    }

    fn outcome(&self) -> Outcome {
        Outcome {
            status: RangingStatus::Success,
            resolved_ids: self.ids_in(&self.resolved),
            failed_ids: self.ids_in(&self.failed),
            rssi: self.rssi.clone(),
            proximity: self.proximity.clone(),
        }
    }
}

struct PendingCompletion {
    id: u64,
    callback: Option<Completion>,
    timer: CancellationToken,
}

#[derive(Default)]
struct Inner {
    session: Option<Session>,
    pending: Vec<PendingCompletion>,
    next_completion_id: u64,
    generation: u64,
}

/// Everything needed to finish a termination once the lock is released.
struct Flush {
    outcome: Outcome,
    callbacks: Vec<Completion>,
    stopped: LifecycleEvent,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Aggregates per-region radio events into a single outcome per session.
///
/// Construct once at startup with [`builder`](Self::builder) and share the
/// returned `Arc` with every caller and the radio event pump.
pub struct BeaconRangingCoordinator {
    this: Weak<Self>,
    radio: Arc<dyn RadioAdapter>,
    permissions: Arc<dyn PermissionProvider>,
    sink: Arc<dyn EventSink>,
    observer: Arc<dyn FailureObserver>,
    timeout: Duration,
    runtime: Handle,
    inner: Mutex<Inner>,
}

impl BeaconRangingCoordinator {
    /// Start building a coordinator around a radio and a permission source.
    pub fn builder(
        radio: Arc<dyn RadioAdapter>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            radio,
            permissions,
            sink: Arc::new(TracingEventSink),
            observer: Arc::new(TracingFailureObserver),
            timeout: DEFAULT_TIMEOUT,
            runtime: None,
        }
    }

    /// The per-completion timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request ranging of `targets`, delivering the outcome to `on_complete`.
    ///
    /// Returns immediately. Rejections (permission, radio) and empty target
    /// lists are delivered to this caller only, before returning, and never
    /// touch an active session. Otherwise the completion waits on the active
    /// session, starting one if the coordinator is idle. Targets passed while
    /// a session is already active are not added to it.
    pub fn request_ranging(&self, targets: Vec<BeaconTarget>, on_complete: Option<Completion>) {
        if let Err(error) = self.check_preconditions() {
            let status = error
                .outcome_status()
                .unwrap_or(RangingStatus::RadioUnavailable);
            self.observer.on_failure(&error);
            self.sink.record(&LifecycleEvent::RequestRejected { status });
            deliver(on_complete, Outcome::empty(status));
            return;
        }

        if targets.is_empty() {
            debug!("Empty ranging request, completing immediately");
            deliver(on_complete, Outcome::empty(RangingStatus::Success));
            return;
        }

        let mut events = Vec::new();
        let flush = {
            let mut inner = self.inner.lock();

            let id = inner.next_completion_id;
            inner.next_completion_id += 1;
            let timer = self.schedule_timeout(id);
            inner.pending.push(PendingCompletion {
                id,
                callback: on_complete,
                timer,
            });

            let active = inner.session.as_ref().map(|session| session.generation);
            if let Some(generation) = active {
                events.push(LifecycleEvent::CompletionAttached {
                    generation,
                    pending: inner.pending.len(),
                });
                None
            } else {
                inner.generation += 1;
                let mut session = Session::new(inner.generation, targets);
                events.push(LifecycleEvent::SessionStarted {
                    generation: session.generation,
                    targets: session.targets.len(),
                });

                let regions: Vec<_> = session.targets.iter().map(BeaconTarget::region).collect();
                for region in regions {
                    if let Err(error) = self.radio.start_ranging(&region) {
                        warn!(region_id = %region.identifier, %error, "Start ranging failed");
                        session.record_failure(&region.identifier);
                        events.push(LifecycleEvent::RegionFailed {
                            region_id: region.identifier,
                        });
                    }
                }

                let complete = session.is_complete();
                inner.session = Some(session);
                if complete {
                    self.terminate(&mut inner, StopReason::Completed)
                } else {
                    None
                }
            }
        };

        self.emit(&events);
        if let Some(flush) = flush {
            self.finish(flush);
        }
    }

    /// Async convenience over [`request_ranging`](Self::request_ranging).
    pub async fn range(&self, targets: Vec<BeaconTarget>) -> Outcome {
        let (tx, rx) = oneshot::channel();
        self.request_ranging(
            targets,
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        );
        rx.await
            .unwrap_or_else(|_| Outcome::empty(RangingStatus::Success))
    }

    /// Force the active session to end with whatever data it has.
    ///
    /// Safe to call while idle. Returns `true` if this call ended a session,
    /// `false` if there was nothing to stop.
    pub fn stop_ranging(&self) -> bool {
        let flush = {
            let mut inner = self.inner.lock();
            self.terminate(&mut inner, StopReason::Stopped)
        };
        let stopped = flush.is_some();
        if let Some(flush) = flush {
            self.finish(flush);
        }
        stopped
    }

    /// The radio heard `region_id`.
    pub fn on_ranging_update(&self, region_id: &str, rssi: i16, proximity: Proximity) {
        let flush = {
            let mut inner = self.inner.lock();
            let Some(session) = inner.session.as_mut() else {
                debug!(%region_id, "Ignoring ranging update while idle");
                return;
            };
            if !session.record_update(region_id, rssi, proximity) {
                debug!(%region_id, "Ignoring ranging update for unknown region");
                return;
            }
            let complete = session.is_complete();
            if complete {
                self.terminate(&mut inner, StopReason::Completed)
            } else {
                None
            }
        };

        self.sink.record(&LifecycleEvent::RegionResolved {
            region_id: region_id.to_string(),
            rssi,
            proximity,
        });
        if let Some(flush) = flush {
            self.finish(flush);
        }
    }

    /// The radio could not range `region_id`.
    pub fn on_ranging_failed(&self, region_id: &str) {
        self.on_region_failed(region_id);
    }

    /// Region monitoring failed for `region_id`.
    pub fn on_monitoring_failed(&self, region_id: &str) {
        self.on_region_failed(region_id);
    }

    /// Dispatch a radio event to the matching handler.
    pub fn handle_event(&self, event: RadioEvent) {
        match event.translate() {
            Some(RadioEvent::RangingUpdate {
                region_id,
                rssi,
                proximity,
            }) => self.on_ranging_update(&region_id, rssi, proximity),
            Some(RadioEvent::RangingFailed { region_id }) => self.on_ranging_failed(&region_id),
            Some(RadioEvent::MonitoringFailed { region_id }) => {
                self.on_monitoring_failed(&region_id);
            }
            Some(RadioEvent::BeaconsRanged { .. }) | None => {
                debug!("Ranging pass heard no beacons");
            }
        }
    }

    /// Drain `events` into the coordinator until the sender side closes.
    pub fn spawn_event_pump(
        &self,
        mut events: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> JoinHandle<()> {
        let this = self.this.clone();
        self.runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(coordinator) = this.upgrade() else {
                    break;
                };
                coordinator.handle_event(event);
            }
            debug!("Radio event stream closed");
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RangingState {
        if self.inner.lock().session.is_some() {
            RangingState::Ranging
        } else {
            RangingState::Idle
        }
    }

    /// View of the active session, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let inner = self.inner.lock();
        inner.session.as_ref().map(|session| SessionSnapshot {
            generation: session.generation,
            target_ids: session.targets.iter().map(|t| t.id.clone()).collect(),
            resolved_ids: session.ids_in(&session.resolved),
            failed_ids: session.ids_in(&session.failed),
            pending_completions: inner.pending.len(),
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn check_preconditions(&self) -> Result<()> {
        let status = self.permissions.authorization_status();
        if !status.is_authorized() {
            return Err(RangingError::PermissionDenied { status });
        }
        if !self.radio.is_ranging_available() {
            return Err(RangingError::RadioUnavailable);
        }
        Ok(())
    }

    fn on_region_failed(&self, region_id: &str) {
        let flush = {
            let mut inner = self.inner.lock();
            let Some(session) = inner.session.as_mut() else {
                debug!(%region_id, "Ignoring region failure while idle");
                return;
            };
            if !session.record_failure(region_id) {
                debug!(%region_id, "Ignoring failure for unknown or already ranged region");
                return;
            }
            let complete = session.is_complete();
            if complete {
                self.terminate(&mut inner, StopReason::Completed)
            } else {
                None
            }
        };

        self.sink.record(&LifecycleEvent::RegionFailed {
            region_id: region_id.to_string(),
        });
        if let Some(flush) = flush {
            self.finish(flush);
        }
    }

    /// Timer callback. Stale timers (completion already delivered) do nothing.
    fn expire(&self, completion_id: u64) {
        let flush = {
            let mut inner = self.inner.lock();
            if !inner.pending.iter().any(|p| p.id == completion_id) {
                return;
            }
            self.terminate(&mut inner, StopReason::TimedOut)
        };

        self.sink
            .record(&LifecycleEvent::TimeoutFired { completion_id });
        if let Some(flush) = flush {
            self.finish(flush);
        }
    }

    fn schedule_timeout(&self, completion_id: u64) -> CancellationToken {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let this = self.this.clone();
        let timeout = self.timeout;

        self.runtime.spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if let Some(coordinator) = this.upgrade() {
                        coordinator.expire(completion_id);
                    }
                }
            }
        });

        token
    }

    /// Stop the radio for every target, snapshot, and clear all state.
    /// Must be called with the lock held.
    fn terminate(&self, inner: &mut Inner, reason: StopReason) -> Option<Flush> {
        let session = inner.session.take();
        if session.is_none() && inner.pending.is_empty() {
            return None;
        }

        let (generation, outcome) = match &session {
            Some(session) => {
                for target in &session.targets {
                    self.radio.stop_ranging(&target.region());
                }
                (session.generation, session.outcome())
            }
            None => (inner.generation, Outcome::empty(RangingStatus::Success)),
        };

        let delivered = inner.pending.len();
        let callbacks = inner
            .pending
            .drain(..)
            .filter_map(|pending| {
                pending.timer.cancel();
                pending.callback
            })
            .collect();

        Some(Flush {
            stopped: LifecycleEvent::SessionStopped {
                generation,
                reason,
                resolved: outcome.resolved_ids.len(),
                failed: outcome.failed_ids.len(),
                delivered,
            },
            outcome,
            callbacks,
        })
    }

    fn finish(&self, flush: Flush) {
        self.sink.record(&flush.stopped);
        for callback in flush.callbacks {
            callback(flush.outcome.clone());
        }
    }

    fn emit(&self, events: &[LifecycleEvent]) {
        for event in events {
            self.sink.record(event);
        }
    }
}

impl Drop for BeaconRangingCoordinator {
    fn drop(&mut self) {
        for pending in self.inner.get_mut().pending.drain(..) {
            pending.timer.cancel();
        }
    }
}

fn deliver(callback: Option<Completion>, outcome: Outcome) {
    if let Some(callback) = callback {
        callback(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::{RangedBeacon, StaticPermission};
    use crate::simulated::SimulatedRadio;
    use crate::types::AuthorizationStatus;
    use uuid::Uuid;

    type Outcomes = Arc<Mutex<Vec<Outcome>>>;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<LifecycleEvent>>);

    impl EventSink for RecordingSink {
        fn record(&self, event: &LifecycleEvent) {
            self.0.lock().push(event.clone());
        }
    }

    impl RecordingSink {
        fn stops(&self) -> Vec<StopReason> {
            self.0
                .lock()
                .iter()
                .filter_map(|e| match e {
                    LifecycleEvent::SessionStopped { reason, .. } => Some(*reason),
                    _ => None,
                })
                .collect()
        }

        fn timeouts(&self) -> usize {
            self.0
                .lock()
                .iter()
                .filter(|e| matches!(e, LifecycleEvent::TimeoutFired { .. }))
                .count()
        }
    }

    #[derive(Default)]
    struct RecordingObserver(Mutex<Vec<String>>);

    impl FailureObserver for RecordingObserver {
        fn on_failure(&self, error: &RangingError) {
            self.0.lock().push(error.error_code().to_string());
        }
    }

    struct Harness {
        radio: Arc<SimulatedRadio>,
        sink: Arc<RecordingSink>,
        failures: Arc<RecordingObserver>,
        coordinator: Arc<BeaconRangingCoordinator>,
    }

    fn harness(status: AuthorizationStatus, available: bool) -> Harness {
        let (radio, _events) = SimulatedRadio::new(available);
        let radio = Arc::new(radio);
        let sink = Arc::new(RecordingSink::default());
        let failures = Arc::new(RecordingObserver::default());
        let coordinator = BeaconRangingCoordinator::builder(
            radio.clone(),
            Arc::new(StaticPermission(status)),
        )
        .event_sink(sink.clone())
        .failure_observer(failures.clone())
        .build()
        .unwrap();

        Harness {
            radio,
            sink,
            failures,
            coordinator,
        }
    }

    fn authorized() -> Harness {
        harness(AuthorizationStatus::Always, true)
    }

    fn target(id: &str) -> BeaconTarget {
        BeaconTarget::new(id, Uuid::nil(), 100, 1)
    }

    fn targets(ids: &[&str]) -> Vec<BeaconTarget> {
        ids.iter().map(|id| target(id)).collect()
    }

    fn capture(outcomes: &Outcomes) -> Option<Completion> {
        let outcomes = outcomes.clone();
        Some(Box::new(move |outcome| outcomes.lock().push(outcome)))
    }

    #[tokio::test]
    async fn test_request_starts_one_command_per_distinct_target() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator
            .request_ranging(targets(&["a", "b", "a"]), capture(&outcomes));

        assert_eq!(h.coordinator.state(), RangingState::Ranging);
        assert_eq!(h.radio.start_count("a"), 1);
        assert_eq!(h.radio.start_count("b"), 1);
        assert_eq!(
            h.coordinator.snapshot().unwrap().target_ids,
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(outcomes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_update_and_failure_terminate_session() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator
            .request_ranging(targets(&["A", "B"]), capture(&outcomes));
        h.coordinator.on_ranging_update("A", -60, Proximity::Near);
        assert_eq!(h.coordinator.state(), RangingState::Ranging);
        h.coordinator.on_ranging_failed("B");

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.status, RangingStatus::Success);
        assert_eq!(outcome.resolved_ids, vec!["A".to_string()]);
        assert_eq!(outcome.failed_ids, vec!["B".to_string()]);
        assert_eq!(outcome.rssi.get("A"), Some(&-60));
        assert_eq!(outcome.rssi.len(), 1);
        assert_eq!(outcome.proximity.get("A"), Some(&Proximity::Near));

        assert_eq!(h.radio.stop_count("A"), 1);
        assert_eq!(h.radio.stop_count("B"), 1);
        assert!(h.radio.active_regions().is_empty());
        assert_eq!(h.coordinator.state(), RangingState::Idle);
        assert_eq!(h.sink.stops(), vec![StopReason::Completed]);
    }

    #[tokio::test]
    async fn test_monitoring_failure_counts_toward_termination() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&outcomes));
        h.coordinator.on_monitoring_failed("a");

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].resolved_ids.is_empty());
        assert_eq!(outcomes[0].failed_ids, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_targets_complete_immediately() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(Vec::new(), capture(&outcomes));

        assert_eq!(
            outcomes.lock().as_slice(),
            &[Outcome::empty(RangingStatus::Success)]
        );
        assert!(h.radio.commands().is_empty());
        assert_eq!(h.coordinator.state(), RangingState::Idle);
    }

    #[tokio::test]
    async fn test_empty_targets_do_not_touch_active_session() {
        let h = authorized();
        let first = Outcomes::default();
        let second = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&first));
        h.coordinator.request_ranging(Vec::new(), capture(&second));

        assert_eq!(second.lock().len(), 1);
        assert!(first.lock().is_empty());
        assert_eq!(h.coordinator.snapshot().unwrap().pending_completions, 1);
    }

    #[tokio::test]
    async fn test_permission_denied_rejects_without_radio() {
        let h = harness(AuthorizationStatus::Denied, true);
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(targets(&["A"]), capture(&outcomes));

        assert_eq!(
            outcomes.lock().as_slice(),
            &[Outcome::empty(RangingStatus::PermissionDenied)]
        );
        assert_eq!(h.failures.0.lock().as_slice(), &["PERMISSION_DENIED"]);
        assert!(h.radio.commands().is_empty());
        assert_eq!(h.coordinator.state(), RangingState::Idle);
    }

    #[tokio::test]
    async fn test_permission_checked_before_radio() {
        let h = harness(AuthorizationStatus::NotDetermined, false);
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(targets(&["A"]), capture(&outcomes));

        assert_eq!(outcomes.lock()[0].status, RangingStatus::PermissionDenied);
        assert_eq!(h.failures.0.lock().as_slice(), &["PERMISSION_DENIED"]);
    }

    #[tokio::test]
    async fn test_when_in_use_is_authorized() {
        let h = harness(AuthorizationStatus::WhenInUse, true);
        h.coordinator.request_ranging(targets(&["A"]), None);
        assert_eq!(h.coordinator.state(), RangingState::Ranging);
    }

    #[tokio::test]
    async fn test_radio_unavailable_rejects() {
        let h = harness(AuthorizationStatus::Always, false);
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(targets(&["A"]), capture(&outcomes));

        assert_eq!(outcomes.lock()[0].status, RangingStatus::RadioUnavailable);
        assert_eq!(h.failures.0.lock().as_slice(), &["RADIO_UNAVAILABLE"]);
        assert!(h.radio.commands().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_leaves_active_session_alone() {
        let h = authorized();
        let first = Outcomes::default();
        let second = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&first));
        h.radio.set_available(false);
        h.coordinator.request_ranging(targets(&["a"]), capture(&second));

        assert_eq!(second.lock()[0].status, RangingStatus::RadioUnavailable);
        assert!(first.lock().is_empty());
        assert_eq!(h.coordinator.state(), RangingState::Ranging);
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let h = authorized();

        assert!(!h.coordinator.stop_ranging());
        assert!(!h.coordinator.stop_ranging());

        assert!(h.radio.commands().is_empty());
        assert!(h.sink.stops().is_empty());
    }

    #[tokio::test]
    async fn test_stop_flushes_partial_data() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator
            .request_ranging(targets(&["a", "b"]), capture(&outcomes));
        h.coordinator.on_ranging_update("b", -71, Proximity::Far);
        assert!(h.coordinator.stop_ranging());
        assert!(!h.coordinator.stop_ranging());

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, RangingStatus::Success);
        assert_eq!(outcomes[0].resolved_ids, vec!["b".to_string()]);
        assert_eq!(h.radio.stop_count("a"), 1);
        assert_eq!(h.radio.stop_count("b"), 1);
        assert_eq!(h.sink.stops(), vec![StopReason::Stopped]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_session() {
        let h = authorized();
        let first = Outcomes::default();
        let second = Outcomes::default();

        h.coordinator
            .request_ranging(targets(&["a", "b"]), capture(&first));
        h.coordinator
            .request_ranging(targets(&["a", "c"]), capture(&second));

        assert_eq!(h.radio.start_count("a"), 1);
        assert_eq!(h.radio.start_count("b"), 1);
        assert_eq!(h.radio.start_count("c"), 0);
        assert_eq!(h.coordinator.snapshot().unwrap().pending_completions, 2);

        h.coordinator.on_ranging_update("a", -50, Proximity::Immediate);
        h.coordinator.on_ranging_update("b", -65, Proximity::Near);

        let first = first.lock();
        let second = second.lock();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0], second[0]);
        assert_eq!(first[0].resolved_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_delivers_partial_outcome() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator
            .request_ranging(targets(&["a", "b", "c"]), capture(&outcomes));
        h.coordinator.on_ranging_update("b", -58, Proximity::Near);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(outcomes.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, RangingStatus::Success);
        assert_eq!(outcomes[0].resolved_ids, vec!["b".to_string()]);
        for id in ["a", "b", "c"] {
            assert_eq!(h.radio.stop_count(id), 1);
        }
        assert_eq!(h.coordinator.state(), RangingState::Idle);
        assert_eq!(h.sink.stops(), vec![StopReason::TimedOut]);
        assert_eq!(h.sink.timeouts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_timeout_flushes_every_completion() {
        let h = authorized();
        let first = Outcomes::default();
        let second = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&first));
        tokio::time::sleep(Duration::from_secs(2)).await;
        h.coordinator.request_ranging(targets(&["a"]), capture(&second));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(first.lock().len(), 1);
        assert_eq!(second.lock().len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.sink.timeouts(), 1);
        assert_eq!(h.radio.stop_count("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_cancelled_after_completion() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&outcomes));
        h.coordinator.on_ranging_update("a", -60, Proximity::Near);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(outcomes.lock().len(), 1);
        assert_eq!(h.radio.stop_count("a"), 1);
        assert_eq!(h.sink.timeouts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_stop_next_session() {
        let h = authorized();
        let first = Outcomes::default();
        let second = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&first));
        tokio::time::sleep(Duration::from_secs(3)).await;
        h.coordinator.stop_ranging();
        h.coordinator.request_ranging(targets(&["b"]), capture(&second));

        // The first completion's deadline (t=5) passes.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.coordinator.state(), RangingState::Ranging);
        assert!(second.lock().is_empty());

        // The second completion's own deadline (t=8) passes.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.coordinator.state(), RangingState::Idle);
        assert_eq!(first.lock().len(), 1);
        assert_eq!(second.lock().len(), 1);
        assert_eq!(h.sink.stops(), vec![StopReason::Stopped, StopReason::TimedOut]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_still_times_out() {
        let h = authorized();

        h.coordinator.request_ranging(targets(&["a"]), None);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(h.coordinator.state(), RangingState::Idle);
        assert_eq!(h.radio.stop_count("a"), 1);
    }

    #[tokio::test]
    async fn test_late_event_does_not_resurrect_session() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&outcomes));
        h.coordinator.stop_ranging();
        h.coordinator.on_ranging_update("a", -60, Proximity::Near);
        h.coordinator.on_ranging_failed("a");

        assert_eq!(h.coordinator.state(), RangingState::Idle);
        assert_eq!(outcomes.lock().len(), 1);
        assert!(outcomes.lock()[0].resolved_ids.is_empty());
    }

    #[tokio::test]
    async fn test_next_session_is_isolated() {
        let h = authorized();
        let first = Outcomes::default();
        let second = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&first));
        h.coordinator.on_ranging_update("a", -60, Proximity::Near);

        h.coordinator.request_ranging(targets(&["c"]), capture(&second));
        assert_eq!(h.coordinator.snapshot().unwrap().generation, 2);
        assert_eq!(h.radio.start_count("a"), 1);
        assert_eq!(h.radio.start_count("c"), 1);

        h.coordinator.on_ranging_failed("c");
        assert_eq!(first.lock().len(), 1);
        assert_eq!(second.lock()[0].failed_ids, vec!["c".to_string()]);
        assert!(second.lock()[0].rssi.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_region_events_ignored() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&outcomes));
        h.coordinator.on_ranging_update("zzz", -40, Proximity::Immediate);
        h.coordinator.on_ranging_failed("zzz");

        assert!(outcomes.lock().is_empty());
        assert!(h.coordinator.snapshot().unwrap().resolved_ids.is_empty());
    }

    #[tokio::test]
    async fn test_update_overrides_failure_but_not_reverse() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator
            .request_ranging(targets(&["a", "b", "c"]), capture(&outcomes));
        h.coordinator.on_ranging_failed("a");
        h.coordinator.on_ranging_update("a", -62, Proximity::Near);
        h.coordinator.on_ranging_update("b", -70, Proximity::Far);
        h.coordinator.on_ranging_failed("b");

        let snapshot = h.coordinator.snapshot().unwrap();
        assert_eq!(snapshot.resolved_ids, vec!["a".to_string(), "b".to_string()]);
        assert!(snapshot.failed_ids.is_empty());
        assert!(outcomes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refused_start_counts_as_failure() {
        let h = authorized();
        let outcomes = Outcomes::default();
        h.radio.refuse_region("b");

        h.coordinator
            .request_ranging(targets(&["a", "b"]), capture(&outcomes));
        assert_eq!(h.coordinator.snapshot().unwrap().failed_ids, vec!["b".to_string()]);

        h.coordinator.on_ranging_update("a", -60, Proximity::Near);
        assert_eq!(outcomes.lock()[0].failed_ids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_all_starts_refused_terminates_immediately() {
        let h = authorized();
        let outcomes = Outcomes::default();
        h.radio.refuse_region("a");

        h.coordinator.request_ranging(targets(&["a"]), capture(&outcomes));

        assert_eq!(outcomes.lock().len(), 1);
        assert_eq!(h.coordinator.state(), RangingState::Idle);
        assert_eq!(h.radio.stop_count("a"), 1);
    }

    #[tokio::test]
    async fn test_handle_event_translates_beacons_ranged() {
        let h = authorized();
        let outcomes = Outcomes::default();

        h.coordinator.request_ranging(targets(&["a"]), capture(&outcomes));
        h.coordinator.handle_event(RadioEvent::BeaconsRanged {
            region_id: "a".into(),
            beacons: vec![],
        });
        assert!(outcomes.lock().is_empty());

        h.coordinator.handle_event(RadioEvent::BeaconsRanged {
            region_id: "a".into(),
            beacons: vec![
                RangedBeacon {
                    rssi: -80,
                    proximity: Proximity::Far,
                },
                RangedBeacon {
                    rssi: -55,
                    proximity: Proximity::Near,
                },
            ],
        });
        assert_eq!(outcomes.lock()[0].rssi.get("a"), Some(&-55));
    }

    #[tokio::test]
    async fn test_range_with_event_pump() {
        let (radio, events) = SimulatedRadio::new(true);
        let radio = Arc::new(radio);
        let coordinator = BeaconRangingCoordinator::builder(
            radio.clone(),
            Arc::new(StaticPermission(AuthorizationStatus::Always)),
        )
        .build()
        .unwrap();
        let pump = coordinator.spawn_event_pump(events);

        let emitter = async {
            tokio::task::yield_now().await;
            radio.emit(RadioEvent::RangingUpdate {
                region_id: "a".into(),
                rssi: -60,
                proximity: Proximity::Near,
            });
            radio.emit(RadioEvent::MonitoringFailed {
                region_id: "b".into(),
            });
        };
        let (outcome, ()) = tokio::join!(coordinator.range(targets(&["a", "b"])), emitter);

        assert_eq!(outcome.resolved_ids, vec!["a".to_string()]);
        assert_eq!(outcome.failed_ids, vec!["b".to_string()]);

        // The radio owns the event sender; the stream ends once both the
        // coordinator and the test release it.
        drop(coordinator);
        drop(radio);
        pump.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_requests_attach_to_one_session() {
        let h = authorized();
        let outcomes = Outcomes::default();

        std::thread::scope(|scope| {
            for _ in 0..16 {
                let coordinator = &h.coordinator;
                let outcomes = &outcomes;
                scope.spawn(move || {
                    coordinator.request_ranging(targets(&["a"]), capture(outcomes));
                });
            }
        });

        assert_eq!(h.radio.start_count("a"), 1);
        let snapshot = h.coordinator.snapshot().unwrap();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.pending_completions, 16);

        h.coordinator.on_ranging_update("a", -58, Proximity::Near);

        let outcomes = outcomes.lock();
        assert_eq!(outcomes.len(), 16);
        assert!(outcomes.iter().all(|o| *o == outcomes[0]));
        assert_eq!(outcomes[0].resolved_ids, vec!["a".to_string()]);
        assert_eq!(h.radio.stop_count("a"), 1);
        assert_eq!(h.sink.stops(), vec![StopReason::Completed]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_events_terminate_exactly_once() {
        let h = authorized();
        let outcomes = Outcomes::default();
        let ids: Vec<String> = (0..64).map(|i| format!("beacon-{i}")).collect();
        let session_targets = ids.iter().map(|id| target(id)).collect();

        h.coordinator
            .request_ranging(session_targets, capture(&outcomes));

        std::thread::scope(|scope| {
            for (i, id) in ids.iter().enumerate() {
                let coordinator = &h.coordinator;
                scope.spawn(move || {
                    if i % 2 == 0 {
                        coordinator.on_ranging_update(id, -60, Proximity::Near);
                    } else {
                        coordinator.on_ranging_failed(id);
                    }
                    coordinator.stop_ranging();
                });
            }
        });

        assert_eq!(outcomes.lock().len(), 1);
        assert_eq!(h.sink.stops().len(), 1);
        for id in &ids {
            assert_eq!(h.radio.stop_count(id), 1);
        }
        assert_eq!(h.coordinator.state(), RangingState::Idle);
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let (radio, _events) = SimulatedRadio::new(true);
        let result = BeaconRangingCoordinator::builder(
            Arc::new(radio),
            Arc::new(StaticPermission(AuthorizationStatus::Always)),
        )
        .build();
        assert!(matches!(result, Err(RangingError::NoRuntime)));
    }

    #[test]
    fn test_build_with_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let (radio, _events) = SimulatedRadio::new(true);
        let coordinator = BeaconRangingCoordinator::builder(
            Arc::new(radio),
            Arc::new(StaticPermission(AuthorizationStatus::Always)),
        )
        .timeout(Duration::from_millis(250))
        .runtime(runtime.handle().clone())
        .build()
        .unwrap();

        assert_eq!(coordinator.timeout(), Duration::from_millis(250));
        assert_eq!(coordinator.state(), RangingState::Idle);
    }
}
