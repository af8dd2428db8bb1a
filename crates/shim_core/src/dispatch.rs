//! # Dispatch Engine
//!
//! Holds the events produced by feature subsystems and decides, once per
//! cycle, what happens to them.
//!
//! ## Automatic mode
//!
//! Completed call results are handed to the targets waiting on their id and
//! fired callbacks to the targets registered for their kind. The work is
//! collected while the state is borrowed and delivered after the borrow is
//! released, so a target may call back into the context.
//!
//! ## Manual mode
//!
//! Nothing is delivered. Fired callbacks are appended to the producing role's
//! [`EventQueue`]; a completed call result is announced there with a
//! [`CALL_COMPLETED_KIND`] event and stays available for
//! [`EventStore::take_call_result`].

use crate::callbacks::{CallbackTarget, Registrations};
use crate::error::{Result, ShimError};
use crate::queue::{CallCompleted, EventQueue, QueuedEvent, CALL_COMPLETED_KIND};
use crate::types::{CallId, PerRole, Role};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DispatchMode {
    Automatic,
    Manual,
}

/// Counters describing dispatch activity of a context.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DispatchStats {
    pub cycles: u64,
    pub keepalive_cycles: u64,
    pub callbacks_delivered: u64,
    pub call_results_delivered: u64,
    pub events_queued: u64,
    pub aggregates_built: u64,
    pub aggregates_destroyed: u64,
}

#[derive(Debug)]
struct PendingResult {
    kind: i32,
    payload: Arc<[u8]>,
    failed: bool,
    ready_at: Instant,
    announced: bool,
}

#[derive(Debug, Default)]
struct RoleEvents {
    fired: VecDeque<QueuedEvent>,
    results: BTreeMap<CallId, PendingResult>,
    queue: EventQueue,
}

/// Work handed to a target outside the state borrow.
pub(crate) enum Delivery {
    Callback {
        target: Arc<dyn CallbackTarget>,
        payload: Arc<[u8]>,
    },
    CallResult {
        target: Arc<dyn CallbackTarget>,
        call: CallId,
        payload: Arc<[u8]>,
        failed: bool,
    },
}

impl Delivery {
    pub(crate) fn deliver(self) {
        match self {
            Delivery::Callback { target, payload } => target.run(&payload),
            Delivery::CallResult {
                target,
                call,
                payload,
                failed,
            } => target.run_call_result(&payload, failed, call),
        }
    }
}

/// Events, results and manual queues owned by one aggregate.
#[derive(Debug)]
pub struct EventStore {
    roles: PerRole<RoleEvents>,
    next_call: u64,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            roles: PerRole::default(),
            next_call: 1,
        }
    }

    /// Records a fired callback for the next cycle.
    pub fn post_callback(&mut self, role: Role, kind: i32, payload: impl Into<Arc<[u8]>>) {
        trace!("Posting {} callback {}", role, kind);
        self.roles
            .get_mut(role)
            .fired
            .push_back(QueuedEvent::new(kind, payload));
    }

    /// Records a call result that completes after `delay` and returns its id.
    pub fn post_call_result(
        &mut self,
        role: Role,
        kind: i32,
        payload: impl Into<Arc<[u8]>>,
        failed: bool,
        delay: Duration,
    ) -> CallId {
        let call = CallId(self.next_call);
        self.next_call += 1;
        trace!("Posting {} call result {} of kind {}", role, call, kind);
        self.roles.get_mut(role).results.insert(
            call,
            PendingResult {
                kind,
                payload: payload.into(),
                failed,
                ready_at: Instant::now() + delay,
                announced: false,
            },
        );
        call
    }

    /// Removes a completed result after checking its kind and size.
    ///
    /// Returns the payload and the failure flag.
    pub fn take_call_result(
        &mut self,
        role: Role,
        call: CallId,
        expected_kind: i32,
        capacity: usize,
    ) -> Result<(Arc<[u8]>, bool)> {
        let results = &mut self.roles.get_mut(role).results;
        let Some(pending) = results.get(&call) else {
            return Err(ShimError::ResultUnavailable(call));
        };
        if pending.ready_at > Instant::now() {
            return Err(ShimError::ResultUnavailable(call));
        }
        if pending.kind != expected_kind {
            return Err(ShimError::KindMismatch {
                call,
                expected: expected_kind,
                actual: pending.kind,
            });
        }
        if pending.payload.len() > capacity {
            return Err(ShimError::BufferTooSmall {
                provided: capacity,
                required: pending.payload.len(),
            });
        }
        let pending = results
            .remove(&call)
            .ok_or(ShimError::ResultUnavailable(call))?;
        Ok((pending.payload, pending.failed))
    }

    pub fn queue(&self, role: Role) -> &EventQueue {
        &self.roles.get(role).queue
    }

    pub fn queue_mut(&mut self, role: Role) -> &mut EventQueue {
        &mut self.roles.get_mut(role).queue
    }

    pub fn pending_results(&self, role: Role) -> usize {
        self.roles.get(role).results.len()
    }

    pub fn pending_callbacks(&self, role: Role) -> usize {
        self.roles.get(role).fired.len()
    }

    /// Collects one cycle worth of work.
    ///
    /// Call results of the selected roles come first, then server callbacks,
    /// then client callbacks.
    pub(crate) fn collect(
        &mut self,
        registrations: &mut Registrations,
        stats: &mut DispatchStats,
        mode: DispatchMode,
        run_client: bool,
        run_server: bool,
        now: Instant,
    ) -> Vec<Delivery> {
        let mut work = Vec::new();

        let result_roles = [(Role::Client, run_client), (Role::Server, run_server)];
        for (role, selected) in result_roles {
            if selected {
                self.collect_results(role, registrations, stats, mode, now, &mut work);
            }
        }

        for role in [Role::Server, Role::Client] {
            self.collect_callbacks(role, registrations, stats, mode, &mut work);
        }

        work
    }

    fn collect_results(
        &mut self,
        role: Role,
        registrations: &mut Registrations,
        stats: &mut DispatchStats,
        mode: DispatchMode,
        now: Instant,
        work: &mut Vec<Delivery>,
    ) {
        let events = self.roles.get_mut(role);
        let ready: Vec<CallId> = events
            .results
            .iter()
            .filter(|(_, pending)| pending.ready_at <= now)
            .map(|(call, _)| *call)
            .collect();

        for call in ready {
            match mode {
                DispatchMode::Manual => {
                    let Some(pending) = events.results.get_mut(&call) else {
                        continue;
                    };
                    if pending.announced {
                        continue;
                    }
                    pending.announced = true;
                    let completed = CallCompleted {
                        call,
                        kind: pending.kind,
                        size: pending.payload.len() as u32,
                    };
                    events
                        .queue
                        .push(QueuedEvent::new(CALL_COMPLETED_KIND, completed.encode().to_vec()));
                    stats.events_queued += 1;
                }
                DispatchMode::Automatic => {
                    let targets = registrations.take_call_targets(role, call);
                    if targets.is_empty() {
                        continue;
                    }
                    let Some(pending) = events.results.remove(&call) else {
                        continue;
                    };
                    stats.call_results_delivered += targets.len() as u64;
                    work.extend(targets.into_iter().map(|target| Delivery::CallResult {
                        target,
                        call,
                        payload: pending.payload.clone(),
                        failed: pending.failed,
                    }));
                }
            }
        }
    }

    fn collect_callbacks(
        &mut self,
        role: Role,
        registrations: &Registrations,
        stats: &mut DispatchStats,
        mode: DispatchMode,
        work: &mut Vec<Delivery>,
    ) {
        let events = self.roles.get_mut(role);
        let fired: Vec<QueuedEvent> = events.fired.drain(..).collect();

        for event in fired {
            match mode {
                DispatchMode::Manual => {
                    events.queue.push(event);
                    stats.events_queued += 1;
                }
                DispatchMode::Automatic => {
                    let targets = registrations.callbacks(role).targets(event.kind);
                    if targets.is_empty() {
                        trace!("No {} target for callback {}, dropping", role, event.kind);
                        continue;
                    }
                    stats.callbacks_delivered += targets.len() as u64;
                    work.extend(targets.into_iter().map(|target| Delivery::Callback {
                        target,
                        payload: event.payload.clone(),
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        kind: i32,
        server: bool,
        seen: Mutex<Vec<(i32, Vec<u8>)>>,
        results: Mutex<Vec<(CallId, Vec<u8>, bool)>>,
    }

    impl CallbackTarget for Recorder {
        fn kind(&self) -> i32 {
            self.kind
        }

        fn is_game_server(&self) -> bool {
            self.server
        }

        fn run(&self, payload: &[u8]) {
            self.seen.lock().unwrap().push((self.kind, payload.to_vec()));
        }

        fn run_call_result(&self, payload: &[u8], io_failure: bool, call: CallId) {
            self.results
                .lock()
                .unwrap()
                .push((call, payload.to_vec(), io_failure));
        }
    }

    fn run_all(work: Vec<Delivery>) {
        for delivery in work {
            delivery.deliver();
        }
    }

    #[test]
    fn test_automatic_callbacks_reach_registered_targets() {
        let mut store = EventStore::new();
        let mut registrations = Registrations::default();
        let mut stats = DispatchStats::default();
        let recorder = Arc::new(Recorder {
            kind: 100,
            ..Default::default()
        });
        registrations.register_callback(recorder.clone(), 100);

        store.post_callback(Role::Client, 100, vec![1, 2, 3]);
        store.post_callback(Role::Client, 999, vec![9]);
        let work = store.collect(
            &mut registrations,
            &mut stats,
            DispatchMode::Automatic,
            true,
            false,
            Instant::now(),
        );
        run_all(work);

        assert_eq!(*recorder.seen.lock().unwrap(), vec![(100, vec![1, 2, 3])]);
        assert_eq!(stats.callbacks_delivered, 1);
        assert_eq!(store.pending_callbacks(Role::Client), 0);
    }

    #[test]
    fn test_call_result_waits_for_selected_role() {
        let mut store = EventStore::new();
        let mut registrations = Registrations::default();
        let mut stats = DispatchStats::default();
        let recorder = Arc::new(Recorder {
            kind: 1101,
            ..Default::default()
        });

        let call = store.post_call_result(Role::Server, 1101, vec![7], false, Duration::ZERO);
        registrations.register_call_result(recorder.clone(), call);

        let work = store.collect(
            &mut registrations,
            &mut stats,
            DispatchMode::Automatic,
            true,
            false,
            Instant::now(),
        );
        assert!(work.is_empty());

        let work = store.collect(
            &mut registrations,
            &mut stats,
            DispatchMode::Automatic,
            false,
            true,
            Instant::now(),
        );
        run_all(work);

        assert_eq!(*recorder.results.lock().unwrap(), vec![(call, vec![7], false)]);
        assert_eq!(store.pending_results(Role::Server), 0);
    }

    #[test]
    fn test_delayed_result_is_not_ready_early() {
        let mut store = EventStore::new();
        let call = store.post_call_result(
            Role::Client,
            1101,
            vec![1],
            false,
            Duration::from_secs(60),
        );
        assert_eq!(
            store.take_call_result(Role::Client, call, 1101, 16),
            Err(ShimError::ResultUnavailable(call))
        );
    }

    #[test]
    fn test_manual_mode_queues_instead_of_delivering() {
        let mut store = EventStore::new();
        let mut registrations = Registrations::default();
        let mut stats = DispatchStats::default();
        let recorder = Arc::new(Recorder {
            kind: 100,
            ..Default::default()
        });
        registrations.register_callback(recorder.clone(), 100);

        store.post_callback(Role::Client, 100, vec![5]);
        let call = store.post_call_result(Role::Client, 1101, vec![1, 2], true, Duration::ZERO);
        let work = store.collect(
            &mut registrations,
            &mut stats,
            DispatchMode::Manual,
            true,
            false,
            Instant::now(),
        );

        assert!(work.is_empty());
        assert!(recorder.seen.lock().unwrap().is_empty());

        let queue = store.queue_mut(Role::Client);
        assert_eq!(queue.len(), 2);
        let announcement = queue.peek().cloned().unwrap();
        assert_eq!(announcement.kind, CALL_COMPLETED_KIND);
        let completed = CallCompleted::decode(&announcement.payload).unwrap();
        assert_eq!(completed.call, call);
        assert_eq!(completed.size, 2);
        queue.acknowledge();
        assert_eq!(queue.peek().unwrap().kind, 100);

        let (payload, failed) = store.take_call_result(Role::Client, call, 1101, 2).unwrap();
        assert_eq!(&payload[..], &[1, 2]);
        assert!(failed);

        // A second cycle does not announce the same result twice.
        let work = store.collect(
            &mut registrations,
            &mut stats,
            DispatchMode::Manual,
            true,
            false,
            Instant::now(),
        );
        assert!(work.is_empty());
        assert_eq!(store.queue(Role::Client).len(), 1);
    }

    #[test]
    fn test_take_call_result_checks_kind_and_size() {
        let mut store = EventStore::new();
        let call = store.post_call_result(Role::Client, 1101, vec![0; 8], false, Duration::ZERO);

        assert!(matches!(
            store.take_call_result(Role::Client, call, 1102, 8),
            Err(ShimError::KindMismatch { .. })
        ));
        assert!(matches!(
            store.take_call_result(Role::Client, call, 1101, 4),
            Err(ShimError::BufferTooSmall { .. })
        ));
        assert_eq!(
            store.take_call_result(Role::Server, call, 1101, 8),
            Err(ShimError::ResultUnavailable(call))
        );
        assert!(store.take_call_result(Role::Client, call, 1101, 8).is_ok());
        assert!(store.take_call_result(Role::Client, call, 1101, 8).is_err());
    }

    #[test]
    fn test_call_ids_are_unique_and_nonzero() {
        let mut store = EventStore::new();
        let first = store.post_call_result(Role::Client, 1, vec![], false, Duration::ZERO);
        let second = store.post_call_result(Role::Server, 1, vec![], false, Duration::ZERO);
        assert!(first.is_valid());
        assert!(second > first);
    }
}
