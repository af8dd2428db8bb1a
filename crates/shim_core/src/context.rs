//! # Shim Context
//!
//! The object every entry point operates on. It owns the aggregate, the
//! caller registrations and the legacy accessor cache, all behind one
//! re-entrant lock.
//!
//! ## Locking
//!
//! Every operation takes the context lock. The state inside it sits in a
//! `RefCell` that is only ever borrowed for short, non-reentrant sections:
//! collaborators, periodic actions and callback targets are invoked after
//! the borrow is released, so they may call back into the context from the
//! same thread.
//!
//! ## Lifecycle
//!
//! The aggregate is built when a pipe is created while none exists and
//! retired when the last pipe is released. The generation counter moves on
//! every successful bind and never goes back.

use crate::callbacks::{CallbackTarget, Registrations};
use crate::collaborators::{DefaultSubsystems, PeriodicAction, PeriodicId, SubsystemFactory};
use crate::config::ShimConfig;
use crate::dispatch::{Delivery, DispatchMode, DispatchStats};
use crate::error::{Result, ShimError};
use crate::keepalive::{is_stalled, KeepaliveState, StopSignal};
use crate::legacy::LegacyInterfaces;
use crate::lifecycle::{Aggregate, ContextBlock, SessionFlags};
use crate::resolver::{Capabilities, Family, InterfaceAdapter, InterfaceTable, Resolution};
use crate::types::{CallId, PipeHandle, PipeRole, Role, UserHandle};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// An event handed out by manual dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackMessage {
    pub user: UserHandle,
    pub kind: i32,
    pub payload: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy)]
enum Cycle {
    Pump { run_client: bool, run_server: bool },
    Keepalive,
}

struct ContextState {
    aggregate: Option<Aggregate>,
    registrations: Registrations,
    legacy: LegacyInterfaces,
    client_pipe: Option<PipeHandle>,
    server_pipe: Option<PipeHandle>,
    stats: DispatchStats,
}

struct Inner {
    config: ShimConfig,
    factory: Arc<dyn SubsystemFactory>,
    table: &'static InterfaceTable,
    state: ReentrantMutex<RefCell<ContextState>>,
    alive: AtomicBool,
    generation: AtomicU64,
    manual: AtomicBool,
    /// Client capability latches. Unlike the server ones they outlive the aggregate.
    client_caps: AtomicU32,
    dispatch_active: AtomicBool,
    last_dispatch_ms: AtomicU64,
    epoch: Instant,
}

/// Clears the in-progress flag and stamps the dispatch time when a cycle ends.
struct ActiveCycle<'a> {
    inner: &'a Inner,
}

impl Drop for ActiveCycle<'_> {
    fn drop(&mut self) {
        self.inner
            .last_dispatch_ms
            .store(self.inner.now_ms(), Ordering::Release);
        self.inner.dispatch_active.store(false, Ordering::Release);
    }
}

impl Inner {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn mode(&self) -> DispatchMode {
        if self.manual.load(Ordering::Acquire) {
            DispatchMode::Manual
        } else {
            DispatchMode::Automatic
        }
    }

    /// Runs one cycle. The caller holds the context lock.
    fn run_cycle_locked(&self, cell: &RefCell<ContextState>, cycle: Cycle) -> bool {
        if self.dispatch_active.swap(true, Ordering::AcqRel) {
            trace!("Dispatch already in progress, skipping nested cycle");
            return false;
        }
        let _active = ActiveCycle { inner: self };

        let (transport, periodic, server) = {
            let state = cell.borrow();
            let Some(aggregate) = state.aggregate.as_ref() else {
                return false;
            };
            (
                aggregate.transport.clone(),
                aggregate.periodic.snapshot(),
                aggregate.server.clone(),
            )
        };

        transport.drain();
        for action in periodic {
            action();
        }

        let (run_client, run_server) = match cycle {
            Cycle::Keepalive => {
                cell.borrow_mut().stats.keepalive_cycles += 1;
                return true;
            }
            Cycle::Pump {
                run_client,
                run_server,
            } => (run_client, run_server),
        };

        server.run_callbacks();

        let work: Vec<Delivery> = {
            let mut guard = cell.borrow_mut();
            let state = &mut *guard;
            let Some(aggregate) = state.aggregate.as_mut() else {
                return true;
            };
            state.stats.cycles += 1;
            aggregate.events.collect(
                &mut state.registrations,
                &mut state.stats,
                self.mode(),
                run_client,
                run_server,
                Instant::now(),
            )
        };

        for delivery in work {
            delivery.deliver();
        }
        true
    }

    /// Called by the keepalive thread once per stall bound.
    fn keepalive_tick(&self, aggregate_id: Uuid, signal: &StopSignal) {
        let stall = self.config.keepalive.stall_bound();
        let stall_ms = self.config.keepalive.stall_bound_ms;
        let stalled = || {
            is_stalled(
                self.dispatch_active.load(Ordering::Acquire),
                self.last_dispatch_ms.load(Ordering::Acquire),
                self.now_ms(),
                stall_ms,
            )
        };

        if !stalled() {
            return;
        }

        // Never block past a stop request; teardown may be holding the lock
        // while it waits for this thread.
        let guard = loop {
            if signal.is_raised() {
                return;
            }
            if let Some(guard) = self.state.try_lock_for(stall) {
                break guard;
            }
        };

        let current = guard
            .borrow()
            .aggregate
            .as_ref()
            .map(|aggregate| aggregate.id);
        if current != Some(aggregate_id) || signal.is_raised() || !stalled() {
            return;
        }

        debug!("⏰ No dispatch for {:?}, forcing a keepalive cycle", stall);
        self.run_cycle_locked(&guard, Cycle::Keepalive);
    }
}

/// Handle to a session context. Clones share the same state.
#[derive(Clone)]
pub struct ShimContext {
    inner: Arc<Inner>,
}

impl Default for ShimContext {
    fn default() -> Self {
        Self::new(ShimConfig::default(), Arc::new(DefaultSubsystems))
    }
}

impl ShimContext {
    pub fn new(config: ShimConfig, factory: Arc<dyn SubsystemFactory>) -> Self {
        let table = InterfaceTable::builtin();
        let legacy = LegacyInterfaces::new(table, config.legacy_overrides());

        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                table,
                state: ReentrantMutex::new(RefCell::new(ContextState {
                    aggregate: None,
                    registrations: Registrations::default(),
                    legacy,
                    client_pipe: None,
                    server_pipe: None,
                    stats: DispatchStats::default(),
                })),
                alive: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                manual: AtomicBool::new(false),
                client_caps: AtomicU32::new(0),
                dispatch_active: AtomicBool::new(false),
                last_dispatch_ms: AtomicU64::new(0),
                epoch: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &ShimConfig {
        &self.inner.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Whether an aggregate currently exists.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn aggregate_id(&self) -> Option<Uuid> {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        state.aggregate.as_ref().map(|aggregate| aggregate.id)
    }

    /// Number of live pipes, which is the aggregate's reference count.
    pub fn live_pipes(&self) -> usize {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        state
            .aggregate
            .as_ref()
            .map_or(0, |aggregate| aggregate.registry.len())
    }

    pub fn stats(&self) -> DispatchStats {
        let guard = self.inner.state.lock();
        let stats = guard.borrow().stats.clone();
        stats
    }

    pub fn session(&self) -> SessionFlags {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        state
            .aggregate
            .as_ref()
            .map(|aggregate| aggregate.session)
            .unwrap_or_default()
    }

    pub fn keepalive_state(&self) -> KeepaliveState {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        state
            .aggregate
            .as_ref()
            .map_or(KeepaliveState::NotStarted, |aggregate| aggregate.keepalive.state())
    }

    /// Rebuilds `block` if a bind happened since it was last initialized.
    pub fn context_init<'a, T>(
        &self,
        block: &'a mut ContextBlock<T>,
        init: impl FnOnce(&ShimContext) -> T,
    ) -> &'a T {
        block.get_or_init(self.generation(), || init(self))
    }

    fn ensure_aggregate(&self, state: &mut ContextState) {
        // Checked again under the lock; `is_alive` is only a hint for lock-free readers.
        if state.aggregate.is_some() {
            return;
        }
        state.aggregate = Some(Aggregate::build(&self.inner.config, self.inner.factory.as_ref()));
        state.stats.aggregates_built += 1;
        self.inner
            .last_dispatch_ms
            .store(self.inner.now_ms(), Ordering::Release);
        self.inner.alive.store(true, Ordering::Release);
    }

    /// Takes the aggregate out of the state. The caller retires it after
    /// releasing its borrow.
    fn detach_aggregate(&self, state: &mut ContextState) -> Option<Aggregate> {
        let aggregate = state.aggregate.take()?;
        state.legacy.clear();
        state.client_pipe = None;
        state.server_pipe = None;
        state.stats.aggregates_destroyed += 1;
        self.inner.alive.store(false, Ordering::Release);
        Some(aggregate)
    }

    // ========================================================================
    // Pipes and users
    // ========================================================================

    /// Allocates a new unbound pipe, building the aggregate if needed.
    pub fn create_pipe(&self) -> Result<PipeHandle> {
        let guard = self.inner.state.lock();
        let (created, orphan) = {
            let mut state = guard.borrow_mut();
            self.ensure_aggregate(&mut state);
            let created = match state.aggregate.as_mut() {
                Some(aggregate) => aggregate.registry.create(),
                None => Err(ShimError::NotInitialized("aggregate")),
            };
            let empty = state
                .aggregate
                .as_ref()
                .is_some_and(|aggregate| aggregate.registry.is_empty());
            let orphan = if created.is_err() && empty {
                self.detach_aggregate(&mut state)
            } else {
                None
            };
            (created, orphan)
        };
        if let Some(aggregate) = orphan {
            aggregate.retire();
        }
        created
    }

    /// Releases `pipe`. Releasing the last pipe destroys the aggregate.
    pub fn release_pipe(&self, pipe: PipeHandle) -> bool {
        let guard = self.inner.state.lock();
        let (released, retired) = {
            let mut state = guard.borrow_mut();
            let Some(aggregate) = state.aggregate.as_mut() else {
                debug!("Release of pipe {} with no live aggregate", pipe);
                return false;
            };
            let released = aggregate.registry.release(pipe);
            let empty = aggregate.registry.is_empty();

            if state.client_pipe == Some(pipe) {
                state.client_pipe = None;
            }
            if state.server_pipe == Some(pipe) {
                state.server_pipe = None;
            }

            let retired = if released && empty {
                self.detach_aggregate(&mut state)
            } else {
                None
            };
            (released, retired)
        };
        if let Some(aggregate) = retired {
            aggregate.retire();
        }
        released
    }

    pub fn pipe_role(&self, pipe: PipeHandle) -> Option<PipeRole> {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        state.aggregate.as_ref()?.registry.role(pipe)
    }

    /// Binds `pipe` to the client role and logs the user in.
    ///
    /// Returns [`UserHandle::NONE`] for unknown pipes.
    pub fn connect_global_user(&self, pipe: PipeHandle) -> UserHandle {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        let Some(aggregate) = state.aggregate.as_mut() else {
            return UserHandle::NONE;
        };
        if aggregate.registry.bind(pipe, PipeRole::Client).is_err() {
            debug!("ConnectGlobalUser on unknown pipe {}", pipe);
            return UserHandle::NONE;
        }
        aggregate.session.user_logged_in = true;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);

        if self.inner.config.keepalive.enabled
            && aggregate.keepalive.state() == KeepaliveState::NotStarted
        {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let id = aggregate.id;
            let started = aggregate.keepalive.start(move |signal| {
                if let Some(inner) = weak.upgrade() {
                    inner.keepalive_tick(id, signal);
                }
            });
            if let Err(e) = started {
                debug!("{}", e);
            }
        }

        info!("👤 Client user connected on pipe {}", pipe);
        UserHandle::CLIENT
    }

    /// Allocates a fresh pipe bound to the server role.
    pub fn create_local_user(&self) -> Result<(PipeHandle, UserHandle)> {
        let guard = self.inner.state.lock();
        let pipe = self.create_pipe()?;
        let mut state = guard.borrow_mut();
        let aggregate = state
            .aggregate
            .as_mut()
            .ok_or(ShimError::NotInitialized("aggregate"))?;
        aggregate.registry.bind(pipe, PipeRole::Server)?;
        aggregate.session.server_initialized = true;
        self.inner.generation.fetch_add(1, Ordering::AcqRel);

        info!("🖥️ Server user created on pipe {}", pipe);
        Ok((pipe, UserHandle::SERVER))
    }

    /// Marks the server role inactive when `user` is the server user of a live pipe.
    pub fn release_user(&self, pipe: PipeHandle, user: UserHandle) {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        let Some(aggregate) = state.aggregate.as_mut() else {
            return;
        };
        if user == UserHandle::SERVER && aggregate.registry.contains(pipe) {
            aggregate.session.server_initialized = false;
            debug!("Released server user on pipe {}", pipe);
        }
    }

    /// The client user while logged in, otherwise [`UserHandle::NONE`].
    pub fn client_user(&self) -> UserHandle {
        if self.session().user_logged_in {
            UserHandle::CLIENT
        } else {
            UserHandle::NONE
        }
    }

    /// The server user while initialized, otherwise [`UserHandle::NONE`].
    pub fn server_user(&self) -> UserHandle {
        if self.session().server_initialized {
            UserHandle::SERVER
        } else {
            UserHandle::NONE
        }
    }

    pub fn client_pipe(&self) -> PipeHandle {
        let guard = self.inner.state.lock();
        let pipe = guard.borrow().client_pipe.unwrap_or(PipeHandle::NONE);
        pipe
    }

    pub fn server_pipe(&self) -> PipeHandle {
        let guard = self.inner.state.lock();
        let pipe = guard.borrow().server_pipe.unwrap_or(PipeHandle::NONE);
        pipe
    }

    // ========================================================================
    // Session entry points
    // ========================================================================

    /// Creates and binds the process client pipe. Idempotent while it is live.
    pub fn init_client(&self) -> Result<PipeHandle> {
        let guard = self.inner.state.lock();
        if let Some(pipe) = guard.borrow().client_pipe {
            return Ok(pipe);
        }

        let pipe = self.create_pipe()?;
        if self.connect_global_user(pipe).is_none() {
            self.release_pipe(pipe);
            return Err(ShimError::InvalidHandle(pipe));
        }
        guard.borrow_mut().client_pipe = Some(pipe);
        Ok(pipe)
    }

    /// Logs the client out and releases the process client pipe.
    pub fn shutdown_client(&self) {
        let guard = self.inner.state.lock();
        let pipe = {
            let mut state = guard.borrow_mut();
            state.legacy.clear_role(Role::Client);
            if let Some(aggregate) = state.aggregate.as_mut() {
                aggregate.session.user_logged_in = false;
            }
            state.client_pipe.take()
        };
        match pipe {
            Some(pipe) => {
                self.release_pipe(pipe);
                info!("👋 Client shut down");
            }
            None => debug!("Client shutdown without a client pipe"),
        }
    }

    /// Creates the process server pipe. Idempotent while it is live.
    pub fn init_server(&self) -> Result<PipeHandle> {
        let guard = self.inner.state.lock();
        if let Some(pipe) = guard.borrow().server_pipe {
            return Ok(pipe);
        }

        let (pipe, _user) = self.create_local_user()?;
        guard.borrow_mut().server_pipe = Some(pipe);
        Ok(pipe)
    }

    pub fn shutdown_server(&self) {
        let guard = self.inner.state.lock();
        let pipe = {
            let mut state = guard.borrow_mut();
            state.legacy.clear_role(Role::Server);
            if let Some(aggregate) = state.aggregate.as_mut() {
                aggregate.session.server_initialized = false;
            }
            state.server_pipe.take()
        };
        match pipe {
            Some(pipe) => {
                self.release_pipe(pipe);
                info!("👋 Server shut down");
            }
            None => debug!("Server shutdown without a server pipe"),
        }
    }

    // ========================================================================
    // Interfaces
    // ========================================================================

    /// Resolves a versioned interface for a pipe.
    ///
    /// Returns `None` for unknown pipes, unknown families, the client-interface
    /// family (see [`ShimContext::create_interface`]) and for families that
    /// need a user when `user` is zero.
    pub fn resolve_interface(
        &self,
        user: UserHandle,
        pipe: PipeHandle,
        token: &str,
    ) -> Option<Arc<InterfaceAdapter>> {
        let guard = self.inner.state.lock();
        let pipe_role = {
            let state = guard.borrow();
            let aggregate = state.aggregate.as_ref()?;
            match aggregate.registry.role(pipe) {
                Some(role) => role,
                None => {
                    debug!("Interface {:?} requested on unknown pipe {}", token, pipe);
                    return None;
                }
            }
        };

        let resolution = match self.inner.table.resolve(token) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("❓ {}", e);
                return None;
            }
        };
        if resolution.family() == Family::Client {
            debug!("Client interface {:?} requested through the generic path", token);
            return None;
        }
        if user.is_none() && !resolution.spec.user_optional {
            debug!("Interface {:?} needs a user on pipe {}", token, pipe);
            return None;
        }

        let role = resolution.serving_role(pipe_role);
        self.adapter_for(&guard, resolution, role)
    }

    /// Resolves a client-interface version. Needs a logged-in user or an
    /// initialized server.
    pub fn create_interface(&self, token: &str) -> Option<Arc<InterfaceAdapter>> {
        let guard = self.inner.state.lock();
        {
            let state = guard.borrow();
            let session = state.aggregate.as_ref()?.session;
            if !session.user_logged_in && !session.server_initialized {
                debug!("CreateInterface({:?}) before any user is active", token);
                return None;
            }
        }

        let resolution = self.inner.table.resolve(token).ok()?;
        if resolution.family() != Family::Client {
            debug!("CreateInterface only serves the client interface, got {:?}", token);
            return None;
        }
        self.adapter_for(&guard, resolution, Role::Client)
    }

    /// Interface for the legacy flat accessor of `family` on `role`.
    pub fn legacy_interface(&self, role: Role, family: Family) -> Option<Arc<InterfaceAdapter>> {
        let guard = self.inner.state.lock();
        let (token, pipe, user) = {
            let state = guard.borrow();
            if let Some(adapter) = state.legacy.cached(role, family) {
                return Some(adapter);
            }
            let token = state.legacy.version(family)?.to_string();
            let session = state.aggregate.as_ref()?.session;
            let (pipe, active) = match role {
                Role::Client => (state.client_pipe, session.user_logged_in),
                Role::Server => (state.server_pipe, session.server_initialized),
            };
            let user = if active { role.user() } else { UserHandle::NONE };
            (token, pipe?, user)
        };

        let adapter = if family == Family::Client {
            self.create_interface(&token)?
        } else {
            self.resolve_interface(user, pipe, &token)?
        };
        guard
            .borrow_mut()
            .legacy
            .store(role, family, adapter.clone());
        Some(adapter)
    }

    /// Every latch raised so far: the client ones of the context plus the
    /// server ones of the live aggregate.
    pub fn capabilities(&self) -> Capabilities {
        let client =
            Capabilities::from_bits_truncate(self.inner.client_caps.load(Ordering::Acquire));
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        let server = state
            .aggregate
            .as_ref()
            .map_or(Capabilities::empty(), |aggregate| aggregate.capabilities);
        client | server
    }

    /// Whether resolving a newer interface raised `capability`.
    pub fn has_capability(&self, capability: Capabilities) -> bool {
        self.capabilities().contains(capability)
    }

    /// Whether callers asked for any IPv6 aware interface, client or server.
    pub fn has_ipv6_functions(&self) -> bool {
        self.capabilities()
            .intersects(Capabilities::CLIENT_IPV6 | Capabilities::GAMESERVER_IPV6)
    }

    fn adapter_for(
        &self,
        cell: &RefCell<ContextState>,
        resolution: Resolution,
        role: Role,
    ) -> Option<Arc<InterfaceAdapter>> {
        let family = resolution.family();
        let existing = {
            let mut state = cell.borrow_mut();
            let aggregate = state.aggregate.as_mut()?;
            // Server latches live as long as the aggregate, client ones as long as the context.
            aggregate.capabilities |= resolution.caps - Capabilities::CLIENT_IPV6;
            let client = resolution.caps & Capabilities::CLIENT_IPV6;
            if !client.is_empty() {
                self.inner.client_caps.fetch_or(client.bits(), Ordering::AcqRel);
            }
            aggregate.adapters.feature(role, family)
        };
        let feature = existing.unwrap_or_else(|| self.inner.factory.feature(family, role));

        let mut state = cell.borrow_mut();
        let aggregate = state.aggregate.as_mut()?;
        let feature = aggregate.adapters.insert_feature(role, family, feature);
        let adapter = aggregate.adapters.adapter(role, resolution.shape, feature);
        trace!("Resolved {} for {} as {}", family, role, adapter.shape());
        Some(adapter)
    }

    // ========================================================================
    // Registrations
    // ========================================================================

    pub fn register_callback(&self, target: Arc<dyn CallbackTarget>, kind: i32) {
        let guard = self.inner.state.lock();
        guard
            .borrow_mut()
            .registrations
            .register_callback(target, kind);
    }

    pub fn unregister_callback(&self, target: &dyn CallbackTarget) {
        let guard = self.inner.state.lock();
        guard.borrow_mut().registrations.unregister_callback(target);
    }

    pub fn register_call_result(&self, target: Arc<dyn CallbackTarget>, call: CallId) {
        let guard = self.inner.state.lock();
        guard
            .borrow_mut()
            .registrations
            .register_call_result(target, call);
    }

    pub fn unregister_call_result(&self, target: &dyn CallbackTarget, call: CallId) {
        let guard = self.inner.state.lock();
        guard
            .borrow_mut()
            .registrations
            .unregister_call_result(target, call);
    }

    // ========================================================================
    // Producers
    // ========================================================================

    /// Fires a callback on `role`. Returns false when no aggregate exists.
    pub fn post_callback(&self, role: Role, kind: i32, payload: impl Into<Arc<[u8]>>) -> bool {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        match state.aggregate.as_mut() {
            Some(aggregate) => {
                aggregate.events.post_callback(role, kind, payload);
                true
            }
            None => false,
        }
    }

    /// Completes an asynchronous call on `role` immediately.
    pub fn post_call_result(
        &self,
        role: Role,
        kind: i32,
        payload: impl Into<Arc<[u8]>>,
        failed: bool,
    ) -> Option<CallId> {
        self.post_call_result_after(role, kind, payload, failed, Duration::ZERO)
    }

    /// Completes an asynchronous call on `role` once `delay` has passed.
    pub fn post_call_result_after(
        &self,
        role: Role,
        kind: i32,
        payload: impl Into<Arc<[u8]>>,
        failed: bool,
        delay: Duration,
    ) -> Option<CallId> {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        let aggregate = state.aggregate.as_mut()?;
        Some(
            aggregate
                .events
                .post_call_result(role, kind, payload, failed, delay),
        )
    }

    /// Adds a per-cycle action to the live aggregate.
    pub fn add_periodic(&self, action: PeriodicAction) -> Option<PeriodicId> {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        Some(state.aggregate.as_mut()?.periodic.add(action))
    }

    pub fn remove_periodic(&self, id: PeriodicId) -> bool {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        state
            .aggregate
            .as_mut()
            .is_some_and(|aggregate| aggregate.periodic.remove(id))
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Runs one dispatch cycle. A call made from inside a cycle does nothing.
    pub fn run_callbacks(&self, run_client: bool, run_server: bool) {
        if !self.is_alive() {
            return;
        }
        let guard = self.inner.state.lock();
        self.inner.run_cycle_locked(
            &guard,
            Cycle::Pump {
                run_client,
                run_server,
            },
        );
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.inner.mode()
    }

    /// Switches to manual dispatch. Only the first call has an effect.
    pub fn manual_dispatch_init(&self) {
        if self
            .inner
            .manual
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("🎛️ Manual dispatch enabled");
        }
    }

    /// Runs a cycle for the role `pipe` is bound to.
    pub fn manual_dispatch_run_frame(&self, pipe: PipeHandle) {
        match self.pipe_role(pipe) {
            Some(PipeRole::Client) => self.run_callbacks(true, false),
            Some(PipeRole::Server) => self.run_callbacks(false, true),
            Some(PipeRole::Unbound) | None => {
                debug!("RunFrame on pipe {} without a bound role", pipe)
            }
        }
    }

    /// Peeks at the next queued event of the role `pipe` is bound to.
    pub fn manual_dispatch_get_next_callback(&self, pipe: PipeHandle) -> Result<CallbackMessage> {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        let aggregate = state
            .aggregate
            .as_mut()
            .ok_or(ShimError::InvalidHandle(pipe))?;

        if !aggregate.session.server_initialized {
            aggregate.events.queue_mut(Role::Server).clear();
        }

        let role = match aggregate.registry.role(pipe) {
            Some(PipeRole::Client) => Role::Client,
            Some(PipeRole::Server) => Role::Server,
            Some(PipeRole::Unbound) | None => return Err(ShimError::InvalidHandle(pipe)),
        };

        let event = aggregate
            .events
            .queue_mut(role)
            .peek()
            .cloned()
            .ok_or(ShimError::EmptyQueue(pipe))?;
        Ok(CallbackMessage {
            user: role.user(),
            kind: event.kind,
            payload: event.payload,
        })
    }

    /// Acknowledges the event last returned for `pipe`'s role.
    pub fn manual_dispatch_free_last_callback(&self, pipe: PipeHandle) {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        let Some(aggregate) = state.aggregate.as_mut() else {
            return;
        };
        let role = match aggregate.registry.role(pipe) {
            Some(PipeRole::Client) => Role::Client,
            Some(PipeRole::Server) => Role::Server,
            Some(PipeRole::Unbound) | None => return,
        };
        aggregate.events.queue_mut(role).acknowledge();
    }

    /// Copies a completed call result into `out`, looked up in the result
    /// table of the role `pipe` is bound to. Returns the failure flag.
    pub fn get_api_call_result(
        &self,
        pipe: PipeHandle,
        call: CallId,
        out: &mut [u8],
        expected_kind: i32,
    ) -> Result<bool> {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        let state = &mut *state;
        let aggregate = state
            .aggregate
            .as_mut()
            .ok_or(ShimError::InvalidHandle(pipe))?;
        let role = match aggregate.registry.role(pipe) {
            Some(PipeRole::Client) => Role::Client,
            Some(PipeRole::Server) => Role::Server,
            Some(PipeRole::Unbound) | None => return Err(ShimError::InvalidHandle(pipe)),
        };

        let (payload, failed) =
            aggregate
                .events
                .take_call_result(role, call, expected_kind, out.len())?;
        out[..payload.len()].copy_from_slice(&payload);

        // The result is consumed; nobody will be told about it again.
        for target in state.registrations.take_call_targets(role, call) {
            target.set_registered(false);
        }
        Ok(failed)
    }

    /// Number of events waiting in `role`'s manual queue.
    pub fn queued_events(&self, role: Role) -> usize {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        state
            .aggregate
            .as_ref()
            .map_or(0, |aggregate| aggregate.events.queue(role).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeepaliveSettings;
    use std::sync::Mutex;

    fn quiet_context() -> ShimContext {
        let config = ShimConfig {
            keepalive: KeepaliveSettings {
                enabled: false,
                ..KeepaliveSettings::default()
            },
            ..ShimConfig::default()
        };
        ShimContext::new(config, Arc::new(DefaultSubsystems))
    }

    struct Listener {
        kind: i32,
        seen: Mutex<Vec<Vec<u8>>>,
    }

    impl Listener {
        fn new(kind: i32) -> Arc<Self> {
            Arc::new(Self {
                kind,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl CallbackTarget for Listener {
        fn kind(&self) -> i32 {
            self.kind
        }

        fn run(&self, payload: &[u8]) {
            self.seen.lock().unwrap().push(payload.to_vec());
        }

        fn run_call_result(&self, payload: &[u8], _io_failure: bool, _call: CallId) {
            self.seen.lock().unwrap().push(payload.to_vec());
        }
    }

    #[test]
    fn test_aggregate_follows_pipe_count() {
        let context = quiet_context();
        assert!(!context.is_alive());

        let first = context.create_pipe().unwrap();
        let second = context.create_pipe().unwrap();
        assert_eq!(context.live_pipes(), 2);
        assert!(context.is_alive());

        assert!(context.release_pipe(first));
        assert!(context.is_alive());
        assert!(!context.release_pipe(first));
        assert!(context.release_pipe(second));
        assert!(!context.is_alive());
        assert_eq!(context.stats().aggregates_destroyed, 1);
    }

    #[test]
    fn test_rebuilt_aggregate_is_fresh() {
        let context = quiet_context();
        let pipe = context.create_pipe().unwrap();
        let first_id = context.aggregate_id();
        context.release_pipe(pipe);

        let pipe = context.create_pipe().unwrap();
        assert_eq!(pipe, PipeHandle(1));
        assert_ne!(context.aggregate_id(), first_id);
        assert_eq!(context.stats().aggregates_built, 2);
    }

    #[test]
    fn test_connect_unknown_pipe_returns_zero() {
        let context = quiet_context();
        assert_eq!(context.connect_global_user(PipeHandle(5)), UserHandle::NONE);
        context.create_pipe().unwrap();
        assert_eq!(context.connect_global_user(PipeHandle(5)), UserHandle::NONE);
        assert_eq!(context.client_user(), UserHandle::NONE);
    }

    #[test]
    fn test_generation_moves_on_bind() {
        let context = quiet_context();
        let start = context.generation();
        let pipe = context.create_pipe().unwrap();
        assert_eq!(context.generation(), start);
        context.connect_global_user(pipe);
        assert_eq!(context.generation(), start + 1);
        context.create_local_user().unwrap();
        assert_eq!(context.generation(), start + 2);
    }

    #[test]
    fn test_context_init_tracks_generation() {
        let context = quiet_context();
        let mut block = ContextBlock::default();
        let mut builds = 0;

        context.context_init(&mut block, |_| builds += 1);
        context.context_init(&mut block, |_| builds += 1);
        assert_eq!(builds, 1);

        context.init_client().unwrap();
        context.context_init(&mut block, |_| builds += 1);
        assert_eq!(builds, 2);
    }

    #[test]
    fn test_resolve_requires_user_except_for_utils() {
        let context = quiet_context();
        let pipe = context.create_pipe().unwrap();

        assert!(context
            .resolve_interface(UserHandle::NONE, pipe, "SteamFriends015")
            .is_none());
        assert!(context
            .resolve_interface(UserHandle::NONE, pipe, "SteamUtils009")
            .is_some());
        assert!(context
            .resolve_interface(UserHandle::NONE, pipe, "SteamNetworkingUtils003")
            .is_some());

        let user = context.connect_global_user(pipe);
        assert!(context.resolve_interface(user, pipe, "SteamFriends015").is_some());
    }

    #[test]
    fn test_resolution_is_stable_per_shape() {
        let context = quiet_context();
        let pipe = context.init_client().unwrap();
        let user = context.client_user();

        let first = context.resolve_interface(user, pipe, "SteamUser021").unwrap();
        let again = context.resolve_interface(user, pipe, "SteamUser021").unwrap();
        let older = context.resolve_interface(user, pipe, "SteamUser012").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &older));
        assert!(Arc::ptr_eq(first.target(), older.target()));
    }

    #[test]
    fn test_role_scoped_families_pick_server_instance() {
        let context = quiet_context();
        let (server_pipe, server_user) = context.create_local_user().unwrap();
        let client_pipe = context.init_client().unwrap();

        let server_utils = context
            .resolve_interface(server_user, server_pipe, "SteamUtils010")
            .unwrap();
        let client_utils = context
            .resolve_interface(UserHandle::CLIENT, client_pipe, "SteamUtils010")
            .unwrap();
        assert_eq!(server_utils.role(), Role::Server);
        assert_eq!(client_utils.role(), Role::Client);

        let friends = context
            .resolve_interface(server_user, server_pipe, "SteamFriends017")
            .unwrap();
        assert_eq!(friends.role(), Role::Client);
    }

    #[test]
    fn test_capability_latch_survives_older_requests() {
        let context = quiet_context();
        let (pipe, user) = context.create_local_user().unwrap();

        context.resolve_interface(user, pipe, "SteamGameServer012");
        assert!(!context.has_capability(Capabilities::GAMESERVER_IPV6));

        context.resolve_interface(user, pipe, "SteamGameServer014");
        assert!(context.has_capability(Capabilities::GAMESERVER_IPV6));

        context.resolve_interface(user, pipe, "SteamGameServer010");
        assert!(context.has_capability(Capabilities::GAMESERVER_IPV6));
    }

    #[test]
    fn test_create_interface_needs_active_user() {
        let context = quiet_context();
        let pipe = context.create_pipe().unwrap();
        assert!(context.create_interface("SteamClient020").is_none());

        context.connect_global_user(pipe);
        assert!(context.create_interface("SteamUser021").is_none());
        let client = context.create_interface("SteamClient020").unwrap();
        assert_eq!(client.shape().revision, 20);
        assert!(!context.has_capability(Capabilities::CLIENT_IPV6));

        context.create_interface("SteamClient023");
        assert!(context.has_capability(Capabilities::CLIENT_IPV6));
    }

    #[test]
    fn test_generic_resolver_refuses_client_family() {
        let context = quiet_context();
        let pipe = context.init_client().unwrap();
        assert!(context
            .resolve_interface(UserHandle::CLIENT, pipe, "SteamClient020")
            .is_none());
    }

    #[test]
    fn test_legacy_interface_uses_configured_version() {
        let mut config = ShimConfig::default();
        config.keepalive.enabled = false;
        config
            .interfaces
            .legacy_versions
            .insert("SteamUser".to_string(), "SteamUser017".to_string());
        let context = ShimContext::new(config, Arc::new(DefaultSubsystems));

        assert!(context.legacy_interface(Role::Client, Family::User).is_none());
        context.init_client().unwrap();

        let user = context.legacy_interface(Role::Client, Family::User).unwrap();
        assert_eq!(user.shape().revision, 17);
        let friends = context.legacy_interface(Role::Client, Family::Friends).unwrap();
        assert_eq!(friends.shape().revision, 15);

        let again = context.legacy_interface(Role::Client, Family::User).unwrap();
        assert!(Arc::ptr_eq(&user, &again));
    }

    #[test]
    fn test_release_user_deactivates_server() {
        let context = quiet_context();
        let (pipe, user) = context.create_local_user().unwrap();
        assert_eq!(context.server_user(), UserHandle::SERVER);

        context.release_user(pipe, UserHandle::CLIENT);
        assert_eq!(context.server_user(), UserHandle::SERVER);

        context.release_user(pipe, user);
        assert_eq!(context.server_user(), UserHandle::NONE);
    }

    #[test]
    fn test_init_and_shutdown_entry_points() {
        let context = quiet_context();
        let client = context.init_client().unwrap();
        assert_eq!(context.init_client().unwrap(), client);
        let server = context.init_server().unwrap();
        assert_ne!(client, server);
        assert_eq!(context.client_pipe(), client);
        assert_eq!(context.server_pipe(), server);

        context.shutdown_client();
        assert_eq!(context.client_user(), UserHandle::NONE);
        assert!(context.is_alive());

        context.shutdown_server();
        assert!(!context.is_alive());
        assert_eq!(context.server_pipe(), PipeHandle::NONE);
    }

    #[test]
    fn test_callbacks_run_in_pump() {
        let context = quiet_context();
        context.init_client().unwrap();
        let listener = Listener::new(304);
        context.register_callback(listener.clone(), 304);

        context.post_callback(Role::Client, 304, vec![1]);
        context.run_callbacks(true, false);
        context.run_callbacks(true, false);

        assert_eq!(*listener.seen.lock().unwrap(), vec![vec![1]]);
        assert_eq!(context.stats().callbacks_delivered, 1);
    }

    #[test]
    fn test_registrations_survive_rebuild() {
        let context = quiet_context();
        let listener = Listener::new(100);
        context.register_callback(listener.clone(), 100);

        let pipe = context.init_client().unwrap();
        context.release_pipe(pipe);
        context.init_client().unwrap();

        context.post_callback(Role::Client, 100, vec![2]);
        context.run_callbacks(true, false);
        assert_eq!(listener.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_call_result_lookup_is_role_sensitive() {
        let context = quiet_context();
        let client = context.init_client().unwrap();
        let server = context.init_server().unwrap();

        let call = context
            .post_call_result(Role::Server, 1800, vec![4, 2], false)
            .unwrap();
        let mut buffer = [0u8; 8];

        assert_eq!(
            context.get_api_call_result(client, call, &mut buffer, 1800),
            Err(ShimError::ResultUnavailable(call))
        );
        assert_eq!(context.get_api_call_result(server, call, &mut buffer, 1800), Ok(false));
        assert_eq!(&buffer[..2], &[4, 2]);
    }

    fn context_with_stall(stall_bound_ms: u64) -> ShimContext {
        let config = ShimConfig {
            keepalive: KeepaliveSettings {
                enabled: false,
                grace_period_ms: 0,
                stall_bound_ms,
            },
            ..ShimConfig::default()
        };
        ShimContext::new(config, Arc::new(DefaultSubsystems))
    }

    #[test]
    fn test_keepalive_tick_forces_one_cycle_per_stall() {
        let context = context_with_stall(40);
        context.init_client().unwrap();
        let id = context.aggregate_id().unwrap();
        let signal = StopSignal::default();

        // Building the aggregate counts as dispatch progress.
        context.inner.keepalive_tick(id, &signal);
        assert_eq!(context.stats().keepalive_cycles, 0);

        std::thread::sleep(Duration::from_millis(60));
        context.inner.keepalive_tick(id, &signal);
        assert_eq!(context.stats().keepalive_cycles, 1);

        // The forced cycle stamps the dispatch time.
        context.inner.keepalive_tick(id, &signal);
        assert_eq!(context.stats().keepalive_cycles, 1);
        assert_eq!(context.stats().cycles, 0);
    }

    #[test]
    fn test_keepalive_tick_skips_busy_or_stale_aggregates() {
        let context = context_with_stall(20);
        let pipe = context.init_client().unwrap();
        let id = context.aggregate_id().unwrap();
        let signal = StopSignal::default();
        std::thread::sleep(Duration::from_millis(40));

        context.inner.keepalive_tick(Uuid::new_v4(), &signal);
        assert_eq!(context.stats().keepalive_cycles, 0);

        context.inner.dispatch_active.store(true, Ordering::Release);
        context.inner.keepalive_tick(id, &signal);
        context.inner.dispatch_active.store(false, Ordering::Release);
        assert_eq!(context.stats().keepalive_cycles, 0);

        signal.raise();
        context.inner.keepalive_tick(id, &signal);
        assert_eq!(context.stats().keepalive_cycles, 0);

        context.release_pipe(pipe);
        context.inner.keepalive_tick(id, &StopSignal::default());
        assert_eq!(context.stats().keepalive_cycles, 0);
    }

    #[test]
    fn test_fetched_call_result_drops_registrations() {
        let context = quiet_context();
        context.manual_dispatch_init();
        let pipe = context.init_client().unwrap();

        let call = context
            .post_call_result(Role::Client, 1900, vec![5], false)
            .unwrap();
        let listener = Listener::new(1900);
        context.register_call_result(listener.clone(), call);

        let mut buffer = [0u8; 4];
        assert_eq!(context.get_api_call_result(pipe, call, &mut buffer, 1900), Ok(false));

        let guard = context.inner.state.lock();
        let state = guard.borrow();
        for role in Role::ALL {
            assert!(!state.registrations.call_results(role).is_waiting(call));
        }
        drop(state);
        drop(guard);

        // Nothing left to deliver once the result has been taken.
        context.manual_dispatch_run_frame(pipe);
        assert!(listener.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_periodic_actions_run_every_cycle() {
        let context = quiet_context();
        context.init_client().unwrap();
        let hits = Arc::new(AtomicU64::new(0));
        let id = {
            let hits = hits.clone();
            context
                .add_periodic(Arc::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap()
        };

        context.run_callbacks(true, false);
        context.run_callbacks(false, false);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(context.remove_periodic(id));
        context.run_callbacks(true, true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pump_without_aggregate_is_noop() {
        let context = quiet_context();
        context.run_callbacks(true, true);
        assert_eq!(context.stats().cycles, 0);
        assert!(!context.post_callback(Role::Client, 1, vec![]));
        assert!(context.post_call_result(Role::Client, 1, vec![], false).is_none());
    }
}
