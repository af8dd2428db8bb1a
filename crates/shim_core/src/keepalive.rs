//! # Keepalive Thread
//!
//! A background thread that forces dispatch progress when callers stop
//! pumping. It waits out a grace period, then wakes every stall bound and
//! asks its owner to run a cycle if none happened recently.
//!
//! The stop signal is a flag guarded by a mutex and paired with a condition
//! variable. Stopping raises the flag once, wakes the thread and joins it.

use crate::config::KeepaliveSettings;
use crate::error::{Result, ShimError};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveState {
    NotStarted,
    WaitingGrace,
    Active,
    Stopped,
}

/// One-shot stop signal shared with the keepalive thread.
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    pub fn raise(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.wake.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Sleeps up to `timeout`. Returns true if the signal was raised.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.wake.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }
}

/// Whether the keepalive should force a cycle.
pub fn is_stalled(dispatch_active: bool, last_dispatch_ms: u64, now_ms: u64, stall_bound_ms: u64) -> bool {
    !dispatch_active && now_ms.saturating_sub(last_dispatch_ms) >= stall_bound_ms
}

pub struct Keepalive {
    settings: KeepaliveSettings,
    state: Arc<Mutex<KeepaliveState>>,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

impl Keepalive {
    pub fn new(settings: KeepaliveSettings) -> Self {
        Self {
            settings,
            state: Arc::new(Mutex::new(KeepaliveState::NotStarted)),
            signal: Arc::new(StopSignal::default()),
            handle: None,
            thread_id: None,
        }
    }

    pub fn state(&self) -> KeepaliveState {
        *self.state.lock()
    }

    /// Spawns the thread. `tick` runs once per stall bound after the grace period.
    ///
    /// A second start is reported as [`ShimError::ThreadLifecycle`] and changes nothing.
    pub fn start<F>(&mut self, tick: F) -> Result<()>
    where
        F: Fn(&StopSignal) + Send + 'static,
    {
        if self.state() != KeepaliveState::NotStarted {
            return Err(ShimError::ThreadLifecycle(format!(
                "keepalive already {:?}",
                self.state()
            )));
        }

        let state = self.state.clone();
        let signal = self.signal.clone();
        let grace = self.settings.grace_period();
        let stall = self.settings.stall_bound();
        *self.state.lock() = KeepaliveState::WaitingGrace;

        let spawned = thread::Builder::new()
            .name("shim-keepalive".to_string())
            .spawn(move || {
                if signal.wait_for(grace) {
                    *state.lock() = KeepaliveState::Stopped;
                    return;
                }
                *state.lock() = KeepaliveState::Active;
                debug!("Keepalive active, stall bound {:?}", stall);

                while !signal.wait_for(stall) {
                    tick(&signal);
                }
                *state.lock() = KeepaliveState::Stopped;
            });

        match spawned {
            Ok(handle) => {
                self.thread_id = Some(handle.thread().id());
                self.handle = Some(handle);
                info!("💓 Keepalive thread started");
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = KeepaliveState::Stopped;
                error!("Failed to spawn keepalive thread: {}", e);
                Err(ShimError::ThreadLifecycle(e.to_string()))
            }
        }
    }

    /// Raises the stop signal and joins the thread.
    ///
    /// When called from the keepalive thread itself the thread is left to
    /// finish on its own.
    pub fn stop(&mut self) {
        self.signal.raise();
        let Some(handle) = self.handle.take() else {
            if self.state() == KeepaliveState::NotStarted {
                *self.state.lock() = KeepaliveState::Stopped;
            }
            return;
        };

        if self.thread_id == Some(thread::current().id()) {
            debug!("Keepalive stop requested from its own thread, detaching");
            return;
        }

        if handle.join().is_err() {
            error!("Keepalive thread panicked");
        }
        *self.state.lock() = KeepaliveState::Stopped;
        info!("💤 Keepalive thread stopped");
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.stop();
    }
}
