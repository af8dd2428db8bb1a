//! Callback and call-result registrations.
//!
//! Registrations belong to the caller's objects, not to the aggregate, so
//! they survive an aggregate rebuild. Callbacks are stored under the role the
//! target declares; call results are stored under both roles because the
//! producing role is unknown when the caller registers.

use crate::types::{CallId, PerRole, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Identity of a registered target, derived from its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub usize);

/// Something that receives fired callbacks or completed call results.
pub trait CallbackTarget: Send + Sync {
    /// Callback kind this target listens for.
    fn kind(&self) -> i32;

    /// Targets flagged as game server listen on the server role.
    fn is_game_server(&self) -> bool {
        false
    }

    fn run(&self, payload: &[u8]);

    fn run_call_result(&self, payload: &[u8], io_failure: bool, call: CallId);

    fn id(&self) -> TargetId {
        TargetId((self as *const Self).cast::<()>() as usize)
    }

    /// Notified when the target enters or leaves a registry.
    fn set_registered(&self, _registered: bool) {}

    fn role(&self) -> Role {
        if self.is_game_server() {
            Role::Server
        } else {
            Role::Client
        }
    }
}

/// Named group a callback kind belongs to (`kind / 100 * 100`).
pub fn callback_group(kind: i32) -> Option<&'static str> {
    let name = match kind / 100 * 100 {
        100 => "user",
        200 => "game server",
        300 => "friends",
        400 => "billing",
        500 => "matchmaking",
        600 => "content server",
        700 => "utils",
        1000 => "apps",
        1100 => "user stats",
        1200 => "networking",
        1300 => "remote storage",
        1500 => "game server items",
        1700 => "game coordinator",
        1800 => "game server stats",
        2000 => "game stats",
        2100 => "http",
        2300 => "screenshots",
        2800 => "controller",
        3400 => "ugc",
        3900 => "app list",
        4000 => "music",
        4100 => "music remote",
        4500 => "html surface",
        4600 => "video",
        4700 => "inventory",
        5000 => "parental settings",
        5200 => "game search",
        5300 => "parties",
        5700 => "remote play",
        _ => return None,
    };
    Some(name)
}

/// Targets listening for fired callbacks of one role, keyed by kind.
#[derive(Default)]
pub struct CallbackRegistry {
    by_kind: HashMap<i32, Vec<Arc<dyn CallbackTarget>>>,
}

impl CallbackRegistry {
    /// Adds `target` under `kind`. Returns false if it was already there.
    pub fn add(&mut self, kind: i32, target: Arc<dyn CallbackTarget>) -> bool {
        let targets = self.by_kind.entry(kind).or_default();
        let id = target.id();
        if targets.iter().any(|existing| existing.id() == id) {
            return false;
        }
        targets.push(target);
        true
    }

    /// Removes `id` from `kind`. Returns true if it was registered.
    pub fn remove(&mut self, kind: i32, id: TargetId) -> bool {
        let Some(targets) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = targets.len();
        targets.retain(|target| target.id() != id);
        let removed = targets.len() != before;
        if targets.is_empty() {
            self.by_kind.remove(&kind);
        }
        removed
    }

    pub fn targets(&self, kind: i32) -> Vec<Arc<dyn CallbackTarget>> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

/// Targets waiting for a specific asynchronous call, keyed by call id.
#[derive(Default)]
pub struct CallResultRegistry {
    by_call: HashMap<CallId, Vec<Arc<dyn CallbackTarget>>>,
}

impl CallResultRegistry {
    pub fn add(&mut self, call: CallId, target: Arc<dyn CallbackTarget>) {
        let targets = self.by_call.entry(call).or_default();
        let id = target.id();
        if !targets.iter().any(|existing| existing.id() == id) {
            targets.push(target);
        }
    }

    pub fn remove(&mut self, call: CallId, id: TargetId) -> bool {
        let Some(targets) = self.by_call.get_mut(&call) else {
            return false;
        };
        let before = targets.len();
        targets.retain(|target| target.id() != id);
        let removed = targets.len() != before;
        if targets.is_empty() {
            self.by_call.remove(&call);
        }
        removed
    }

    pub fn take(&mut self, call: CallId) -> Vec<Arc<dyn CallbackTarget>> {
        self.by_call.remove(&call).unwrap_or_default()
    }

    pub fn is_waiting(&self, call: CallId) -> bool {
        self.by_call.contains_key(&call)
    }

    pub fn len(&self) -> usize {
        self.by_call.values().map(Vec::len).sum()
    }
}

/// Every registration held by a context.
#[derive(Default)]
pub struct Registrations {
    callbacks: PerRole<CallbackRegistry>,
    call_results: PerRole<CallResultRegistry>,
}

impl Registrations {
    pub fn register_callback(&mut self, target: Arc<dyn CallbackTarget>, kind: i32) {
        let role = target.role();
        match callback_group(kind) {
            Some(group) => debug!("📝 Registering {} callback {} ({})", role, kind, group),
            None => debug!("📝 Registering {} callback {} (unknown group)", role, kind),
        }
        let listener = target.clone();
        if self.callbacks.get_mut(role).add(kind, target) {
            listener.set_registered(true);
        } else {
            trace!("Callback {} already registered on {}", kind, role);
        }
    }

    pub fn unregister_callback(&mut self, target: &dyn CallbackTarget) {
        let role = target.role();
        if self.callbacks.get_mut(role).remove(target.kind(), target.id()) {
            target.set_registered(false);
            debug!("Unregistered {} callback {}", role, target.kind());
        }
    }

    /// Registers `target` for `call` on both roles. Invalid call ids are ignored.
    pub fn register_call_result(&mut self, target: Arc<dyn CallbackTarget>, call: CallId) {
        if !call.is_valid() {
            debug!("Ignoring call result registration for invalid call id");
            return;
        }
        target.set_registered(true);
        for role in Role::ALL {
            self.call_results.get_mut(role).add(call, target.clone());
        }
    }

    pub fn unregister_call_result(&mut self, target: &dyn CallbackTarget, call: CallId) {
        if !call.is_valid() {
            return;
        }
        let mut removed = false;
        for role in Role::ALL {
            removed |= self.call_results.get_mut(role).remove(call, target.id());
        }
        if removed {
            target.set_registered(false);
        }
    }

    pub fn callbacks(&self, role: Role) -> &CallbackRegistry {
        self.callbacks.get(role)
    }

    /// Targets waiting on `call`, taken from the role that produced it and
    /// dropped from the other role's table.
    pub(crate) fn take_call_targets(&mut self, role: Role, call: CallId) -> Vec<Arc<dyn CallbackTarget>> {
        let targets = self.call_results.get_mut(role).take(call);
        if !targets.is_empty() {
            for other in Role::ALL.into_iter().filter(|other| *other != role) {
                self.call_results.get_mut(other).take(call);
            }
        }
        targets
    }

    pub fn call_results(&self, role: Role) -> &CallResultRegistry {
        self.call_results.get(role)
    }
}
