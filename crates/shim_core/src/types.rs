//! Handle and identity types shared by every module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a pipe. `0` is never allocated and means "no pipe".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipeHandle(pub i32);

impl PipeHandle {
    pub const NONE: PipeHandle = PipeHandle(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PipeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed user identity of a role. There is exactly one user per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserHandle(pub i32);

impl UserHandle {
    pub const NONE: UserHandle = UserHandle(0);
    pub const CLIENT: UserHandle = UserHandle(1);
    pub const SERVER: UserHandle = UserHandle(2);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an asynchronous call. `0` is the invalid call id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl CallId {
    pub const INVALID: CallId = CallId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a pipe is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipeRole {
    Unbound,
    Client,
    Server,
}

/// The two sides that own callbacks, results and queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Client, Role::Server];

    /// The fixed user handle that identifies this role.
    pub fn user(self) -> UserHandle {
        match self {
            Role::Client => UserHandle::CLIENT,
            Role::Server => UserHandle::SERVER,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Role::Client => 0,
            Role::Server => 1,
        }
    }
}

impl PipeRole {
    /// The role whose tables serve this pipe. Unbound pipes read the client side.
    pub fn effective(self) -> Role {
        match self {
            PipeRole::Server => Role::Server,
            PipeRole::Client | PipeRole::Unbound => Role::Client,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// A pair of values, one per [`Role`].
#[derive(Debug, Default, Clone)]
pub struct PerRole<T> {
    slots: [T; 2],
}

impl<T> PerRole<T> {
    pub fn new(client: T, server: T) -> Self {
        Self {
            slots: [client, server],
        }
    }

    pub fn get(&self, role: Role) -> &T {
        &self.slots[role.index()]
    }

    pub fn get_mut(&mut self, role: Role) -> &mut T {
        &mut self.slots[role.index()]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut()
    }
}
