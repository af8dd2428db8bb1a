//! # Shim Core
//!
//! Session, versioning and event-dispatch core of a client API emulator that
//! serves many historical interface revisions from one set of feature
//! implementations.
//!
//! ## Core Features
//!
//! - **Handle Registry**: Pipes are small positive integers, never reused while the aggregate lives
//! - **Version Resolver**: Version tokens map to families by longest prefix and fall back to the latest shape
//! - **Dispatch Engine**: Automatic delivery to registered targets, or manual queues pulled by the caller
//! - **Keepalive**: A background thread keeps transport and periodic work moving when nobody pumps
//! - **Lifecycle**: The aggregate is built with the first pipe and torn down with the last
//!
//! ## Architecture Overview
//!
//! Everything hangs off a [`ShimContext`]. It owns one re-entrant lock; each
//! operation takes it, and callbacks run after the internal state borrow is
//! released so they may call back into the context on the same thread.
//!
//! ### Aggregate
//! Built when a pipe is created while none exists. Holds the pipe registry,
//! pending events, manual queues, adapters, the server capability latch and the
//! keepalive thread.
//!
//! ### Registrations
//! Callback and call-result targets belong to the caller and outlive
//! aggregate rebuilds.
//!
//! ## Quick Start Example
//!
//! ```rust
//! use shim_core::{CallId, CallbackTarget, Role, ShimContext};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl CallbackTarget for Printer {
//!     fn kind(&self) -> i32 { 304 }
//!     fn run(&self, payload: &[u8]) { println!("persona changed: {:?}", payload); }
//!     fn run_call_result(&self, _payload: &[u8], _failed: bool, _call: CallId) {}
//! }
//!
//! let context = ShimContext::default();
//! let pipe = context.init_client().unwrap();
//! let user = context.client_user();
//!
//! let friends = context.resolve_interface(user, pipe, "SteamFriends017");
//! assert!(friends.is_some());
//!
//! context.register_callback(Arc::new(Printer), 304);
//! context.post_callback(Role::Client, 304, vec![1, 2, 3]);
//! context.run_callbacks(true, false);
//!
//! context.shutdown_client();
//! assert!(!context.is_alive());
//! ```

pub mod callbacks;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod keepalive;
pub mod legacy;
pub mod lifecycle;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod types;

pub use callbacks::{callback_group, CallbackTarget, Registrations, TargetId};
pub use collaborators::{
    DefaultSubsystems, PeriodicAction, PeriodicId, ServerSubsystem, SubsystemFactory, Transport,
};
pub use config::{InterfaceSettings, KeepaliveSettings, ShimConfig};
pub use context::{CallbackMessage, ShimContext};
pub use dispatch::{DispatchMode, DispatchStats};
pub use error::{Result, ShimError};
pub use keepalive::KeepaliveState;
pub use lifecycle::{ContextBlock, SessionFlags};
pub use queue::{CallCompleted, QueuedEvent, CALL_COMPLETED_KIND};
pub use resolver::{
    AdapterShape, Capabilities, Family, Interface, InterfaceAdapter, InterfaceTable, Resolution,
};
pub use types::{CallId, PipeHandle, PipeRole, Role, UserHandle};
