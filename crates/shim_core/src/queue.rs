//! Per-role FIFO queues used by manual dispatch.
//!
//! Fetching peeks at the front without removing it; only an explicit
//! acknowledge pops. Fetching twice without acknowledging returns the same
//! event again.

use crate::types::CallId;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Callback kind announcing that an asynchronous call completed.
pub const CALL_COMPLETED_KIND: i32 = 703;

/// An event waiting to be pulled by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    pub kind: i32,
    pub payload: Arc<[u8]>,
}

impl QueuedEvent {
    pub fn new(kind: i32, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<QueuedEvent>,
    checked_out: bool,
}

impl EventQueue {
    pub fn push(&mut self, event: QueuedEvent) {
        self.events.push_back(event);
    }

    /// Returns the front event without removing it.
    pub fn peek(&mut self) -> Option<&QueuedEvent> {
        let front = self.events.front()?;
        if self.checked_out {
            debug!("Re-delivering unacknowledged event of kind {}", front.kind);
        }
        self.checked_out = true;
        Some(front)
    }

    /// Pops the front event. An empty queue is left untouched.
    pub fn acknowledge(&mut self) -> Option<QueuedEvent> {
        self.checked_out = false;
        self.events.pop_front()
    }

    pub fn is_checked_out(&self) -> bool {
        self.checked_out
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.checked_out = false;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Payload of a [`CALL_COMPLETED_KIND`] event.
///
/// Encoded little-endian as `call: u64, kind: i32, size: u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallCompleted {
    pub call: CallId,
    pub kind: i32,
    pub size: u32,
}

impl CallCompleted {
    pub const ENCODED_LEN: usize = 16;

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.call.0.to_le_bytes());
        out[8..12].copy_from_slice(&self.kind.to_le_bytes());
        out[12..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        let call = u64::from_le_bytes(bytes[..8].try_into().ok()?);
        let kind = i32::from_le_bytes(bytes[8..12].try_into().ok()?);
        let size = u32::from_le_bytes(bytes[12..16].try_into().ok()?);
        Some(Self {
            call: CallId(call),
            kind,
            size,
        })
    }
}
