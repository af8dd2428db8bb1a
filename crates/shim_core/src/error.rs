//! Error types for the session core.
//!
//! Every variant is recoverable except [`ShimError::HandleSpaceExhausted`].
//! The C ABI collapses all of them into `0`/null/`false` sentinels.

use crate::types::{CallId, PipeHandle};
use thiserror::Error;

/// Errors produced by the handle registry, resolver and dispatch engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShimError {
    #[error("Invalid pipe handle: {0}")]
    InvalidHandle(PipeHandle),
    #[error("No pending event for pipe {0}")]
    EmptyQueue(PipeHandle),
    #[error("Unknown interface version: {0}")]
    UnknownInterfaceVersion(String),
    #[error("Unknown interface family: {0}")]
    UnknownInterfaceFamily(String),
    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),
    #[error("Keepalive thread lifecycle error: {0}")]
    ThreadLifecycle(String),
    #[error("Pipe handle space exhausted")]
    HandleSpaceExhausted,
    #[error("Context not initialized: {0}")]
    NotInitialized(&'static str),
    #[error("Call result {0} is not available")]
    ResultUnavailable(CallId),
    #[error("Call result {call} has kind {actual}, expected {expected}")]
    KindMismatch {
        call: CallId,
        expected: i32,
        actual: i32,
    },
    #[error("Buffer of {provided} bytes cannot hold a {required} byte payload")]
    BufferTooSmall { provided: usize, required: usize },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for ShimError {
    fn from(err: toml::de::Error) -> Self {
        ShimError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ShimError {
    fn from(err: std::io::Error) -> Self {
        ShimError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShimError>;
