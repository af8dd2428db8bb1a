//! # Shim Exports
//!
//! The C ABI surface. Every exported symbol forwards to one process-wide
//! [`ShimContext`] built on first use.
//!
//! ## Environment
//!
//! - `SHIM_CONFIG`: path of a TOML file with the context settings. Missing or
//!   invalid files fall back to the defaults.
//! - `SHIM_LOG`: tracing filter (e.g. `debug` or `shim_core=trace`). Logging
//!   stays off when unset so the host process output is untouched.
//!
//! ## Panic Safety
//!
//! No panic may unwind into foreign code. Every export runs its body through
//! [`guard`], which turns a panic into the export's failure value.

#![allow(non_snake_case)]

pub mod callback_object;
pub mod dispatch;
pub mod interfaces;
pub mod session;

use once_cell::sync::Lazy;
use shim_core::{DefaultSubsystems, ShimConfig, ShimContext};
use std::any::Any;
use std::ffi::{c_char, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const CONFIG_ENV: &str = "SHIM_CONFIG";
pub const LOG_ENV: &str = "SHIM_LOG";

static CONTEXT: Lazy<ShimContext> = Lazy::new(|| {
    setup_logging();
    let config = load_config();
    info!("🚀 Shim context ready");
    ShimContext::new(config, Arc::new(DefaultSubsystems))
});

/// The context shared by every export.
pub fn context() -> &'static ShimContext {
    &CONTEXT
}

fn setup_logging() {
    let Ok(filter) = std::env::var(LOG_ENV) else {
        return;
    };
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    // The host may already own a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true).with_writer(std::io::stderr))
        .try_init();
}

fn load_config() -> ShimConfig {
    let Ok(path) = std::env::var(CONFIG_ENV) else {
        return ShimConfig::default();
    };
    match ShimConfig::load(&path) {
        Ok(config) => {
            info!("📋 Loaded shim configuration from {}", path);
            config
        }
        Err(e) => {
            warn!("⚠️ Ignoring configuration {}: {}", path, e);
            ShimConfig::default()
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs an export body, returning `fallback` if it panics.
pub fn guard<T>(export: &'static str, fallback: T, body: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(panic) => {
            error!("💥 {} panicked: {}", export, panic_message(panic.as_ref()));
            fallback
        }
    }
}

/// Reads a caller supplied version token. Null yields `None`; invalid UTF-8
/// is replaced rather than rejected.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn token_from_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}
