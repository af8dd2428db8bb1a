//! Why a session loop stopped, and the process signals that stop it.

use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The requested number of pumps ran.
    CycleLimit,
    Interrupt,
    Terminate,
    /// Stopped by its caller without a signal.
    Requested,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::CycleLimit => "cycle limit",
            StopReason::Interrupt => "interrupt",
            StopReason::Terminate => "terminate",
            StopReason::Requested => "request",
        };
        f.write_str(name)
    }
}

/// Resolves with the first termination signal the process receives. Never
/// resolves if the handlers cannot be installed, so the session then runs
/// until its cycle limit.
pub async fn termination() -> StopReason {
    match listen().await {
        Ok(reason) => {
            info!("📡 Received {} signal", reason);
            reason
        }
        Err(e) => {
            warn!("⚠️ Signal handling unavailable: {}", e);
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn listen() -> std::io::Result<StopReason> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(tokio::select! {
        _ = interrupt.recv() => StopReason::Interrupt,
        _ = terminate.recv() => StopReason::Terminate,
    })
}

#[cfg(not(unix))]
async fn listen() -> std::io::Result<StopReason> {
    tokio::signal::ctrl_c().await?;
    Ok(StopReason::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&StopReason::CycleLimit).unwrap(),
            "\"cycle_limit\""
        );
        assert_eq!(StopReason::Terminate.to_string(), "terminate");
    }
}
