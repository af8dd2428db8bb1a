//! In-process session runner.
//!
//! Starts a client (and optionally a game server) on a private
//! [`ShimContext`], resolves version tokens, then pumps the dispatch engine
//! on a fixed interval until told to stop.

use crate::config::SessionSettings;
use crate::signals::StopReason;
use serde::Serialize;
use shim_core::{
    CallId, CallbackTarget, DefaultSubsystems, DispatchMode, DispatchStats, Family,
    InterfaceTable, PipeHandle, Role, ShimConfig, ShimContext, ShimError,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Callback kind of a persona state change.
pub const PERSONA_STATE_CHANGE: i32 = 304;

/// Counts and logs what the dispatch engine hands it.
#[derive(Debug)]
pub struct DeliveryLog {
    kind: i32,
    delivered: AtomicU64,
}

impl DeliveryLog {
    pub fn new(kind: i32) -> Self {
        Self {
            kind,
            delivered: AtomicU64::new(0),
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl CallbackTarget for DeliveryLog {
    fn kind(&self) -> i32 {
        self.kind
    }

    fn run(&self, payload: &[u8]) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        info!("📨 Callback {} delivered ({} bytes)", self.kind, payload.len());
    }

    fn run_call_result(&self, payload: &[u8], io_failure: bool, call: CallId) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        info!(
            "📨 Call result {} delivered ({} bytes, failed: {})",
            call,
            payload.len(),
            io_failure
        );
    }
}

/// How one version token resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedInterface {
    pub token: String,
    pub family: Option<String>,
    pub shape: Option<String>,
    /// False when the latest shape of the family stood in for an unknown token
    pub exact: bool,
    pub served_by: Option<Role>,
    pub error: Option<String>,
}

/// Summary printed when the session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub pumps: u64,
    pub stopped_by: StopReason,
    pub generation: u64,
    pub live_pipes: usize,
    pub dispatch_mode: DispatchMode,
    pub delivered: u64,
    pub drained: u64,
    pub stats: DispatchStats,
}

pub struct SessionRunner {
    context: ShimContext,
    settings: SessionSettings,
    log: Arc<DeliveryLog>,
    drained: AtomicU64,
}

impl SessionRunner {
    pub fn new(config: ShimConfig, settings: SessionSettings) -> Self {
        Self {
            context: ShimContext::new(config, Arc::new(DefaultSubsystems)),
            settings,
            log: Arc::new(DeliveryLog::new(PERSONA_STATE_CHANGE)),
            drained: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &ShimContext {
        &self.context
    }

    /// Brings the session up and announces the local persona.
    pub fn start(&self) -> Result<(), ShimError> {
        if self.settings.manual_dispatch {
            self.context.manual_dispatch_init();
        }

        let pipe = self.context.init_client()?;
        info!("🎮 Client session on pipe {}", pipe);

        if self.settings.server {
            let pipe = self.context.init_server()?;
            info!("🖥️ Game server session on pipe {}", pipe);
        }

        self.context
            .register_callback(self.log.clone(), PERSONA_STATE_CHANGE);
        let steam_id = 76_561_197_960_287_930u64.to_le_bytes();
        self.context
            .post_callback(Role::Client, PERSONA_STATE_CHANGE, steam_id.to_vec());
        Ok(())
    }

    /// Resolves every token against the client session.
    pub fn resolve_all(&self, tokens: &[String]) -> Vec<ResolvedInterface> {
        let table = InterfaceTable::builtin();
        let user = self.context.client_user();
        let pipe = self.context.client_pipe();

        tokens
            .iter()
            .map(|token| match table.resolve(token) {
                Ok(resolution) => {
                    let adapter = if resolution.family() == Family::Client {
                        self.context.create_interface(token)
                    } else {
                        self.context.resolve_interface(user, pipe, token)
                    };
                    debug!("Resolved {} to {}", token, resolution.shape);
                    ResolvedInterface {
                        token: token.clone(),
                        family: Some(resolution.family().to_string()),
                        shape: Some(resolution.shape.to_string()),
                        exact: resolution.exact,
                        served_by: adapter.as_ref().map(|adapter| adapter.role()),
                        error: None,
                    }
                }
                Err(e) => ResolvedInterface {
                    token: token.clone(),
                    family: None,
                    shape: None,
                    exact: false,
                    served_by: None,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    fn pipes(&self) -> Vec<PipeHandle> {
        let mut pipes = vec![self.context.client_pipe()];
        if self.settings.server {
            pipes.push(self.context.server_pipe());
        }
        pipes
    }

    /// Runs one dispatch round and returns the number of manual events drained.
    pub fn pump(&self) -> u64 {
        if self.context.dispatch_mode() == DispatchMode::Automatic {
            self.context.run_callbacks(true, self.settings.server);
            return 0;
        }

        let mut drained = 0;
        for pipe in self.pipes() {
            self.context.manual_dispatch_run_frame(pipe);
            while let Ok(message) = self.context.manual_dispatch_get_next_callback(pipe) {
                debug!(
                    "📥 Pipe {} event {} for user {} ({} bytes)",
                    pipe,
                    message.kind,
                    message.user,
                    message.payload.len()
                );
                self.context.manual_dispatch_free_last_callback(pipe);
                drained += 1;
            }
        }
        self.drained.fetch_add(drained, Ordering::Relaxed);
        drained
    }

    /// Pumps every `pump_interval_ms` until `cycles` pumps ran or `shutdown`
    /// completes. Returns the number of pumps and what ended the loop.
    pub async fn run(
        &self,
        cycles: Option<u64>,
        shutdown: impl Future<Output = StopReason>,
    ) -> (u64, StopReason) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.settings.pump_interval_ms));
        tokio::pin!(shutdown);

        let mut pumps = 0u64;
        loop {
            if cycles.is_some_and(|limit| pumps >= limit) {
                return (pumps, StopReason::CycleLimit);
            }
            tokio::select! {
                reason = &mut shutdown => {
                    info!("🛑 Stopping on {} after {} pumps", reason, pumps);
                    return (pumps, reason);
                }
                _ = interval.tick() => {
                    self.pump();
                    pumps += 1;
                }
            }
        }
    }

    /// Ends both sessions. The aggregate goes away with the last pipe.
    pub fn stop(&self) {
        self.context.unregister_callback(self.log.as_ref());
        if self.settings.server {
            self.context.shutdown_server();
        }
        self.context.shutdown_client();
    }

    pub fn report(&self, pumps: u64, stopped_by: StopReason) -> SessionReport {
        SessionReport {
            pumps,
            stopped_by,
            generation: self.context.generation(),
            live_pipes: self.context.live_pipes(),
            dispatch_mode: self.context.dispatch_mode(),
            delivered: self.log.delivered(),
            drained: self.drained.load(Ordering::Relaxed),
            stats: self.context.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shim_core::KeepaliveSettings;

    fn quiet_config() -> ShimConfig {
        ShimConfig {
            keepalive: KeepaliveSettings {
                enabled: false,
                ..KeepaliveSettings::default()
            },
            ..ShimConfig::default()
        }
    }

    fn settings(server: bool, manual_dispatch: bool) -> SessionSettings {
        SessionSettings {
            pump_interval_ms: 1,
            resolve: Vec::new(),
            server,
            manual_dispatch,
        }
    }

    #[tokio::test]
    async fn test_automatic_session_delivers_persona() {
        let runner = SessionRunner::new(quiet_config(), settings(false, false));
        runner.start().unwrap();

        let (pumps, reason) = runner.run(Some(3), std::future::pending()).await;
        assert_eq!(pumps, 3);
        assert_eq!(reason, StopReason::CycleLimit);

        let report = runner.report(pumps, reason);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.drained, 0);
        assert_eq!(report.live_pipes, 1);
        assert!(report.stats.cycles >= 3);
        assert_eq!(report.stats.callbacks_delivered, 1);

        runner.stop();
        assert!(!runner.context().is_alive());
        assert_eq!(runner.report(pumps, reason).live_pipes, 0);
    }

    #[tokio::test]
    async fn test_manual_session_drains_queues() {
        let runner = SessionRunner::new(quiet_config(), settings(true, true));
        runner.start().unwrap();
        runner.context().post_callback(Role::Server, 101, vec![1]);

        let (pumps, reason) = runner.run(Some(2), std::future::pending()).await;

        let report = runner.report(pumps, reason);
        assert_eq!(report.dispatch_mode, DispatchMode::Manual);
        assert_eq!(report.live_pipes, 2);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.drained, 2);
        assert_eq!(runner.context().queued_events(Role::Client), 0);
        assert_eq!(runner.context().queued_events(Role::Server), 0);

        runner.stop();
        assert!(!runner.context().is_alive());
    }

    #[tokio::test]
    async fn test_shutdown_future_stops_the_loop() {
        let runner = SessionRunner::new(quiet_config(), settings(false, false));
        runner.start().unwrap();

        let (pumps, reason) = runner
            .run(None, std::future::ready(StopReason::Terminate))
            .await;
        assert_eq!(pumps, 0);
        assert_eq!(reason, StopReason::Terminate);
        assert_eq!(runner.report(pumps, reason).stopped_by, StopReason::Terminate);
        runner.stop();
    }

    #[test]
    fn test_resolve_all_reports_each_token() {
        let runner = SessionRunner::new(quiet_config(), settings(false, false));
        runner.start().unwrap();

        let tokens: Vec<String> = ["SteamUser021", "SteamClient020", "SteamUser999", "Bogus001"]
            .iter()
            .map(|token| token.to_string())
            .collect();
        let resolved = runner.resolve_all(&tokens);

        assert_eq!(resolved[0].family.as_deref(), Some("SteamUser"));
        assert_eq!(resolved[0].shape.as_deref(), Some("ISteamUser021"));
        assert!(resolved[0].exact);
        assert_eq!(resolved[0].served_by, Some(Role::Client));

        assert_eq!(resolved[1].family.as_deref(), Some("SteamClient"));
        assert!(resolved[1].served_by.is_some());

        assert!(!resolved[2].exact);
        assert_eq!(resolved[2].shape.as_deref(), Some("ISteamUser023"));
        assert!(resolved[2].served_by.is_some());

        assert!(resolved[3].family.is_none());
        assert!(resolved[3].served_by.is_none());
        assert!(resolved[3].error.is_some());

        runner.stop();
    }
}
