//! Server-side backstop for sessions nobody closes
//!
//! Clients that crash and never come back cannot run their own recovery. The
//! janitor periodically auto-terminates active sessions whose last update is
//! older than the threshold and clears the owners' mining flag.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulse_core::{Clock, MiningSession, MiningStore, UserId};

use crate::error::MiningResult;
use crate::events::{EventBus, MiningEvent};
use crate::session::SessionController;

/// Called for every user whose mining flag a cleanup pass cleared
pub type ReleaseHook = Arc<dyn Fn(&UserId) + Send + Sync>;

/// Periodic inactive-session cleanup
pub struct SessionJanitor {
    store: Arc<dyn MiningStore>,
    clock: Arc<dyn Clock>,
    controller: Arc<SessionController>,
    events: EventBus,
    threshold: TimeDelta,
    interval: Duration,
    on_release: Option<ReleaseHook>,
}

impl SessionJanitor {
    pub fn new(
        store: Arc<dyn MiningStore>,
        clock: Arc<dyn Clock>,
        controller: Arc<SessionController>,
        events: EventBus,
        threshold: TimeDelta,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            controller,
            events,
            threshold,
            interval,
            on_release: None,
        }
    }

    /// Let the owner tear down its per-user state for terminated sessions
    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.on_release = Some(hook);
        self
    }

    /// Run one cleanup pass with the configured threshold
    pub async fn run_once(&self) -> MiningResult<Vec<MiningSession>> {
        self.cleanup_inactive_sessions(self.threshold).await
    }

    /// Auto-terminate active sessions not updated within `threshold`
    ///
    /// Returns the sessions that were closed. Failing to clear one user's
    /// mining flag is logged and does not abort the pass.
    pub async fn cleanup_inactive_sessions(
        &self,
        threshold: TimeDelta,
    ) -> MiningResult<Vec<MiningSession>> {
        let now = self.clock.now_utc();
        let terminated = self.store.batch_auto_terminate(threshold, now).await?;
        if terminated.is_empty() {
            debug!("No inactive sessions");
            return Ok(terminated);
        }

        for session in &terminated {
            match self.controller.clear_after_termination(&session.user_id).await {
                Ok(true) => {
                    if let Some(hook) = &self.on_release {
                        hook(&session.user_id);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(
                    user = %session.user_id,
                    session = %session.id,
                    error = %e,
                    "Failed to clear mining flag after auto-termination"
                ),
            }
        }

        info!(count = terminated.len(), threshold_hours = threshold.num_hours(), "Auto-terminated inactive sessions");
        self.events.emit(MiningEvent::SessionsAutoTerminated {
            count: terminated.len(),
        });
        Ok(terminated)
    }

    /// Spawn the janitor as a background task
    pub fn spawn(self: Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown_rx).await;
        })
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Session janitor started");

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Session janitor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "Cleanup pass failed");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for SessionJanitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionJanitor")
            .field("threshold", &self.threshold)
            .field("interval", &self.interval)
            .field("has_release_hook", &self.on_release.is_some())
            .finish()
    }
}
