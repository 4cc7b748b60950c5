//! Supervisor (C7, §4.7): owns the reconnect loop around one-shot Sessions
//! (C6), the backoff schedule between attempts, and an `Enabled`/`Disabled`
//! toggle the interactive CLI can flip.
//!
//! Grounded on the teacher's `tunnel/mod.rs::run` (`loop { connect_and_run;
//! sleep(delay) raced against shutdown }` shape) and `app.rs::wait_for_shutdown`
//! for the dual-channel pattern; generalized here into two distinct `watch`
//! channels — `enabled` (supervisor pause/resume, interactive-only) layered
//! under `shutdown` (process-wide, always wins) — since the teacher has no
//! pause/resume concept of its own.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activity::ActivityClock;
use crate::backoff::Backoff;
use crate::gate::KeepaliveGate;
use crate::http::Router;
use crate::session::{self, SessionConfig, SessionOutcome};

/// A session that ran at least this long counts as healthy (§4.7) and
/// resets the backoff schedule for the next attempt.
const HEALTHY_RUN_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(30);

/// Handle for the interactive CLI to toggle the supervisor's Enabled/Disabled
/// state (§6 `--interactive`), independent of process shutdown.
#[derive(Clone)]
pub struct SupervisorHandle {
    enabled: watch::Sender<bool>,
}

impl SupervisorHandle {
    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.enabled.send(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }
}

/// Drive the reconnect loop until `shutdown` fires. Exits fatally (returning
/// `Err`) only on `HandshakeRejected` (§7: exit 3); every other session
/// outcome reconnects with backoff.
pub async fn run(
    config: SessionConfig,
    router: Arc<Router>,
    gate: Arc<KeepaliveGate>,
    activity: Arc<ActivityClock>,
    shutdown: CancellationToken,
) -> (SupervisorHandle, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let (enabled_tx, enabled_rx) = watch::channel(true);
    let handle = SupervisorHandle { enabled: enabled_tx };

    let join = tokio::spawn(async move {
        supervise(config, router, gate, activity, enabled_rx, shutdown).await
    });

    (handle, join)
}

async fn supervise(
    config: SessionConfig,
    router: Arc<Router>,
    gate: Arc<KeepaliveGate>,
    activity: Arc<ActivityClock>,
    mut enabled: watch::Receiver<bool>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut backoff = Backoff::new();

    loop {
        if !*enabled.borrow() {
            info!("supervisor disabled, idling until re-enabled");
            tokio::select! {
                result = enabled.changed() => {
                    if result.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                _ = shutdown.cancelled() => return Ok(()),
            }
        }

        let session_cancel = shutdown.child_token();
        let t_start = tokio::time::Instant::now();

        let result = tokio::select! {
            result = session::run(&config, Arc::clone(&router), Arc::clone(&gate), Arc::clone(&activity), session_cancel.clone()) => result,
            _ = shutdown.cancelled() => {
                session_cancel.cancel();
                return Ok(());
            }
            _ = wait_for_disable(&mut enabled) => {
                info!("supervisor disabled, cancelling current session");
                session_cancel.cancel();
                continue;
            }
        };

        match result {
            Ok(SessionOutcome::Cancelled) => {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                continue;
            }
            Ok(SessionOutcome::Disconnected) => {
                info!("tunnel disconnected, will reconnect");
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "tunnel handshake rejected, not reconnecting");
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "tunnel session ended with an error, will reconnect");
            }
        }

        if t_start.elapsed() >= HEALTHY_RUN_THRESHOLD {
            backoff.reset();
        }

        let delay = backoff.next_delay();
        info!(delay_ms = delay.as_millis(), "reconnecting tunnel");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => return Ok(()),
            _ = wait_for_disable(&mut enabled) => {
                info!("supervisor disabled during reconnect wait");
            }
        }
    }
}

/// Resolve only when `enabled` transitions to `false`; ignores transitions
/// that keep it `true` (e.g. the initial value) so callers can race it
/// against a session/sleep without spinning on spurious wakeups.
async fn wait_for_disable(enabled: &mut watch::Receiver<bool>) {
    loop {
        if enabled.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if !*enabled.borrow() {
            return;
        }
    }
}
