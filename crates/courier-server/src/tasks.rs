//! Periodic maintenance tasks.
//!
//! Two background loops run independently of connection tasks: the expiry
//! reaper deletes durable sessions past their expiry, and the
//! stale-connection reconciler clears bindings whose correlation key no
//! longer refers to a live connection. Both are idempotent and safe to run
//! concurrently with live traffic.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::error;

use crate::handlers::AppState;
use crate::metrics;

/// Spawn the expiry reaper and the stale-connection reconciler.
pub fn spawn_maintenance(state: Arc<AppState>) {
    let reap_every = Duration::from_secs(state.config.maintenance.reap_interval_secs);
    let reconcile_every = Duration::from_secs(state.config.maintenance.reconcile_interval_secs);

    let reaper_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = interval(reap_every);
        // Skip the immediate first tick.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match reaper_state.sessions.reap_expired().await {
                Ok(reaped) => metrics::record_sessions_reaped(reaped),
                Err(e) => {
                    error!(error = %e, "Session reaper pass failed");
                    metrics::record_error("reaper");
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = interval(reconcile_every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let registry = state.registry.clone();
            match state
                .sessions
                .reconcile_stale(move |id| registry.is_live(id))
                .await
            {
                Ok(cleared) => metrics::record_bindings_reconciled(cleared),
                Err(e) => {
                    error!(error = %e, "Reconciliation pass failed");
                    metrics::record_error("reconciler");
                }
            }
        }
    });
}
