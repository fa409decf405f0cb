//! Background tasks for the relay server.
//!
//! Includes:
//! - Reaping sessions that exceeded their maximum duration or went idle.

use crate::config::SessionLimits;
use crate::stream::teardown;
use crate::AppState;
use std::sync::Arc;
use tokio::time::sleep;

/// Starts the session reaper.
///
/// Runs indefinitely, periodically destroying sessions past the configured
/// limits. Reaped sessions go through the same teardown as `stop`, so their
/// transcripts are still submitted.
pub async fn start_session_reaper(state: Arc<AppState>, limits: SessionLimits) {
    if !limits.enabled() {
        tracing::warn!("session reaper disabled (max_duration=0, idle_timeout=0)");
        return;
    }

    let interval = limits.sweep_interval();
    tracing::info!(
        max_duration_secs = limits.max_duration_secs,
        idle_timeout_secs = limits.idle_timeout_secs,
        interval_secs = interval.as_secs(),
        "starting session reaper"
    );

    loop {
        sleep(interval).await;
        reap_expired(&state, &limits).await;
    }
}

/// Runs one sweep. Returns the number of sessions reaped.
pub async fn reap_expired(state: &AppState, limits: &SessionLimits) -> usize {
    let expired = state
        .registry
        .expired(limits.max_duration(), limits.idle_timeout());

    for (stream_id, session_id, reason) in &expired {
        tracing::warn!(
            stream_id = %stream_id,
            reason = reason.as_str(),
            "reaping expired call session"
        );
        teardown(state, stream_id, *session_id).await;
    }

    if !expired.is_empty() {
        tracing::info!(count = expired.len(), "reaped expired call sessions");
    }
    expired.len()
}
