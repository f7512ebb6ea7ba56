//! Periodic eviction of stale in-flight work

use std::sync::Arc;
use std::time::Instant;

use editorlink_core::CoalesceError;
use tokio::task::JoinHandle;

use crate::AppState;

/// Evict stale coalescer entries and abandoned editor requests.
///
/// Returns the number of coalescer entries evicted.
pub async fn sweep(state: &AppState, now: Instant) -> usize {
    let timeout = state.config.coalescing.stale_timeout();
    let evicted = state.coalescer.sweep_stale(now, timeout);

    let expired: Vec<_> = {
        let mut pending = state.pending.lock().await;
        let ids: Vec<_> = pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.sent_at) > timeout)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
            .collect()
    };

    if !expired.is_empty() {
        // Requests the plugin never picked up are dropped from the queue too
        let mut queue = state.request_queue.lock().await;
        queue.retain(|r| !expired.iter().any(|(id, _)| *id == r.id));
    }

    for (id, pending) in expired {
        let elapsed = now.saturating_duration_since(pending.sent_at);
        tracing::warn!(
            "Editor never answered {} ({}) within {:?}",
            pending.action,
            id,
            timeout
        );
        pending.completion.complete(Err(CoalesceError::Timeout {
            key: pending.action.clone(),
            elapsed_ms: elapsed.as_millis() as u64,
        }));
    }

    evicted
}

/// Run [`sweep`] on the configured cadence until the task is aborted
pub fn spawn_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.coalescing.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let evicted = sweep(&state, Instant::now()).await;
            if evicted > 0 {
                tracing::info!("Swept {} stale in-flight entries", evicted);
            }
        }
    })
}
