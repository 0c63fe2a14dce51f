//! Upstream producer health probes and periodic broadcasts
//!
//! Two long-running loops spawned at startup: one probes every configured
//! upstream over HTTP and tracks the degraded set, one pushes SystemStatus
//! and StatsUpdate snapshots to dashboard subscribers.

use binsight_common::events::HubEvent;
use binsight_common::model::{Alert, AlertSeverity};
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::StatsKey;
use crate::state::AppState;
use crate::stats;

/// Probes slower than this count as unhealthy
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe every configured upstream forever
///
/// Returns immediately when no upstreams are configured.
pub async fn run_probe_loop(state: AppState) {
    if state.config.upstreams.is_empty() {
        info!("No upstreams configured, health probing disabled");
        return;
    }

    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build probe client: {e}");
            return;
        }
    };

    info!(
        upstreams = state.config.upstreams.len(),
        interval_seconds = state.config.probe_interval_seconds,
        "Upstream health probing started"
    );

    let mut tick = tokio::time::interval(Duration::from_secs(state.config.probe_interval_seconds.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        probe_round(&state, &client).await;
    }
}

/// One probe pass across all configured upstreams
pub async fn probe_round(state: &AppState, client: &reqwest::Client) {
    for upstream in &state.config.upstreams {
        let started = Instant::now();
        let outcome = client.get(&upstream.url).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (healthy, detail) = match outcome {
            Ok(response) if response.status().is_success() => (true, None),
            Ok(response) => (false, Some(format!("status {}", response.status()))),
            Err(e) => (false, Some(e.to_string())),
        };

        let transition = {
            let mut degraded = state.degraded.write().await;
            if healthy {
                degraded.remove(upstream.name.as_str())
            } else {
                degraded.insert(upstream.name.clone())
            }
        };

        if transition {
            if healthy {
                info!(upstream = %upstream.name, "Upstream recovered");
                state
                    .alerts
                    .raise(Alert::new(
                        AlertSeverity::Info,
                        &upstream.name,
                        format!("{} recovered, probes passing again", upstream.name),
                    ))
                    .await;
            } else {
                warn!(
                    upstream = %upstream.name,
                    detail = detail.as_deref().unwrap_or("no detail"),
                    "Upstream failing health probes"
                );
                state
                    .alerts
                    .raise(Alert::new(
                        AlertSeverity::Error,
                        &upstream.name,
                        format!(
                            "{} failing health probes: {}",
                            upstream.name,
                            detail.as_deref().unwrap_or("no detail")
                        ),
                    ))
                    .await;
            }
        } else {
            debug!(upstream = %upstream.name, healthy, latency_ms, "Upstream probed");
        }

        state
            .hub
            .publish_routed(&HubEvent::HealthUpdate {
                service: upstream.name.clone(),
                healthy,
                detail,
                latency_ms: Some(latency_ms),
                timestamp: Utc::now(),
            })
            .await;
    }
}

/// Push SystemStatus and StatsUpdate to dashboards on a fixed cadence
pub async fn run_status_loop(state: AppState) {
    let mut tick = tokio::time::interval(Duration::from_secs(state.config.stats_interval_seconds.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        broadcast_status_round(&state).await;
    }
}

/// One periodic broadcast pass
pub async fn broadcast_status_round(state: &AppState) {
    let status = state.system_status().await;
    state.hub.publish_routed(&status).await;

    let key = StatsKey { from: None, to: None };
    match state
        .cache
        .stats_or_compute(key, || stats::compute_statistics(&state.db, None, None))
        .await
    {
        Ok(snapshot) => {
            state
                .hub
                .publish_routed(&HubEvent::StatsUpdate {
                    snapshot,
                    timestamp: Utc::now(),
                })
                .await;
        }
        Err(e) => warn!("Periodic statistics broadcast skipped: {e}"),
    }
}
