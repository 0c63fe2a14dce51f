//! Shared application state
//!
//! One `AppState` is built at startup and cloned into every handler,
//! session, and background task. All fields are cheap to clone.

use binsight_common::config::HubConfig;
use binsight_common::events::HubEvent;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::alerts::AlertCenter;
use crate::cache::AggregateCache;
use crate::hub::Hub;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HubConfig>,
    pub db: SqlitePool,
    pub hub: Arc<Hub>,
    pub alerts: Arc<AlertCenter>,
    pub cache: Arc<AggregateCache>,
    pub started_at: Instant,
    /// Upstream names currently failing their health probes
    pub degraded: Arc<RwLock<HashSet<String>>>,
}

impl AppState {
    pub fn new(config: HubConfig, db: SqlitePool) -> Self {
        let hub = Arc::new(Hub::new());
        let alerts = Arc::new(AlertCenter::new(
            db.clone(),
            hub.clone(),
            config.alert_ring_capacity,
        ));
        let cache = Arc::new(AggregateCache::new(Duration::from_secs(config.cache_ttl_seconds)));

        Self {
            config: Arc::new(config),
            db,
            hub,
            alerts,
            cache,
            started_at: Instant::now(),
            degraded: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Snapshot hub-wide status for broadcasts and direct replies
    pub async fn system_status(&self) -> HubEvent {
        let degraded: Vec<String> = {
            let set = self.degraded.read().await;
            let mut names: Vec<String> = set.iter().cloned().collect();
            names.sort();
            names
        };

        HubEvent::SystemStatus {
            healthy: degraded.is_empty(),
            degraded,
            connections: self.hub.connection_count().await,
            groups: self.hub.group_names().await,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_system_status_reflects_connections_and_degradation() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        create_schema(&pool).await.expect("Failed to create schema");

        let state = AppState::new(HubConfig::default(), pool);

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let id = state.hub.register(tx).await;
        state.hub.join(id, "Dashboard").await;

        match state.system_status().await {
            HubEvent::SystemStatus {
                healthy,
                degraded,
                connections,
                groups,
                ..
            } => {
                assert!(healthy);
                assert!(degraded.is_empty());
                assert_eq!(connections, 1);
                assert_eq!(groups, vec!["Dashboard"]);
            }
            other => panic!("Expected SystemStatus, got {other:?}"),
        }

        state.degraded.write().await.insert("cnn_service".to_string());

        match state.system_status().await {
            HubEvent::SystemStatus { healthy, degraded, .. } => {
                assert!(!healthy);
                assert_eq!(degraded, vec!["cnn_service"]);
            }
            other => panic!("Expected SystemStatus, got {other:?}"),
        }
    }
}
