//! Alert thresholds and the bounded alert ring
//!
//! `evaluate_record` turns a stored classification into zero or more
//! alerts. The `AlertCenter` keeps the newest alerts in a capped ring
//! for serving, mirrors each one to storage, and broadcasts ring changes
//! to dashboard subscribers. Raising is best-effort end to end: a mirror
//! failure is logged and never propagated to the ingestion path.

use binsight_common::events::HubEvent;
use binsight_common::model::{Alert, AlertSeverity, ClassificationRecord};
use binsight_common::{Error, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

use crate::db;
use crate::hub::Hub;

/// Final confidence below this raises a warning
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Pipeline runs slower than this raise an informational alert
pub const SLOW_PROCESSING_THRESHOLD_MS: f64 = 3000.0;

/// Evaluate a freshly stored record against the alert thresholds
pub fn evaluate_record(record: &ClassificationRecord) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if record.final_confidence < LOW_CONFIDENCE_THRESHOLD {
        alerts.push(Alert::new(
            AlertSeverity::Warning,
            "ingest",
            format!(
                "Low confidence classification: {} at {:.2}",
                record.final_label, record.final_confidence
            ),
        ));
    }

    if let Some(elapsed_ms) = record.processing_time_ms {
        if elapsed_ms > SLOW_PROCESSING_THRESHOLD_MS {
            alerts.push(Alert::new(
                AlertSeverity::Info,
                "ingest",
                format!("Slow pipeline run: {:.0} ms for {}", elapsed_ms, record.detection_id),
            ));
        }
    }

    if !record.has_image {
        alerts.push(Alert::new(
            AlertSeverity::Warning,
            "ingest",
            format!("No image captured for {}", record.detection_id),
        ));
    }

    alerts
}

pub struct AlertCenter {
    db: Pool<Sqlite>,
    hub: Arc<Hub>,
    capacity: usize,
    ring: Mutex<VecDeque<Alert>>,
}

impl AlertCenter {
    pub fn new(db: Pool<Sqlite>, hub: Arc<Hub>, capacity: usize) -> Self {
        Self {
            db,
            hub,
            capacity: capacity.max(1),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Seed the ring with the most recent stored alerts
    pub async fn init_from_storage(&self) -> Result<usize> {
        let mut alerts = db::alerts::recent(&self.db, self.capacity as i64).await?;
        // Oldest first, so the newest end up at the back of the ring
        alerts.reverse();

        let mut ring = self.ring.lock().await;
        ring.clear();
        ring.extend(alerts);
        Ok(ring.len())
    }

    /// Add an alert to the ring, mirror it, and broadcast it
    pub async fn raise(&self, alert: Alert) {
        {
            let mut ring = self.ring.lock().await;
            while ring.len() >= self.capacity {
                ring.pop_front();
            }
            ring.push_back(alert.clone());
        }

        if let Err(e) = db::alerts::insert(&self.db, &alert).await {
            error!(alert_id = %alert.id, "Failed to mirror alert to storage: {}", e);
        }

        self.hub
            .publish_routed(&HubEvent::AlertRaised {
                alert,
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Raise a batch of alerts in order
    pub async fn raise_all(&self, alerts: Vec<Alert>) {
        for alert in alerts {
            self.raise(alert).await;
        }
    }

    /// Resolve an alert, reporting whether this call won the transition
    ///
    /// Unknown ids are an error; resolving an already-resolved alert
    /// returns false.
    pub async fn resolve(&self, id: Uuid, resolved_by: &str) -> Result<bool> {
        let resolved_at = Utc::now();
        let won = db::alerts::resolve(&self.db, id, resolved_by, resolved_at).await?;

        if !won {
            if !db::alerts::exists(&self.db, id).await? {
                return Err(Error::NotFound(format!("alert {id}")));
            }
            return Ok(false);
        }

        {
            let mut ring = self.ring.lock().await;
            if let Some(entry) = ring.iter_mut().find(|a| a.id == id) {
                entry.resolved = true;
                entry.resolved_by = Some(resolved_by.to_string());
                entry.resolved_at = Some(resolved_at);
            }
        }

        self.hub
            .publish_routed(&HubEvent::AlertResolved {
                alert_id: id,
                resolved_by: resolved_by.to_string(),
                timestamp: Utc::now(),
            })
            .await;

        Ok(true)
    }

    /// Snapshot the ring, newest first
    pub async fn recent(&self, active_only: bool) -> Vec<Alert> {
        let ring = self.ring.lock().await;
        ring.iter()
            .rev()
            .filter(|alert| !active_only || !alert.resolved)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::create_schema;
    use binsight_common::events::GROUP_DASHBOARD;
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::sync::mpsc;

    fn record(confidence: f64, processing_ms: Option<f64>, has_image: bool) -> ClassificationRecord {
        ClassificationRecord {
            id: 1,
            detection_id: "det-1".to_string(),
            captured_at: Utc::now(),
            vision_label: Some("bottle".to_string()),
            vision_confidence: Some(confidence),
            vision_stage: None,
            weight_grams: None,
            is_metal: None,
            humidity_percent: None,
            temperature_celsius: None,
            is_moist: None,
            is_transparent: None,
            is_flexible: None,
            final_label: "plastic".to_string(),
            final_confidence: confidence,
            disposal_location: "Plastic recycling bin".to_string(),
            reasoning: None,
            candidates_count: None,
            has_image,
            image_format: None,
            image_dimensions: None,
            image_size_bytes: None,
            image_captured_at: None,
            processing_time_ms: processing_ms,
            stages_completed: Vec::new(),
            validation_results: serde_json::Map::new(),
            pipeline_version: None,
            processing_node: None,
            fallback_used: false,
            overridden: false,
            override_info: None,
            created_at: Utc::now(),
        }
    }

    async fn center_with_capacity(capacity: usize) -> (AlertCenter, Pool<Sqlite>, Arc<Hub>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        create_schema(&pool).await.expect("Failed to create schema");

        let hub = Arc::new(Hub::new());
        let center = AlertCenter::new(pool.clone(), hub.clone(), capacity);
        (center, pool, hub)
    }

    #[test]
    fn test_evaluate_flags_low_confidence_with_label_and_value() {
        let alerts = evaluate_record(&record(0.42, Some(100.0), true));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert!(alerts[0].message.contains("plastic"), "Message should name the label");
        assert!(alerts[0].message.contains("0.42"), "Message should carry the value");
    }

    #[test]
    fn test_evaluate_threshold_boundaries() {
        assert!(
            evaluate_record(&record(0.7, Some(3000.0), true)).is_empty(),
            "Values at the thresholds should not alert"
        );
        assert_eq!(evaluate_record(&record(0.69, Some(3001.0), true)).len(), 2);
    }

    #[test]
    fn test_evaluate_flags_slow_run_and_missing_image() {
        let alerts = evaluate_record(&record(0.9, Some(4200.0), false));
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].severity, AlertSeverity::Info);
        assert!(alerts[0].message.contains("4200"));
        assert_eq!(alerts[1].severity, AlertSeverity::Warning);
        assert!(alerts[1].message.contains("det-1"));
    }

    #[test]
    fn test_evaluate_missing_processing_time_is_not_slow() {
        assert!(evaluate_record(&record(0.9, None, true)).is_empty());
    }

    #[tokio::test]
    async fn test_ring_evicts_oldest_beyond_capacity() {
        let (center, _pool, _hub) = center_with_capacity(2).await;

        for i in 0..3 {
            center
                .raise(Alert::new(AlertSeverity::Info, "test", format!("alert #{i}")))
                .await;
        }

        let recent = center.recent(false).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "alert #2", "Newest should lead");
        assert_eq!(recent[1].message, "alert #1");
    }

    #[tokio::test]
    async fn test_raise_broadcasts_to_dashboard() {
        let (center, _pool, hub) = center_with_capacity(10).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await;
        hub.join(id, GROUP_DASHBOARD).await;

        center
            .raise(Alert::new(AlertSeverity::Warning, "ingest", "low confidence"))
            .await;

        match rx.try_recv() {
            Ok(HubEvent::AlertRaised { alert, .. }) => assert_eq!(alert.message, "low confidence"),
            other => panic!("Expected AlertRaised, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_raise_survives_mirror_failure() {
        let (center, pool, _hub) = center_with_capacity(10).await;

        sqlx::query("DROP TABLE alerts").execute(&pool).await.unwrap();

        center
            .raise(Alert::new(AlertSeverity::Error, "probe", "upstream down"))
            .await;

        let recent = center.recent(false).await;
        assert_eq!(recent.len(), 1, "Ring should still hold the alert");
    }

    #[tokio::test]
    async fn test_resolve_once_then_false_then_not_found() {
        let (center, _pool, _hub) = center_with_capacity(10).await;

        let alert = Alert::new(AlertSeverity::Warning, "ingest", "missing image");
        let id = alert.id;
        center.raise(alert).await;

        assert!(center.resolve(id, "operator").await.unwrap());
        assert!(!center.resolve(id, "operator-2").await.unwrap());

        let active = center.recent(true).await;
        assert!(active.is_empty(), "Resolved alert should drop out of the active view");

        let all = center.recent(false).await;
        assert_eq!(all.len(), 1);
        assert!(all[0].resolved);
        assert_eq!(all[0].resolved_by.as_deref(), Some("operator"));

        match center.resolve(Uuid::new_v4(), "operator").await {
            Err(Error::NotFound(_)) => {}
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_init_from_storage_seeds_newest_first() {
        let (center, pool, _hub) = center_with_capacity(2).await;

        for i in 0..3 {
            let mut alert = Alert::new(AlertSeverity::Info, "test", format!("stored #{i}"));
            alert.raised_at = Utc::now() + chrono::Duration::seconds(i);
            db::alerts::insert(&pool, &alert).await.unwrap();
        }

        let loaded = center.init_from_storage().await.unwrap();
        assert_eq!(loaded, 2, "Ring should load at most its capacity");

        let recent = center.recent(false).await;
        assert_eq!(recent[0].message, "stored #2");
        assert_eq!(recent[1].message, "stored #1");
    }
}
