//! Manual override workflow
//!
//! An override rewrites what a stored classification means without
//! touching the resolver's original output. Repeated overrides follow
//! last-write-wins; there is no history beyond the latest correction.

use binsight_common::events::HubEvent;
use binsight_common::model::{default_disposal_location, Alert, AlertSeverity};
use binsight_common::{Error, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::db;
use crate::db::retry::retry_once_on_lock;
use crate::state::AppState;

/// Correction submitted over REST or as a hub command
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideRequest {
    pub new_classification: String,
    /// Defaults to the disposal map entry for the new label
    pub new_disposal_location: Option<String>,
    pub reason: String,
    /// Defaults to "unknown"
    pub user_id: Option<String>,
}

/// Apply a manual override to a stored classification
///
/// Returns false when the id does not exist (or vanished mid-flight),
/// true when the correction was applied and broadcast.
pub async fn apply_override(
    state: &AppState,
    classification_id: i64,
    request: OverrideRequest,
) -> Result<bool> {
    let new_label = request.new_classification.trim().to_string();
    if new_label.is_empty() {
        return Err(Error::validation("new_classification", "must not be empty"));
    }

    let reason = request.reason.trim().to_string();
    if reason.is_empty() {
        return Err(Error::validation("reason", "must not be empty"));
    }

    let previous = match db::classifications::get(&state.db, classification_id).await {
        Ok(record) => record,
        Err(Error::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e),
    };

    let new_disposal_location = request
        .new_disposal_location
        .filter(|location| !location.trim().is_empty())
        .unwrap_or_else(|| default_disposal_location(&new_label).to_string());
    let user_id = request
        .user_id
        .filter(|user| !user.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let applied_at = Utc::now();

    let applied = retry_once_on_lock("override update", || {
        db::classifications::apply_override(
            &state.db,
            classification_id,
            &new_label,
            &new_disposal_location,
            &reason,
            &user_id,
            applied_at,
        )
    })
    .await?;

    if !applied {
        return Ok(false);
    }

    state.cache.invalidate_all().await;

    state
        .hub
        .publish_routed(&HubEvent::ClassificationOverridden {
            classification_id,
            detection_id: previous.detection_id.clone(),
            previous_label: previous.final_label.clone(),
            new_label: new_label.clone(),
            new_disposal_location: new_disposal_location.clone(),
            reason: reason.clone(),
            user_id: user_id.clone(),
            timestamp: applied_at,
        })
        .await;

    state
        .alerts
        .raise(Alert::new(
            AlertSeverity::Info,
            "override",
            format!(
                "Classification {} corrected: {} -> {} by {}",
                classification_id, previous.final_label, new_label, user_id
            ),
        ))
        .await;

    info!(
        classification_id,
        previous_label = %previous.final_label,
        new_label = %new_label,
        user_id = %user_id,
        "Override applied"
    );

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::create_schema;
    use crate::ingest::ingest_payload;
    use binsight_common::config::HubConfig;
    use binsight_common::events::GROUP_CLASSIFICATION;
    use binsight_common::payload::{ClassificationPayload, ExpertResult};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_state() -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        create_schema(&pool).await.expect("Failed to create schema");

        AppState::new(HubConfig::default(), pool)
    }

    async fn seed(state: &AppState, label: &str) -> i64 {
        let payload = ClassificationPayload {
            detection_id: Some(format!("det-{label}")),
            expert_system_result: Some(ExpertResult {
                final_classification: Some(label.to_string()),
                confidence: Some(0.9),
                disposal_location: None,
                reasoning: None,
                candidates_count: None,
            }),
            ..Default::default()
        };
        ingest_payload(state, &payload).await.unwrap().id
    }

    fn request(label: &str, reason: &str) -> OverrideRequest {
        OverrideRequest {
            new_classification: label.to_string(),
            new_disposal_location: None,
            reason: reason.to_string(),
            user_id: Some("operator-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_override_rewrites_effective_values() {
        let state = test_state().await;
        let id = seed(&state, "plastic").await;

        let applied = apply_override(&state, id, request("metal", "magnet held it")).await.unwrap();
        assert!(applied);

        let record = db::classifications::get(&state.db, id).await.unwrap();
        assert_eq!(record.final_label, "metal");
        assert_eq!(record.disposal_location, "Metal recycling bin");
        assert!(record.overridden);

        let info = record.override_info.expect("Override info should be set");
        assert_eq!(info.user_id, "operator-1");
        assert_eq!(info.reason, "magnet held it");
    }

    #[tokio::test]
    async fn test_override_broadcasts_with_previous_label() {
        let state = test_state().await;
        let id = seed(&state, "plastic").await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let member = state.hub.register(tx).await;
        state.hub.join(member, GROUP_CLASSIFICATION).await;

        apply_override(&state, id, request("metal", "visual misread")).await.unwrap();

        match rx.try_recv() {
            Ok(HubEvent::ClassificationOverridden {
                classification_id,
                previous_label,
                new_label,
                new_disposal_location,
                ..
            }) => {
                assert_eq!(classification_id, id);
                assert_eq!(previous_label, "plastic");
                assert_eq!(new_label, "metal");
                assert_eq!(new_disposal_location, "Metal recycling bin");
            }
            other => panic!("Expected ClassificationOverridden, got {other:?}"),
        }

        let alerts = state.alerts.recent(false).await;
        assert!(
            alerts.iter().any(|a| a.source == "override"),
            "Override should leave an informational alert"
        );
    }

    #[tokio::test]
    async fn test_override_missing_id_returns_false() {
        let state = test_state().await;
        assert!(!apply_override(&state, 999, request("metal", "reason")).await.unwrap());
    }

    #[tokio::test]
    async fn test_override_rejects_blank_fields() {
        let state = test_state().await;
        let id = seed(&state, "plastic").await;

        match apply_override(&state, id, request("  ", "reason")).await {
            Err(Error::Validation { field, .. }) => assert_eq!(field, "new_classification"),
            other => panic!("Expected validation error, got {other:?}"),
        }

        match apply_override(&state, id, request("metal", "")).await {
            Err(Error::Validation { field, .. }) => assert_eq!(field, "reason"),
            other => panic!("Expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_override_wins() {
        let state = test_state().await;
        let id = seed(&state, "plastic").await;

        apply_override(&state, id, request("metal", "first pass")).await.unwrap();
        apply_override(&state, id, request("glass", "second look")).await.unwrap();

        let record = db::classifications::get(&state.db, id).await.unwrap();
        assert_eq!(record.final_label, "glass");
        assert_eq!(record.disposal_location, "Glass recycling bin");
        assert_eq!(record.override_info.unwrap().reason, "second look");
    }

    #[tokio::test]
    async fn test_override_defaults_user_to_unknown() {
        let state = test_state().await;
        let id = seed(&state, "plastic").await;

        let mut req = request("paper", "creased like paper");
        req.user_id = None;
        apply_override(&state, id, req).await.unwrap();

        let record = db::classifications::get(&state.db, id).await.unwrap();
        assert_eq!(record.override_info.unwrap().user_id, "unknown");
    }
}
