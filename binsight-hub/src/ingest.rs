//! Ingestion pipeline: validate, persist, alert, broadcast
//!
//! `validate_payload` turns a producer payload into a fully defaulted
//! `NewClassification` or rejects it before anything is written. Range
//! violations and undecodable images are rejections; a missing label or
//! timestamp is defaulted instead, because a half-instrumented producer
//! is still worth recording.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use binsight_common::events::HubEvent;
use binsight_common::model::{default_disposal_location, ClassificationRecord, NewClassification};
use binsight_common::payload::{parse_timestamp, ClassificationPayload};
use binsight_common::{Error, Result};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::evaluate_record;
use crate::db;
use crate::db::retry::retry_once_on_lock;
use crate::state::AppState;

/// Validate a producer payload and fill every defaulted field
pub fn validate_payload(payload: &ClassificationPayload, image_max_bytes: usize) -> Result<NewClassification> {
    let vision_label = payload
        .cnn_prediction
        .as_ref()
        .and_then(|p| p.label())
        .map(|s| s.to_string());
    let vision_confidence = check_range(
        "cnn_prediction.confidence",
        payload.cnn_prediction.as_ref().and_then(|p| p.confidence()),
        0.0,
        1.0,
    )?;
    let vision_stage = payload.cnn_prediction.as_ref().and_then(|p| p.stage_name());

    let sensors = payload.sensor_data.as_ref();
    let weight_grams = check_range(
        "sensor_data.weight_grams",
        sensors.and_then(|s| s.weight_grams),
        0.0,
        10_000.0,
    )?;
    let humidity_percent = check_range(
        "sensor_data.humidity_percent",
        sensors.and_then(|s| s.humidity_percent),
        0.0,
        100.0,
    )?;
    let temperature_celsius = check_range(
        "sensor_data.temperature_celsius",
        sensors.and_then(|s| s.temperature_celsius),
        -40.0,
        80.0,
    )?;

    let expert = payload.expert_system_result.as_ref();
    let expert_confidence = check_range(
        "expert_system_result.confidence",
        expert.and_then(|e| e.confidence),
        0.0,
        1.0,
    )?;

    let final_label = expert
        .and_then(|e| e.final_classification.clone())
        .filter(|label| !label.is_empty())
        .or_else(|| vision_label.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let final_confidence = expert_confidence.or(vision_confidence).unwrap_or(0.0);
    let disposal_location = expert
        .and_then(|e| e.disposal_location.clone())
        .filter(|location| !location.is_empty())
        .unwrap_or_else(|| default_disposal_location(&final_label).to_string());

    let detection_id = payload
        .detection_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("det-{}", Uuid::new_v4()));

    let captured_at = match payload.timestamp.as_deref() {
        Some(raw) => parse_timestamp(raw).unwrap_or_else(|| {
            warn!(detection_id = %detection_id, timestamp = raw, "Unparseable timestamp, using receive time");
            Utc::now()
        }),
        None => Utc::now(),
    };

    let mut has_image = false;
    let mut image_data = None;
    let mut image_format = None;
    let mut image_dimensions = None;
    let mut image_size_bytes = None;
    let mut image_captured_at = None;

    if let Some(image) = &payload.image_data {
        image_format = Some(
            image
                .format
                .as_deref()
                .filter(|f| !f.is_empty())
                .unwrap_or("jpeg")
                .to_lowercase(),
        );
        image_dimensions = image.dimensions.clone();
        image_size_bytes = image.size_bytes;
        image_captured_at = image.capture_timestamp.as_deref().and_then(parse_timestamp);

        if let Some(encoded) = image.image_base64.as_deref().filter(|s| !s.is_empty()) {
            let bytes = BASE64
                .decode(encoded)
                .map_err(|e| Error::validation("image_data.image_base64", format!("invalid base64: {e}")))?;

            image_size_bytes = Some(bytes.len() as i64);

            if bytes.len() > image_max_bytes {
                warn!(
                    detection_id = %detection_id,
                    size_bytes = bytes.len(),
                    limit_bytes = image_max_bytes,
                    "Image over size ceiling, keeping metadata only"
                );
            } else {
                has_image = true;
                image_data = Some(bytes);
            }
        }
    }

    let metadata = payload.processing_metadata.as_ref();

    Ok(NewClassification {
        detection_id,
        captured_at,
        vision_label,
        vision_confidence,
        vision_stage,
        weight_grams,
        is_metal: sensors.and_then(|s| s.is_metal),
        humidity_percent,
        temperature_celsius,
        is_moist: sensors.and_then(|s| s.is_moist),
        is_transparent: sensors.and_then(|s| s.is_transparent),
        is_flexible: sensors.and_then(|s| s.is_flexible),
        final_label,
        final_confidence,
        disposal_location,
        reasoning: expert.and_then(|e| e.reasoning.clone()),
        candidates_count: expert.and_then(|e| e.candidates_count),
        has_image,
        image_data,
        image_format,
        image_dimensions,
        image_size_bytes,
        image_captured_at,
        processing_time_ms: payload.processing_time_ms,
        stages_completed: metadata.map(|m| m.stages_completed.clone()).unwrap_or_default(),
        validation_results: metadata.map(|m| m.validation_results.clone()).unwrap_or_default(),
        pipeline_version: metadata.and_then(|m| m.pipeline_version.clone()),
        processing_node: metadata.and_then(|m| m.processing_node.clone()),
        fallback_used: metadata.and_then(|m| m.fallback_used).unwrap_or(false),
    })
}

/// Run the full ingestion path for one payload
///
/// Validation failures reject the payload before any write. After the
/// insert the caches reset, alerts are evaluated best-effort, and the
/// stored record goes out to classification and dashboard subscribers.
pub async fn ingest_payload(state: &AppState, payload: &ClassificationPayload) -> Result<ClassificationRecord> {
    let new = validate_payload(payload, state.config.image_max_bytes)?;

    let id = retry_once_on_lock("classification insert", || {
        db::classifications::insert(&state.db, &new)
    })
    .await?;

    state.cache.invalidate_all().await;

    let record = db::classifications::get(&state.db, id).await?;

    state.alerts.raise_all(evaluate_record(&record)).await;

    state
        .hub
        .publish_routed(&HubEvent::ClassificationResult {
            record: record.clone(),
            timestamp: Utc::now(),
        })
        .await;

    info!(
        classification_id = id,
        detection_id = %record.detection_id,
        label = %record.final_label,
        confidence = record.final_confidence,
        "Classification stored"
    );

    Ok(record)
}

fn check_range(field: &str, value: Option<f64>, min: f64, max: f64) -> Result<Option<f64>> {
    if let Some(v) = value {
        if !v.is_finite() || v < min || v > max {
            return Err(Error::validation(field, format!("{v} outside [{min}, {max}]")));
        }
    }
    Ok(value)
}
