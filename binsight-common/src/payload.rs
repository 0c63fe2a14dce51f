//! Inbound ingestion payload schema
//!
//! Producers submit a JSON document in which every top-level section is
//! optional; absent sections mean "not reported" and are defaulted during
//! validation. Unknown fields are ignored so newer producers can ship extra
//! diagnostics without breaking older hubs.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Complete classification submission from a producer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationPayload {
    pub detection_id: Option<String>,
    /// Capture time as sent by the producer; parsed leniently (see [`parse_timestamp`])
    pub timestamp: Option<String>,
    pub processing_time_ms: Option<f64>,
    pub image_data: Option<ImagePayload>,
    pub cnn_prediction: Option<CnnPrediction>,
    pub sensor_data: Option<SensorPayload>,
    pub expert_system_result: Option<ExpertResult>,
    pub processing_metadata: Option<ProcessingMetadata>,
}

/// Captured image plus capture metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImagePayload {
    pub image_base64: Option<String>,
    pub format: Option<String>,
    /// "WIDTHxHEIGHT" as produced by the capture service
    pub dimensions: Option<String>,
    pub size_bytes: Option<i64>,
    pub capture_timestamp: Option<String>,
}

/// Vision model output, sent either flat or as a two-stage breakdown
///
/// The flat form carries the resolved class directly; the staged form
/// reports both pipeline stages and lets the hub resolve stage2 over stage1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CnnPrediction {
    Flat {
        predicted_class: String,
        confidence: f64,
        #[serde(default)]
        stage: Option<String>,
    },
    Staged {
        #[serde(default)]
        stage1: Option<StagePrediction>,
        #[serde(default)]
        stage2: Option<StagePrediction>,
        #[serde(default)]
        total_confidence: Option<f64>,
    },
}

/// One stage of the staged vision form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagePrediction {
    pub predicted_class: Option<String>,
    pub confidence: Option<f64>,
}

impl CnnPrediction {
    /// Resolved label: flat class, else stage2 over stage1
    pub fn label(&self) -> Option<&str> {
        match self {
            CnnPrediction::Flat { predicted_class, .. } => Some(predicted_class.as_str()),
            CnnPrediction::Staged { stage1, stage2, .. } => stage2
                .as_ref()
                .and_then(|s| s.predicted_class.as_deref())
                .or_else(|| stage1.as_ref().and_then(|s| s.predicted_class.as_deref())),
        }
    }

    /// Resolved confidence: flat value, else total, else stage2 over stage1
    pub fn confidence(&self) -> Option<f64> {
        match self {
            CnnPrediction::Flat { confidence, .. } => Some(*confidence),
            CnnPrediction::Staged {
                stage1,
                stage2,
                total_confidence,
            } => total_confidence
                .or_else(|| stage2.as_ref().and_then(|s| s.confidence))
                .or_else(|| stage1.as_ref().and_then(|s| s.confidence)),
        }
    }

    /// Stage tag for the record ("stage2" when the refinement stage ran)
    pub fn stage_name(&self) -> Option<String> {
        match self {
            CnnPrediction::Flat { stage, .. } => stage.clone(),
            CnnPrediction::Staged { stage2, .. } => {
                if stage2.as_ref().is_some_and(|s| s.predicted_class.is_some()) {
                    Some("stage2".to_string())
                } else {
                    Some("stage1".to_string())
                }
            }
        }
    }
}

/// Physical sensor readings taken while the item sat in the chamber
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorPayload {
    pub weight_grams: Option<f64>,
    pub is_metal: Option<bool>,
    pub humidity_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub is_moist: Option<bool>,
    pub is_transparent: Option<bool>,
    pub is_flexible: Option<bool>,
}

/// Rule-engine resolution over vision and sensor evidence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpertResult {
    pub final_classification: Option<String>,
    pub confidence: Option<f64>,
    pub disposal_location: Option<String>,
    pub reasoning: Option<String>,
    pub candidates_count: Option<i64>,
}

/// Pipeline bookkeeping reported by the producer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    #[serde(default)]
    pub stages_completed: Vec<String>,
    #[serde(default)]
    pub validation_results: serde_json::Map<String, serde_json::Value>,
    pub pipeline_version: Option<String>,
    pub processing_node: Option<String>,
    pub fallback_used: Option<bool>,
}

/// Parse a producer timestamp leniently
///
/// Producers emit either RFC 3339 with an offset or a naive ISO 8601 string;
/// naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_cnn_prediction_parses() {
        let json = r#"{"predicted_class": "plastic", "confidence": 0.92, "stage": "stage1"}"#;
        let prediction: CnnPrediction = serde_json::from_str(json).unwrap();
        assert_eq!(prediction.label(), Some("plastic"));
        assert_eq!(prediction.confidence(), Some(0.92));
        assert_eq!(prediction.stage_name(), Some("stage1".to_string()));
    }

    #[test]
    fn test_staged_cnn_prediction_prefers_stage2() {
        let json = r#"{
            "stage1": {"predicted_class": "plastic", "confidence": 0.85},
            "stage2": {"predicted_class": "PET_bottle", "confidence": 0.78},
            "total_confidence": 0.81
        }"#;
        let prediction: CnnPrediction = serde_json::from_str(json).unwrap();
        assert_eq!(prediction.label(), Some("PET_bottle"));
        assert_eq!(prediction.confidence(), Some(0.81));
        assert_eq!(prediction.stage_name(), Some("stage2".to_string()));
    }

    #[test]
    fn test_staged_cnn_prediction_falls_back_to_stage1() {
        let json = r#"{"stage1": {"predicted_class": "glass", "confidence": 0.9}}"#;
        let prediction: CnnPrediction = serde_json::from_str(json).unwrap();
        assert_eq!(prediction.label(), Some("glass"));
        assert_eq!(prediction.confidence(), Some(0.9));
        assert_eq!(prediction.stage_name(), Some("stage1".to_string()));
    }

    #[test]
    fn test_empty_payload_defaults_every_section() {
        let payload: ClassificationPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.detection_id.is_none());
        assert!(payload.image_data.is_none());
        assert!(payload.cnn_prediction.is_none());
        assert!(payload.sensor_data.is_none());
        assert!(payload.expert_system_result.is_none());
        assert!(payload.processing_metadata.is_none());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{
            "detection_id": "det-1",
            "image_data": {"format": "jpeg", "quality": 85, "original_dimensions": "1280x720"},
            "camera_firmware": "2.4.1"
        }"#;
        let payload: ClassificationPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.detection_id.as_deref(), Some("det-1"));
        assert_eq!(
            payload.image_data.unwrap().format.as_deref(),
            Some("jpeg")
        );
    }

    #[test]
    fn test_parse_timestamp_accepts_rfc3339_and_naive() {
        let with_offset = parse_timestamp("2026-08-25T10:30:00+02:00").unwrap();
        assert_eq!(with_offset.to_rfc3339(), "2026-08-25T08:30:00+00:00");

        let naive = parse_timestamp("2026-08-25T10:30:00.250000").unwrap();
        assert_eq!(naive.timestamp_subsec_millis(), 250);

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_processing_metadata_defaults_collections() {
        let metadata: ProcessingMetadata =
            serde_json::from_str(r#"{"pipeline_version": "v1.0"}"#).unwrap();
        assert!(metadata.stages_completed.is_empty());
        assert!(metadata.validation_results.is_empty());
        assert_eq!(metadata.pipeline_version.as_deref(), Some("v1.0"));
    }
}
