//! Domain model for classification records, alerts, and statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted waste-classification result
///
/// `final_label`, `final_confidence`, and `disposal_location` are the
/// effective values: when an override has been applied they carry the
/// corrected label/location while the original resolver output stays
/// untouched in storage. The raw vision and sensor fields are immutable
/// after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    /// Storage-assigned surrogate id
    pub id: i64,
    /// Producer-scoped detection token (generated when the producer omits it)
    pub detection_id: String,
    /// When the item was captured (server-assigned when absent)
    pub captured_at: DateTime<Utc>,

    // Vision stage output
    pub vision_label: Option<String>,
    pub vision_confidence: Option<f64>,
    pub vision_stage: Option<String>,

    // Sensor stage output
    pub weight_grams: Option<f64>,
    pub is_metal: Option<bool>,
    pub humidity_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub is_moist: Option<bool>,
    pub is_transparent: Option<bool>,
    pub is_flexible: Option<bool>,

    // Resolver outcome (effective values, override applied)
    pub final_label: String,
    pub final_confidence: f64,
    pub disposal_location: String,
    pub reasoning: Option<String>,
    pub candidates_count: Option<i64>,

    // Image capture metadata (blob stays in storage, fetched separately)
    pub has_image: bool,
    pub image_format: Option<String>,
    pub image_dimensions: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub image_captured_at: Option<DateTime<Utc>>,

    // Pipeline metadata
    pub processing_time_ms: Option<f64>,
    pub stages_completed: Vec<String>,
    pub validation_results: serde_json::Map<String, serde_json::Value>,
    pub pipeline_version: Option<String>,
    pub processing_node: Option<String>,
    pub fallback_used: bool,

    // Override audit fields
    pub overridden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_info: Option<OverrideInfo>,

    /// When the record was written
    pub created_at: DateTime<Utc>,
}

/// Manual correction applied to a classification (last write wins)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverrideInfo {
    pub new_label: String,
    pub new_disposal_location: String,
    pub reason: String,
    pub user_id: String,
    pub applied_at: DateTime<Utc>,
}

/// Validated, fully-defaulted classification ready for insertion
#[derive(Debug, Clone)]
pub struct NewClassification {
    pub detection_id: String,
    pub captured_at: DateTime<Utc>,
    pub vision_label: Option<String>,
    pub vision_confidence: Option<f64>,
    pub vision_stage: Option<String>,
    pub weight_grams: Option<f64>,
    pub is_metal: Option<bool>,
    pub humidity_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub is_moist: Option<bool>,
    pub is_transparent: Option<bool>,
    pub is_flexible: Option<bool>,
    pub final_label: String,
    pub final_confidence: f64,
    pub disposal_location: String,
    pub reasoning: Option<String>,
    pub candidates_count: Option<i64>,
    pub has_image: bool,
    /// Decoded image bytes, dropped (metadata kept) when over the size ceiling
    pub image_data: Option<Vec<u8>>,
    pub image_format: Option<String>,
    pub image_dimensions: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub image_captured_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<f64>,
    pub stages_completed: Vec<String>,
    pub validation_results: serde_json::Map<String, serde_json::Value>,
    pub pipeline_version: Option<String>,
    pub processing_node: Option<String>,
    pub fallback_used: bool,
}

/// Alert severity levels, ordered least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }

    /// Parse the storage representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AlertSeverity::Info),
            "warning" => Some(AlertSeverity::Warning),
            "error" => Some(AlertSeverity::Error),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operational alert, held in the bounded in-memory ring and mirrored to storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    /// Component that raised the alert ("ingest", "override", an upstream name, ...)
    pub source: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(severity: AlertSeverity, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            source: source.into(),
            message: message.into(),
            raised_at: Utc::now(),
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        }
    }
}

/// Per-label count in a statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

/// Per-hour count in a statistics snapshot, keyed "YYYY-MM-DD HH:00"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HourlyCount {
    pub hour: String,
    pub count: i64,
}

/// Aggregated view over a date window, recomputed wholesale and cached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total_classifications: i64,
    pub today_count: i64,
    pub week_count: i64,
    pub month_count: i64,
    /// Mean effective confidence over the window, 0 when the window is empty
    pub average_confidence: f64,
    /// Mean processing time in milliseconds, 0 when the window is empty
    pub average_processing_ms: f64,
    /// Percentage of records in the window carrying an override
    pub override_rate_percent: f64,
    pub label_breakdown: Vec<LabelCount>,
    /// Empty hours are omitted
    pub hourly_breakdown: Vec<HourlyCount>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
}

/// One page of classification records plus paging arithmetic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationPage {
    pub items: Vec<ClassificationRecord>,
    pub page: u32,
    pub page_size: u32,
    pub total_results: i64,
    pub total_pages: u32,
}

/// Composite search criteria; absent fields do not constrain, present fields AND together
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Substring match against the effective label
    pub label: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub overridden: Option<bool>,
    pub has_image: Option<bool>,
    /// Substring match against the detection token
    pub detection_id: Option<String>,
}

impl SearchCriteria {
    /// True when no field constrains the search
    pub fn is_empty(&self) -> bool {
        self.from.is_none()
            && self.to.is_none()
            && self.label.is_none()
            && self.min_confidence.is_none()
            && self.max_confidence.is_none()
            && self.overridden.is_none()
            && self.has_image.is_none()
            && self.detection_id.is_none()
    }
}

/// Map a waste label to its default disposal location
///
/// Unknown labels route to general waste rather than failing the pipeline.
pub fn default_disposal_location(label: &str) -> &'static str {
    match label.to_lowercase().as_str() {
        "plastic" => "Plastic recycling bin",
        "pet_bottle" => "PET plastic recycling bin",
        "plastic_bag" => "Soft plastics collection",
        "container" => "Hard plastics bin",
        "food_packaging" => "Mixed recycling (check contamination)",
        "metal" => "Metal recycling bin",
        "glass" => "Glass recycling bin",
        "paper" => "Paper recycling bin",
        "cardboard" => "Cardboard recycling bin",
        _ => "General waste bin",
    }
}
