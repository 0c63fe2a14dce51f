//! Classification record queries
//!
//! Reads compose the effective label, confidence, and disposal location
//! from the override columns, so callers always see corrected values
//! while the resolver's original output stays untouched in its own
//! columns. The image blob is stored here but never selected into a
//! record; `get_image` fetches it on demand.

use binsight_common::model::{
    ClassificationPage, ClassificationRecord, NewClassification, OverrideInfo, SearchCriteria,
};
use binsight_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};

use crate::pagination::calculate_pagination;

/// Hard ceiling on search result sets
pub const SEARCH_RESULT_CAP: i64 = 500;

/// Record columns in SELECT order; the image blob is deliberately absent
const RECORD_COLUMNS: &str = "id, detection_id, captured_at, \
     vision_label, vision_confidence, vision_stage, \
     weight_grams, is_metal, humidity_percent, temperature_celsius, \
     is_moist, is_transparent, is_flexible, \
     final_label, final_confidence, disposal_location, reasoning, candidates_count, \
     has_image, image_format, image_dimensions, image_size_bytes, image_captured_at, \
     processing_time_ms, stages_completed, validation_results, \
     pipeline_version, processing_node, fallback_used, \
     overridden, override_label, override_disposal, override_reason, override_user, override_at, \
     created_at";

/// SQL expression for the label after any override
pub(crate) const EFFECTIVE_LABEL: &str = "COALESCE(override_label, final_label)";

/// SQL expression for the confidence after any override (a manual
/// correction is taken at full confidence)
pub(crate) const EFFECTIVE_CONFIDENCE: &str =
    "CASE WHEN overridden = 1 THEN 1.0 ELSE final_confidence END";

/// Insert a validated classification, returning its storage id
pub async fn insert(db: &Pool<Sqlite>, new: &NewClassification) -> Result<i64> {
    let stages_json = serde_json::to_string(&new.stages_completed)?;
    let validation_json = serde_json::to_string(&new.validation_results)?;

    let result = sqlx::query(
        r#"
        INSERT INTO classifications (
            detection_id, captured_at,
            vision_label, vision_confidence, vision_stage,
            weight_grams, is_metal, humidity_percent, temperature_celsius,
            is_moist, is_transparent, is_flexible,
            final_label, final_confidence, disposal_location, reasoning, candidates_count,
            has_image, image_data, image_format, image_dimensions, image_size_bytes, image_captured_at,
            processing_time_ms, stages_completed, validation_results,
            pipeline_version, processing_node, fallback_used, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&new.detection_id)
    .bind(new.captured_at)
    .bind(&new.vision_label)
    .bind(new.vision_confidence)
    .bind(&new.vision_stage)
    .bind(new.weight_grams)
    .bind(new.is_metal)
    .bind(new.humidity_percent)
    .bind(new.temperature_celsius)
    .bind(new.is_moist)
    .bind(new.is_transparent)
    .bind(new.is_flexible)
    .bind(&new.final_label)
    .bind(new.final_confidence)
    .bind(&new.disposal_location)
    .bind(&new.reasoning)
    .bind(new.candidates_count)
    .bind(new.has_image)
    .bind(&new.image_data)
    .bind(&new.image_format)
    .bind(&new.image_dimensions)
    .bind(new.image_size_bytes)
    .bind(new.image_captured_at)
    .bind(new.processing_time_ms)
    .bind(stages_json)
    .bind(validation_json)
    .bind(&new.pipeline_version)
    .bind(&new.processing_node)
    .bind(new.fallback_used)
    .bind(Utc::now())
    .execute(db)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Get a classification record by storage id
pub async fn get(db: &Pool<Sqlite>, id: i64) -> Result<ClassificationRecord> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM classifications WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("classification {id}")))?;

    record_from_row(&row)
}

/// Fetch the stored image bytes and format for a record
///
/// Records ingested without an image (or with one dropped for size)
/// report not-found rather than an empty body.
pub async fn get_image(db: &Pool<Sqlite>, id: i64) -> Result<(Vec<u8>, String)> {
    let row = sqlx::query("SELECT has_image, image_data, image_format FROM classifications WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| Error::NotFound(format!("classification {id}")))?;

    let has_image: bool = row.get("has_image");
    let data: Option<Vec<u8>> = row.get("image_data");

    match (has_image, data) {
        (true, Some(bytes)) => {
            let format = row
                .get::<Option<String>, _>("image_format")
                .unwrap_or_else(|| "jpeg".to_string());
            Ok((bytes, format))
        }
        _ => Err(Error::NotFound(format!("classification {id} has no stored image"))),
    }
}

/// Delete a record, reporting whether a row was removed
pub async fn delete(db: &Pool<Sqlite>, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM classifications WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Total number of stored classifications
pub async fn count(db: &Pool<Sqlite>) -> Result<i64> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classifications")
        .fetch_one(db)
        .await?;

    Ok(total)
}

/// Fetch one page of records, newest first, optionally filtered by
/// effective label (substring match)
pub async fn page(
    db: &Pool<Sqlite>,
    requested_page: i64,
    requested_size: i64,
    label: Option<&str>,
) -> Result<ClassificationPage> {
    let pattern = label.map(|label| format!("%{label}%"));

    let total_results: i64 = match &pattern {
        Some(pattern) => {
            let sql = format!("SELECT COUNT(*) FROM classifications WHERE {EFFECTIVE_LABEL} LIKE ?");
            sqlx::query_scalar(&sql).bind(pattern).fetch_one(db).await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM classifications")
                .fetch_one(db)
                .await?
        }
    };

    let pagination = calculate_pagination(total_results, requested_page, requested_size);

    let rows = match &pattern {
        Some(pattern) => {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM classifications WHERE {EFFECTIVE_LABEL} LIKE ? \
                 ORDER BY captured_at DESC, id DESC LIMIT ? OFFSET ?"
            );
            sqlx::query(&sql)
                .bind(pattern)
                .bind(pagination.page_size)
                .bind(pagination.offset)
                .fetch_all(db)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM classifications \
                 ORDER BY captured_at DESC, id DESC LIMIT ? OFFSET ?"
            );
            sqlx::query(&sql)
                .bind(pagination.page_size)
                .bind(pagination.offset)
                .fetch_all(db)
                .await?
        }
    };

    let items = rows
        .iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(ClassificationPage {
        items,
        page: pagination.page as u32,
        page_size: pagination.page_size as u32,
        total_results,
        total_pages: pagination.total_pages as u32,
    })
}

/// Search records by composite criteria
///
/// Present fields AND together; absent fields do not constrain. Results
/// come back newest first, capped at [`SEARCH_RESULT_CAP`].
pub async fn search(db: &Pool<Sqlite>, criteria: &SearchCriteria) -> Result<Vec<ClassificationRecord>> {
    let mut clauses: Vec<String> = Vec::new();

    if criteria.from.is_some() {
        clauses.push("captured_at >= ?".to_string());
    }
    if criteria.to.is_some() {
        clauses.push("captured_at <= ?".to_string());
    }
    if criteria.label.is_some() {
        clauses.push(format!("{EFFECTIVE_LABEL} LIKE ?"));
    }
    if criteria.min_confidence.is_some() {
        clauses.push(format!("{EFFECTIVE_CONFIDENCE} >= ?"));
    }
    if criteria.max_confidence.is_some() {
        clauses.push(format!("{EFFECTIVE_CONFIDENCE} <= ?"));
    }
    if criteria.overridden.is_some() {
        clauses.push("overridden = ?".to_string());
    }
    if criteria.has_image.is_some() {
        clauses.push("has_image = ?".to_string());
    }
    if criteria.detection_id.is_some() {
        clauses.push("detection_id LIKE ?".to_string());
    }

    let mut sql = format!("SELECT {RECORD_COLUMNS} FROM classifications");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY captured_at DESC, id DESC LIMIT ?");

    // Binds must mirror the clause order above
    let mut query = sqlx::query(&sql);
    if let Some(from) = criteria.from {
        query = query.bind(from);
    }
    if let Some(to) = criteria.to {
        query = query.bind(to);
    }
    if let Some(label) = &criteria.label {
        query = query.bind(format!("%{label}%"));
    }
    if let Some(min) = criteria.min_confidence {
        query = query.bind(min);
    }
    if let Some(max) = criteria.max_confidence {
        query = query.bind(max);
    }
    if let Some(overridden) = criteria.overridden {
        query = query.bind(overridden);
    }
    if let Some(has_image) = criteria.has_image {
        query = query.bind(has_image);
    }
    if let Some(detection_id) = &criteria.detection_id {
        query = query.bind(format!("%{detection_id}%"));
    }

    let rows = query.bind(SEARCH_RESULT_CAP).fetch_all(db).await?;

    rows.iter().map(record_from_row).collect()
}

/// Apply a manual override to a record (last write wins)
///
/// Returns false when the id does not exist. The original resolver
/// columns are left untouched; only the override columns change.
pub async fn apply_override(
    db: &Pool<Sqlite>,
    id: i64,
    new_label: &str,
    new_disposal: &str,
    reason: &str,
    user_id: &str,
    applied_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE classifications
        SET overridden = 1,
            override_label = ?,
            override_disposal = ?,
            override_reason = ?,
            override_user = ?,
            override_at = ?
        WHERE id = ?
        "#,
    )
    .bind(new_label)
    .bind(new_disposal)
    .bind(reason)
    .bind(user_id)
    .bind(applied_at)
    .bind(id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn record_from_row(row: &SqliteRow) -> Result<ClassificationRecord> {
    let overridden: bool = row.get("overridden");
    let stored_label: String = row.get("final_label");
    let stored_confidence: f64 = row.get("final_confidence");
    let stored_disposal: String = row.get("disposal_location");
    let override_label: Option<String> = row.get("override_label");
    let override_disposal: Option<String> = row.get("override_disposal");

    let override_info = if overridden {
        Some(OverrideInfo {
            new_label: override_label.clone().unwrap_or_else(|| stored_label.clone()),
            new_disposal_location: override_disposal
                .clone()
                .unwrap_or_else(|| stored_disposal.clone()),
            reason: row.get::<Option<String>, _>("override_reason").unwrap_or_default(),
            user_id: row
                .get::<Option<String>, _>("override_user")
                .unwrap_or_else(|| "unknown".to_string()),
            applied_at: row
                .get::<Option<DateTime<Utc>>, _>("override_at")
                .unwrap_or_else(Utc::now),
        })
    } else {
        None
    };

    let final_label = override_label.unwrap_or(stored_label);
    let final_confidence = if overridden { 1.0 } else { stored_confidence };
    let disposal_location = override_disposal.unwrap_or(stored_disposal);

    let stages_completed: Vec<String> = row
        .get::<Option<String>, _>("stages_completed")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();

    let validation_results: serde_json::Map<String, serde_json::Value> = row
        .get::<Option<String>, _>("validation_results")
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default();

    Ok(ClassificationRecord {
        id: row.get("id"),
        detection_id: row.get("detection_id"),
        captured_at: row.get("captured_at"),
        vision_label: row.get("vision_label"),
        vision_confidence: row.get("vision_confidence"),
        vision_stage: row.get("vision_stage"),
        weight_grams: row.get("weight_grams"),
        is_metal: row.get("is_metal"),
        humidity_percent: row.get("humidity_percent"),
        temperature_celsius: row.get("temperature_celsius"),
        is_moist: row.get("is_moist"),
        is_transparent: row.get("is_transparent"),
        is_flexible: row.get("is_flexible"),
        final_label,
        final_confidence,
        disposal_location,
        reasoning: row.get("reasoning"),
        candidates_count: row.get("candidates_count"),
        has_image: row.get("has_image"),
        image_format: row.get("image_format"),
        image_dimensions: row.get("image_dimensions"),
        image_size_bytes: row.get("image_size_bytes"),
        image_captured_at: row.get("image_captured_at"),
        processing_time_ms: row.get("processing_time_ms"),
        stages_completed,
        validation_results,
        pipeline_version: row.get("pipeline_version"),
        processing_node: row.get("processing_node"),
        fallback_used: row.get("fallback_used"),
        overridden,
        override_info,
        created_at: row.get("created_at"),
    })
}
