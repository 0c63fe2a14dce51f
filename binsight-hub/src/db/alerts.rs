//! Durable alert mirror
//!
//! The in-memory alert ring is the serving copy; every alert is also
//! mirrored here so raised alerts survive a restart. Resolution goes
//! through the database first so that resolving the same alert twice
//! reports false the second time.

use binsight_common::model::{Alert, AlertSeverity};
use binsight_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Pool, Row, Sqlite};
use uuid::Uuid;

/// Mirror a newly raised alert
pub async fn insert(db: &Pool<Sqlite>, alert: &Alert) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO alerts (id, severity, source, message, raised_at, resolved, resolved_by, resolved_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(alert.id.to_string())
    .bind(alert.severity.as_str())
    .bind(&alert.source)
    .bind(&alert.message)
    .bind(alert.raised_at)
    .bind(alert.resolved)
    .bind(&alert.resolved_by)
    .bind(alert.resolved_at)
    .execute(db)
    .await?;

    Ok(())
}

/// Mark an alert resolved, reporting whether this call won the transition
///
/// Returns false both for unknown ids and for alerts already resolved.
pub async fn resolve(
    db: &Pool<Sqlite>,
    id: Uuid,
    resolved_by: &str,
    resolved_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE alerts SET resolved = 1, resolved_by = ?, resolved_at = ? WHERE id = ? AND resolved = 0",
    )
    .bind(resolved_by)
    .bind(resolved_at)
    .bind(id.to_string())
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// True when the alert id exists in the mirror
pub async fn exists(db: &Pool<Sqlite>, id: Uuid) -> Result<bool> {
    let found: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM alerts WHERE id = ?)")
        .bind(id.to_string())
        .fetch_one(db)
        .await?;

    Ok(found)
}

/// The most recent alerts, newest first
pub async fn recent(db: &Pool<Sqlite>, limit: i64) -> Result<Vec<Alert>> {
    let rows = sqlx::query(
        r#"
        SELECT id, severity, source, message, raised_at, resolved, resolved_by, resolved_at
        FROM alerts
        ORDER BY raised_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(db)
    .await?;

    rows.iter().map(alert_from_row).collect()
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert> {
    let raw_id: String = row.get("id");
    let id = Uuid::parse_str(&raw_id)
        .map_err(|e| Error::Internal(format!("Invalid alert id in storage: {e}")))?;

    let raw_severity: String = row.get("severity");
    let severity = AlertSeverity::parse(&raw_severity).unwrap_or_else(|| {
        tracing::warn!(
            alert_id = %id,
            severity = %raw_severity,
            "Unknown alert severity in storage, defaulting to info"
        );
        AlertSeverity::Info
    });

    Ok(Alert {
        id,
        severity,
        source: row.get("source"),
        message: row.get("message"),
        raised_at: row.get("raised_at"),
        resolved: row.get("resolved"),
        resolved_by: row.get("resolved_by"),
        resolved_at: row.get("resolved_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::create_schema;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_db() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");

        create_schema(&pool).await.expect("Failed to create schema");
        pool
    }

    #[tokio::test]
    async fn test_insert_and_recent_round_trip() {
        let pool = create_test_db().await;

        let mut first = Alert::new(AlertSeverity::Warning, "ingest", "low confidence: 0.42");
        first.raised_at = Utc::now() - Duration::seconds(10);
        let second = Alert::new(AlertSeverity::Info, "ingest", "slow processing: 3400 ms");

        insert(&pool, &first).await.unwrap();
        insert(&pool, &second).await.unwrap();

        let alerts = recent(&pool, 10).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].id, second.id, "Newest alert should lead");
        assert_eq!(alerts[0].severity, AlertSeverity::Info);
        assert_eq!(alerts[1].message, "low confidence: 0.42");
        assert!(!alerts[1].resolved);
    }

    #[tokio::test]
    async fn test_recent_honors_limit() {
        let pool = create_test_db().await;

        for i in 0..5 {
            let mut alert = Alert::new(AlertSeverity::Error, "probe", format!("upstream down #{i}"));
            alert.raised_at = Utc::now() + Duration::seconds(i);
            insert(&pool, &alert).await.unwrap();
        }

        let alerts = recent(&pool, 3).await.unwrap();
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].message, "upstream down #4");
    }

    #[tokio::test]
    async fn test_resolve_wins_only_once() {
        let pool = create_test_db().await;

        let alert = Alert::new(AlertSeverity::Warning, "ingest", "missing image");
        insert(&pool, &alert).await.unwrap();

        assert!(resolve(&pool, alert.id, "operator", Utc::now()).await.unwrap());
        assert!(
            !resolve(&pool, alert.id, "operator-2", Utc::now()).await.unwrap(),
            "Second resolution should lose"
        );

        let alerts = recent(&pool, 10).await.unwrap();
        assert!(alerts[0].resolved);
        assert_eq!(alerts[0].resolved_by.as_deref(), Some("operator"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_returns_false() {
        let pool = create_test_db().await;
        assert!(!resolve(&pool, Uuid::new_v4(), "operator", Utc::now()).await.unwrap());
        assert!(!exists(&pool, Uuid::new_v4()).await.unwrap());
    }
}
