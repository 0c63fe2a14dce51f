//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to
//! date. Every statement here is idempotent so startup is safe to repeat
//! against an existing database.

use binsight_common::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open the hub database, creating the file and schema when missing
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    // WAL keeps reads flowing while the ingest path writes
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_classifications_table(pool).await?;
    create_alerts_table(pool).await?;
    Ok(())
}

async fn create_classifications_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            detection_id TEXT NOT NULL,
            captured_at TIMESTAMP NOT NULL,

            vision_label TEXT,
            vision_confidence REAL,
            vision_stage TEXT,

            weight_grams REAL,
            is_metal INTEGER,
            humidity_percent REAL,
            temperature_celsius REAL,
            is_moist INTEGER,
            is_transparent INTEGER,
            is_flexible INTEGER,

            final_label TEXT NOT NULL,
            final_confidence REAL NOT NULL,
            disposal_location TEXT NOT NULL,
            reasoning TEXT,
            candidates_count INTEGER,

            has_image INTEGER NOT NULL DEFAULT 0,
            image_data BLOB,
            image_format TEXT,
            image_dimensions TEXT,
            image_size_bytes INTEGER,
            image_captured_at TIMESTAMP,

            processing_time_ms REAL,
            stages_completed TEXT,
            validation_results TEXT,
            pipeline_version TEXT,
            processing_node TEXT,
            fallback_used INTEGER NOT NULL DEFAULT 0,

            overridden INTEGER NOT NULL DEFAULT 0,
            override_label TEXT,
            override_disposal TEXT,
            override_reason TEXT,
            override_user TEXT,
            override_at TIMESTAMP,

            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_captured_at ON classifications(captured_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_final_label ON classifications(final_label)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_detection_id ON classifications(detection_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_alerts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            severity TEXT NOT NULL,
            source TEXT NOT NULL,
            message TEXT NOT NULL,
            raised_at TIMESTAMP NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_by TEXT,
            resolved_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_raised_at ON alerts(raised_at)")
        .execute(pool)
        .await?;

    Ok(())
}
