//! Statistics aggregation over the classification store
//!
//! Snapshots are computed wholesale from SQL aggregates. Label and
//! confidence figures use the effective (post-override) values so the
//! numbers line up with what list and search return. Empty windows
//! produce zeroed means, never a division by zero.

use binsight_common::model::{HourlyCount, LabelCount, StatisticsSnapshot};
use binsight_common::Result;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::{Pool, Row, Sqlite};

use crate::db::classifications::{EFFECTIVE_CONFIDENCE, EFFECTIVE_LABEL};

/// Compute a full snapshot for the given window
///
/// `from`/`to` bound the window figures; the today/week/month counters
/// always run against the present moment regardless of the window.
pub async fn compute_statistics(
    db: &Pool<Sqlite>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<StatisticsSnapshot> {
    let window = WindowClause::new(from, to);

    let aggregate_sql = format!(
        "SELECT COUNT(*) AS total, \
                COALESCE(AVG({EFFECTIVE_CONFIDENCE}), 0.0) AS avg_confidence, \
                COALESCE(AVG(processing_time_ms), 0.0) AS avg_processing, \
                COALESCE(SUM(overridden), 0) AS override_count \
         FROM classifications{}",
        window.clause
    );
    let row = window.bind(sqlx::query(&aggregate_sql)).fetch_one(db).await?;

    let total: i64 = row.get("total");
    let average_confidence: f64 = row.get("avg_confidence");
    let average_processing_ms: f64 = row.get("avg_processing");
    let override_count: i64 = row.get("override_count");
    let override_rate_percent = if total > 0 {
        override_count as f64 * 100.0 / total as f64
    } else {
        0.0
    };

    let label_sql = format!(
        "SELECT {EFFECTIVE_LABEL} AS label, COUNT(*) AS label_count \
         FROM classifications{} \
         GROUP BY label \
         ORDER BY label_count DESC, label ASC",
        window.clause
    );
    let label_breakdown = window
        .bind(sqlx::query(&label_sql))
        .fetch_all(db)
        .await?
        .iter()
        .map(|row| LabelCount {
            label: row.get("label"),
            count: row.get("label_count"),
        })
        .collect();

    let hourly_sql = format!(
        "SELECT strftime('%Y-%m-%d %H:00', captured_at) AS hour, COUNT(*) AS hour_count \
         FROM classifications{} \
         GROUP BY hour \
         ORDER BY hour ASC",
        window.clause
    );
    let hourly_breakdown = window
        .bind(sqlx::query(&hourly_sql))
        .fetch_all(db)
        .await?
        .iter()
        .map(|row| HourlyCount {
            hour: row.get("hour"),
            count: row.get("hour_count"),
        })
        .collect();

    let now = Utc::now();
    let today_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let week_start = now - chrono::Duration::days(7);
    let month_start = now - chrono::Duration::days(30);

    let counters = sqlx::query(
        "SELECT COALESCE(SUM(CASE WHEN captured_at >= ? THEN 1 ELSE 0 END), 0) AS today_count, \
                COALESCE(SUM(CASE WHEN captured_at >= ? THEN 1 ELSE 0 END), 0) AS week_count, \
                COALESCE(SUM(CASE WHEN captured_at >= ? THEN 1 ELSE 0 END), 0) AS month_count \
         FROM classifications",
    )
    .bind(today_start)
    .bind(week_start)
    .bind(month_start)
    .fetch_one(db)
    .await?;

    Ok(StatisticsSnapshot {
        total_classifications: total,
        today_count: counters.get("today_count"),
        week_count: counters.get("week_count"),
        month_count: counters.get("month_count"),
        average_confidence,
        average_processing_ms,
        override_rate_percent,
        label_breakdown,
        hourly_breakdown,
        window_start: from,
        window_end: to,
        computed_at: now,
    })
}

/// Shared WHERE clause and bind order for the window bounds
struct WindowClause {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    clause: String,
}

impl WindowClause {
    fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        let mut parts: Vec<&str> = Vec::new();
        if from.is_some() {
            parts.push("captured_at >= ?");
        }
        if to.is_some() {
            parts.push("captured_at <= ?");
        }

        let clause = if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        };

        Self { from, to, clause }
    }

    fn bind<'q>(
        &self,
        mut query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        if let Some(from) = self.from {
            query = query.bind(from);
        }
        if let Some(to) = self.to {
            query = query.bind(to);
        }
        query
    }
}
