//! Retry handling for transient SQLite lock errors
//!
//! Write paths share the database with concurrent ingest traffic, so a
//! "database is locked" failure gets one retry after a short pause. Any
//! other error, and a second lock failure, propagate to the caller.

use binsight_common::{Error, Result};
use std::time::Duration;

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Run a database operation, retrying exactly once on a lock error.
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "classification insert")
/// * `operation` - Async closure that performs the database operation
pub async fn retry_once_on_lock<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match operation().await {
        Ok(value) => Ok(value),
        Err(err) if is_lock_error(&err) => {
            tracing::warn!(
                operation = operation_name,
                delay_ms = RETRY_DELAY.as_millis() as u64,
                "Database locked, retrying once"
            );

            tokio::time::sleep(RETRY_DELAY).await;

            match operation().await {
                Ok(value) => {
                    tracing::debug!(operation = operation_name, "Database operation succeeded on retry");
                    Ok(value)
                }
                Err(err) if is_lock_error(&err) => {
                    tracing::error!(operation = operation_name, "Database still locked after retry");
                    Err(Error::Transient(format!(
                        "{operation_name} failed: database is locked"
                    )))
                }
                Err(other) => Err(other),
            }
        }
        Err(other) => Err(other),
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => db_err.to_string().contains("database is locked"),
        Error::Transient(message) => message.contains("database is locked"),
        _ => false,
    }
}
