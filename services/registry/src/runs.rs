//! Audit log of ingestion attempts, written outside the data transaction.

use sqlx::PgPool;
use uuid::Uuid;

/// Create a run record in `running` state.
pub async fn start_run(pool: &PgPool, source_id: &str) -> Result<Uuid, sqlx::Error> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO ingest_runs (run_id, source_id, status, detail)
        VALUES ($1, $2, 'running', '{}')
        "#,
    )
    .bind(run_id)
    .bind(source_id)
    .execute(pool)
    .await?;
    Ok(run_id)
}

/// Close a run record with its final status and counters.
pub async fn finish_run(
    pool: &PgPool,
    run_id: Uuid,
    status: &str,
    error: Option<&str>,
    detail: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE ingest_runs
        SET finished_at = now(), status = $2, error = $3, detail = detail || $4
        WHERE run_id = $1
        "#,
    )
    .bind(run_id)
    .bind(status)
    .bind(error)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub source_id: String,
    pub status: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
    pub detail: serde_json::Value,
}

/// Most recent runs, newest first.
pub async fn recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<RunRecord>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT run_id, source_id, status, started_at, finished_at, error, detail
        FROM ingest_runs
        ORDER BY started_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
