//! Relational schema of the registry.
//!
//! - `operator`: one row per (inn, name); a NULL inn is a regular key value
//! - `region`: one row per (name, sub_name)
//! - `phone_range`: closed int8 interval per number block; the GiST exclusion
//!   constraint rejects any two overlapping intervals at write time
//! - `ingest_runs`: audit log of per-file ingestion attempts

use sqlx::PgPool;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS operator (
        id BIGSERIAL PRIMARY KEY,
        inn BIGINT,
        name TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT operator_natural_key UNIQUE NULLS NOT DISTINCT (inn, name)
    )",
    "CREATE TABLE IF NOT EXISTS region (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        sub_name TEXT NOT NULL DEFAULT '',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT region_natural_key UNIQUE (name, sub_name)
    )",
    "CREATE TABLE IF NOT EXISTS phone_range (
        id BIGSERIAL PRIMARY KEY,
        span INT8RANGE NOT NULL,
        operator_id BIGINT NOT NULL REFERENCES operator (id),
        region_id BIGINT NOT NULL REFERENCES region (id),
        CONSTRAINT phone_range_span_key UNIQUE (span),
        CONSTRAINT phone_range_no_overlap EXCLUDE USING gist (span WITH &&)
    )",
    "CREATE TABLE IF NOT EXISTS ingest_runs (
        run_id UUID PRIMARY KEY,
        source_id TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('running', 'ok', 'skipped', 'failed')),
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        finished_at TIMESTAMPTZ,
        error TEXT,
        detail JSONB NOT NULL DEFAULT '{}'
    )",
    "CREATE INDEX IF NOT EXISTS idx_ingest_runs_source ON ingest_runs (source_id, started_at DESC)",
];

/// Create all tables and constraints if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
