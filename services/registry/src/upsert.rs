//! Idempotent writes of dimension rows and phone ranges.
//!
//! Writes are two-phase: dimension rows are upserted and their surrogate ids
//! resolved by natural key first, then range rows are inserted with those ids.
//! All functions run on the caller's connection so they share its transaction.

use crate::error::IngestError;
use crate::model::{ConflictPolicy, NumberSpan, OperatorKey, RangeRecord, RegionKey};
use sqlx::PgConnection;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type OperatorIds = HashMap<OperatorKey, i64>;
pub type RegionIds = HashMap<RegionKey, i64>;

/// Upsert operator candidates and return the id of every candidate.
pub async fn upsert_operators(
    conn: &mut PgConnection,
    keys: &BTreeSet<OperatorKey>,
    policy: ConflictPolicy,
) -> Result<OperatorIds, IngestError> {
    if keys.is_empty() {
        return Ok(OperatorIds::new());
    }

    let inns: Vec<Option<i64>> = keys.iter().map(|k| k.inn).collect();
    let names: Vec<&str> = keys.iter().map(|k| k.name.as_str()).collect();

    let insert = match policy {
        ConflictPolicy::Ignore => {
            r#"
            INSERT INTO operator (inn, name)
            SELECT * FROM UNNEST($1::int8[], $2::text[])
            ON CONFLICT ON CONSTRAINT operator_natural_key DO NOTHING
            "#
        }
        ConflictPolicy::Update => {
            r#"
            INSERT INTO operator (inn, name)
            SELECT * FROM UNNEST($1::int8[], $2::text[])
            ON CONFLICT ON CONSTRAINT operator_natural_key
            DO UPDATE SET updated_at = now()
            "#
        }
    };
    sqlx::query(insert)
        .bind(&inns)
        .bind(&names)
        .execute(&mut *conn)
        .await?;

    let rows: Vec<(i64, Option<i64>, String)> = sqlx::query_as(
        r#"
        SELECT o.id, o.inn, o.name
        FROM operator o
        JOIN UNNEST($1::int8[], $2::text[]) AS k(inn, name)
          ON o.name = k.name AND o.inn IS NOT DISTINCT FROM k.inn
        "#,
    )
    .bind(&inns)
    .bind(&names)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, inn, name)| (OperatorKey { inn, name }, id))
        .collect())
}

/// Upsert region candidates and return the id of every candidate.
pub async fn upsert_regions(
    conn: &mut PgConnection,
    keys: &BTreeSet<RegionKey>,
    policy: ConflictPolicy,
) -> Result<RegionIds, IngestError> {
    if keys.is_empty() {
        return Ok(RegionIds::new());
    }

    let names: Vec<&str> = keys.iter().map(|k| k.name.as_str()).collect();
    let sub_names: Vec<&str> = keys.iter().map(|k| k.sub_name.as_str()).collect();

    let insert = match policy {
        ConflictPolicy::Ignore => {
            r#"
            INSERT INTO region (name, sub_name)
            SELECT * FROM UNNEST($1::text[], $2::text[])
            ON CONFLICT ON CONSTRAINT region_natural_key DO NOTHING
            "#
        }
        ConflictPolicy::Update => {
            r#"
            INSERT INTO region (name, sub_name)
            SELECT * FROM UNNEST($1::text[], $2::text[])
            ON CONFLICT ON CONSTRAINT region_natural_key
            DO UPDATE SET updated_at = now()
            "#
        }
    };
    sqlx::query(insert)
        .bind(&names)
        .bind(&sub_names)
        .execute(&mut *conn)
        .await?;

    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        r#"
        SELECT r.id, r.name, r.sub_name
        FROM region r
        JOIN UNNEST($1::text[], $2::text[]) AS k(name, sub_name)
          ON r.name = k.name AND r.sub_name = k.sub_name
        "#,
    )
    .bind(&names)
    .bind(&sub_names)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, sub_name)| (RegionKey { name, sub_name }, id))
        .collect())
}

/// Insert range rows with resolved foreign keys. Returns rows inserted or updated.
///
/// An identical span is ignored or re-pointed depending on `policy`; an
/// overlapping span is rejected by the exclusion constraint.
pub async fn upsert_ranges(
    conn: &mut PgConnection,
    records: &[RangeRecord],
    operators: &OperatorIds,
    regions: &RegionIds,
    policy: ConflictPolicy,
) -> Result<u64, IngestError> {
    if records.is_empty() {
        return Ok(0);
    }

    // Identical spans collapse to one row: first wins on ignore, last on update.
    let mut by_span: BTreeMap<NumberSpan, (i64, i64)> = BTreeMap::new();
    for record in records {
        let operator_id = *operators.get(&record.operator).ok_or_else(|| {
            IngestError::Persistence(format!(
                "operator {:?} unresolved for line {}",
                record.operator, record.line
            ))
        })?;
        let region_id = *regions.get(&record.region).ok_or_else(|| {
            IngestError::Persistence(format!(
                "region {:?} unresolved for line {}",
                record.region, record.line
            ))
        })?;
        match policy {
            ConflictPolicy::Ignore => {
                by_span.entry(record.span).or_insert((operator_id, region_id));
            }
            ConflictPolicy::Update => {
                by_span.insert(record.span, (operator_id, region_id));
            }
        }
    }

    let mut los = Vec::with_capacity(by_span.len());
    let mut his = Vec::with_capacity(by_span.len());
    let mut operator_ids = Vec::with_capacity(by_span.len());
    let mut region_ids = Vec::with_capacity(by_span.len());
    for (span, (operator_id, region_id)) in &by_span {
        los.push(span.lo);
        his.push(span.hi);
        operator_ids.push(*operator_id);
        region_ids.push(*region_id);
    }

    let insert = match policy {
        ConflictPolicy::Ignore => {
            r#"
            INSERT INTO phone_range (span, operator_id, region_id)
            SELECT int8range(t.lo, t.hi, '[]'), t.operator_id, t.region_id
            FROM UNNEST($1::int8[], $2::int8[], $3::int8[], $4::int8[])
                AS t(lo, hi, operator_id, region_id)
            ON CONFLICT ON CONSTRAINT phone_range_span_key DO NOTHING
            "#
        }
        ConflictPolicy::Update => {
            r#"
            INSERT INTO phone_range (span, operator_id, region_id)
            SELECT int8range(t.lo, t.hi, '[]'), t.operator_id, t.region_id
            FROM UNNEST($1::int8[], $2::int8[], $3::int8[], $4::int8[])
                AS t(lo, hi, operator_id, region_id)
            ON CONFLICT ON CONSTRAINT phone_range_span_key
            DO UPDATE SET operator_id = EXCLUDED.operator_id, region_id = EXCLUDED.region_id
            "#
        }
    };

    let result = sqlx::query(insert)
        .bind(&los)
        .bind(&his)
        .bind(&operator_ids)
        .bind(&region_ids)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}
