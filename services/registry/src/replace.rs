//! Stale range replacement: a file's partition is cleared before it is refilled.

use crate::model::Partition;
use sqlx::postgres::types::PgRange;
use sqlx::PgExecutor;
use std::ops::Bound;

fn partition_range(partition: &Partition) -> PgRange<i64> {
    PgRange {
        start: Bound::Included(partition.lo),
        end: Bound::Excluded(partition.hi),
    }
}

/// Delete every stored range fully contained in `partition`. Returns rows removed.
///
/// Must run in the same transaction as, and before, the file's range upserts.
pub async fn clear_partition<'e, E>(executor: E, partition: &Partition) -> Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query("DELETE FROM phone_range WHERE span <@ $1")
        .bind(partition_range(partition))
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Number of stored ranges inside `partition`.
pub async fn count_in_partition<'e, E>(executor: E, partition: &Partition) -> Result<i64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM phone_range WHERE span <@ $1")
        .bind(partition_range(partition))
        .fetch_one(executor)
        .await?;
    Ok(count)
}
