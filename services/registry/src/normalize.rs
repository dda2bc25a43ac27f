//! Per-chunk normalization: dimension candidates and range records.
//!
//! Dedup is scoped to one chunk. Duplicates across chunks are absorbed by the
//! idempotent upserts, never here.

use crate::model::{NumberSpan, OperatorKey, Partition, RangeRecord, RegionKey};
use crate::reader::SourceRow;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Default)]
pub struct NormalizedChunk {
    pub operators: BTreeSet<OperatorKey>,
    pub regions: BTreeSet<RegionKey>,
    pub ranges: Vec<RangeRecord>,
    /// Rows with an invalid block or a block outside the file's partition.
    pub rejected: usize,
}

pub fn normalize_chunk(rows: &[SourceRow], partition: &Partition) -> NormalizedChunk {
    let mut out = NormalizedChunk::default();

    for row in rows {
        let Some(span) = NumberSpan::from_block(row.prefix, row.start, row.end) else {
            debug!(line = row.line, prefix = row.prefix, start = row.start, end = row.end, "invalid block");
            out.rejected += 1;
            continue;
        };
        if !partition.contains_span(&span) {
            debug!(line = row.line, lo = span.lo, hi = span.hi, %partition, "block outside partition");
            out.rejected += 1;
            continue;
        }

        let operator = OperatorKey {
            inn: row.inn,
            name: row.operator.trim().to_string(),
        };
        let region = RegionKey::parse(&row.region);

        out.operators.insert(operator.clone());
        out.regions.insert(region.clone());
        out.ranges.push(RangeRecord {
            span,
            operator,
            region,
            line: row.line,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const P4: Partition = Partition::new(4_000_000_000, 5_000_000_000);

    fn row(prefix: i64, start: i64, end: i64, inn: Option<i64>, op: &str, region: &str) -> SourceRow {
        SourceRow {
            prefix,
            start,
            end,
            operator: op.to_string(),
            region: region.to_string(),
            inn,
            line: 0,
        }
    }

    #[test]
    fn test_operator_dedup_within_chunk() {
        let rows = vec![
            row(495, 0, 9, Some(7707049388), "ПАО \"Ростелеком\"", "г. Москва"),
            row(495, 10, 19, Some(7707049388), "ПАО \"Ростелеком\"", "г. Москва"),
            row(495, 20, 29, Some(7707049388), "ПАО \"Ростелеком\"", "г. Москва"),
        ];
        let chunk = normalize_chunk(&rows, &P4);
        assert_eq!(chunk.operators.len(), 1);
        assert_eq!(chunk.regions.len(), 1);
        assert_eq!(chunk.ranges.len(), 3);
    }

    #[test]
    fn test_same_name_different_inn_are_distinct() {
        let rows = vec![
            row(495, 0, 9, Some(1), "ООО \"Связь\"", "г. Москва"),
            row(495, 10, 19, Some(2), "ООО \"Связь\"", "г. Москва"),
            row(495, 20, 29, None, "ООО \"Связь\"", "г. Москва"),
        ];
        let chunk = normalize_chunk(&rows, &P4);
        assert_eq!(chunk.operators.len(), 3);
        assert!(chunk.operators.contains(&OperatorKey {
            inn: None,
            name: "ООО \"Связь\"".to_string()
        }));
    }

    #[test]
    fn test_region_split_and_dedup() {
        let rows = vec![
            row(495, 0, 9, Some(1), "A", "г. Зеленоград|г. Москва"),
            row(495, 10, 19, Some(1), "A", "г. Зеленоград|г. Москва"),
            row(495, 20, 29, Some(1), "A", "г. Москва"),
        ];
        let chunk = normalize_chunk(&rows, &P4);
        let regions: Vec<_> = chunk.regions.iter().cloned().collect();
        assert_eq!(
            regions,
            vec![
                RegionKey { name: "г. Москва".to_string(), sub_name: String::new() },
                RegionKey { name: "г. Москва".to_string(), sub_name: "г. Зеленоград".to_string() },
            ]
        );
    }

    #[test]
    fn test_range_record_carries_natural_keys() {
        let rows = vec![row(496, 3477600, 3477699, Some(5001001234), "ООО \"Наука-Связь\"", "Московская обл.")];
        let chunk = normalize_chunk(&rows, &P4);
        let record = &chunk.ranges[0];
        assert_eq!(record.span, NumberSpan { lo: 4963477600, hi: 4963477699 });
        assert_eq!(record.operator.inn, Some(5001001234));
        assert_eq!(record.region.name, "Московская обл.");
        assert_eq!(record.region.sub_name, "");
    }

    #[test]
    fn test_rows_outside_partition_are_rejected() {
        let rows = vec![
            row(383, 0, 9, Some(1), "A", "X"),
            row(495, 20, 10, Some(1), "B", "X"),
            row(495, 0, 9, Some(1), "C", "X"),
        ];
        let chunk = normalize_chunk(&rows, &P4);
        assert_eq!(chunk.rejected, 2);
        assert_eq!(chunk.ranges.len(), 1);
        assert_eq!(chunk.operators.len(), 1);
        assert_eq!(chunk.operators.iter().next().unwrap().name, "C");
    }

    #[test]
    fn test_chunking_does_not_change_records() {
        let rows: Vec<SourceRow> = (0..10)
            .map(|i| row(495, i * 10, i * 10 + 9, Some(i % 3), "Op", "R"))
            .collect();
        let whole = normalize_chunk(&rows, &P4);
        let split: Vec<RangeRecord> = rows
            .chunks(3)
            .flat_map(|c| normalize_chunk(c, &P4).ranges)
            .collect();
        assert_eq!(whole.ranges, split);
    }
}
