//! Registry data model: source files, partitions, natural keys and ranges.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Multiplier that places a prefix class (e.g. 383) in front of a 7-digit offset.
pub const PREFIX_MULTIPLIER: i64 = 10_000_000;

/// Largest offset a block can reach inside one prefix class.
pub const MAX_OFFSET: i64 = PREFIX_MULTIPLIER - 1;

/// Half-open interval `[lo, hi)` of the flat numbering space owned by one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub lo: i64,
    pub hi: i64,
}

impl Partition {
    pub const fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    /// True when the whole closed span lies inside this partition.
    pub fn contains_span(&self, span: &NumberSpan) -> bool {
        span.lo >= self.lo && span.hi < self.hi
    }

    pub fn contains(&self, number: i64) -> bool {
        number >= self.lo && number < self.hi
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.lo, self.hi)
    }
}

/// One of the four government-published numbering files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Stable identifier, also the version-marker cache key.
    pub id: String,
    /// `http(s)://` URL or a local filesystem path.
    pub location: String,
    pub partition: Partition,
}

impl SourceFile {
    pub fn new(id: impl Into<String>, location: impl Into<String>, partition: Partition) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            partition,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }
}

/// Static file → partition assignment with the published default URLs.
pub const DEFAULT_SOURCES: [(&str, &str, Partition); 4] = [
    (
        "ABC-3xx",
        "https://opendata.digital.gov.ru/downloads/ABC-3xx.csv",
        Partition::new(3_000_000_000, 4_000_000_000),
    ),
    (
        "ABC-4xx",
        "https://opendata.digital.gov.ru/downloads/ABC-4xx.csv",
        Partition::new(4_000_000_000, 5_000_000_000),
    ),
    (
        "ABC-8xx",
        "https://opendata.digital.gov.ru/downloads/ABC-8xx.csv",
        Partition::new(8_000_000_000, 9_000_000_000),
    ),
    (
        "DEF-9xx",
        "https://opendata.digital.gov.ru/downloads/DEF-9xx.csv",
        Partition::new(9_000_000_000, 10_000_000_000),
    ),
];

pub fn default_sources() -> Vec<SourceFile> {
    DEFAULT_SOURCES
        .iter()
        .map(|(id, url, partition)| SourceFile::new(*id, *url, *partition))
        .collect()
}

/// Find a source by identifier (case-insensitive) or by its position in the list.
pub fn find_source<'a>(sources: &'a [SourceFile], key: &str) -> Option<&'a SourceFile> {
    if let Ok(idx) = key.parse::<usize>() {
        return sources.get(idx);
    }
    sources.iter().find(|s| s.id.eq_ignore_ascii_case(key))
}

/// Operator natural key. A missing tax id is a regular key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorKey {
    pub inn: Option<i64>,
    pub name: String,
}

/// Region natural key; `sub_name` is empty when the source has no hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionKey {
    pub name: String,
    pub sub_name: String,
}

impl RegionKey {
    /// Split a raw `"sub|name"` region string.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('|') {
            Some((sub, name)) => Self {
                name: name.trim().to_string(),
                sub_name: sub.trim().to_string(),
            },
            None => Self {
                name: raw.trim().to_string(),
                sub_name: String::new(),
            },
        }
    }
}

/// Closed interval `[lo, hi]` of absolute numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NumberSpan {
    pub lo: i64,
    pub hi: i64,
}

impl NumberSpan {
    /// Build the absolute span for a block, or `None` when the offsets are out of shape.
    pub fn from_block(prefix: i64, start: i64, end: i64) -> Option<Self> {
        if !(100..=999).contains(&prefix) {
            return None;
        }
        if start < 0 || end > MAX_OFFSET || start > end {
            return None;
        }
        let base = prefix * PREFIX_MULTIPLIER;
        Some(Self {
            lo: base + start,
            hi: base + end,
        })
    }

    pub fn overlaps(&self, other: &NumberSpan) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }
}

/// A phone-range row waiting for its foreign keys to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRecord {
    pub span: NumberSpan,
    pub operator: OperatorKey,
    pub region: RegionKey,
    /// 1-based line in the source file, for diagnostics.
    pub line: u64,
}

/// What to do when an insert hits an existing natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    Ignore,
    Update,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ignore" | "nothing" => Ok(Self::Ignore),
            "update" => Ok(Self::Update),
            other => Err(format!("unknown conflict policy '{}'", other)),
        }
    }
}

/// Lookup result as returned to the front door.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PhoneInfo {
    pub inn: Option<i64>,
    pub operator: String,
    pub region: String,
    pub sub_region: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_from_block() {
        let span = NumberSpan::from_block(383, 8578800, 8578899).unwrap();
        assert_eq!(span.lo, 3838578800);
        assert_eq!(span.hi, 3838578899);
    }

    #[test]
    fn test_span_rejects_bad_blocks() {
        assert!(NumberSpan::from_block(383, 10, 5).is_none());
        assert!(NumberSpan::from_block(383, 0, 10_000_000).is_none());
        assert!(NumberSpan::from_block(38, 0, 10).is_none());
        assert!(NumberSpan::from_block(383, -1, 10).is_none());
    }

    #[test]
    fn test_span_overlap() {
        let a = NumberSpan { lo: 10, hi: 20 };
        assert!(a.overlaps(&NumberSpan { lo: 20, hi: 30 }));
        assert!(a.overlaps(&NumberSpan { lo: 0, hi: 10 }));
        assert!(!a.overlaps(&NumberSpan { lo: 21, hi: 30 }));
    }

    #[test]
    fn test_region_with_hierarchy() {
        let key = RegionKey::parse("г. Новосибирск|Новосибирская обл.");
        assert_eq!(key.name, "Новосибирская обл.");
        assert_eq!(key.sub_name, "г. Новосибирск");
    }

    #[test]
    fn test_region_without_hierarchy() {
        let key = RegionKey::parse("Российская Федерация");
        assert_eq!(key.name, "Российская Федерация");
        assert_eq!(key.sub_name, "");
    }

    #[test]
    fn test_partitions_are_disjoint() {
        let sources = default_sources();
        for (i, a) in sources.iter().enumerate() {
            for b in sources.iter().skip(i + 1) {
                assert!(a.partition.hi <= b.partition.lo || b.partition.hi <= a.partition.lo);
            }
        }
    }

    #[test]
    fn test_partition_contains_span() {
        let p = Partition::new(4_000_000_000, 5_000_000_000);
        assert!(p.contains_span(&NumberSpan { lo: 4_000_000_000, hi: 4_999_999_999 }));
        assert!(!p.contains_span(&NumberSpan { lo: 4_999_999_999, hi: 5_000_000_000 }));
        assert!(!p.contains(5_000_000_000));
    }

    #[test]
    fn test_find_source_by_id_or_index() {
        let sources = default_sources();
        assert_eq!(find_source(&sources, "def-9xx").unwrap().id, "DEF-9xx");
        assert_eq!(find_source(&sources, "1").unwrap().id, "ABC-4xx");
        assert!(find_source(&sources, "7").is_none());
        assert!(find_source(&sources, "XYZ").is_none());
    }

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!("ignore".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Ignore);
        assert_eq!(" UPDATE ".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Update);
        assert!("merge".parse::<ConflictPolicy>().is_err());
    }
}
