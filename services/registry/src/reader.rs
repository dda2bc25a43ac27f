//! Chunked reader for the numbering-plan CSV files.
//!
//! Expected header (semicolon delimiter, extra columns ignored):
//!   АВС/ DEF;От;До;Емкость;Оператор;Регион;ИНН
//!
//! Rows that fail to parse are dropped and counted; they never abort the file.
//! Chunks exist only to bound memory: callers must not attach meaning to them.

use crate::error::IngestError;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Required columns; each entry lists the accepted spellings.
/// The first `АВС/ DEF` spelling is Cyrillic, the second Latin.
const REQUIRED_COLUMNS: &[&[&str]] = &[
    &["АВС/ DEF", "ABC/ DEF"],
    &["От"],
    &["До"],
    &["Оператор"],
    &["Регион"],
    &["ИНН"],
];

/// One raw data row, as laid out in the source file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceRow {
    #[serde(rename = "АВС/ DEF", alias = "ABC/ DEF")]
    pub prefix: i64,
    #[serde(rename = "От")]
    pub start: i64,
    #[serde(rename = "До")]
    pub end: i64,
    #[serde(rename = "Оператор")]
    pub operator: String,
    #[serde(rename = "Регион")]
    pub region: String,
    #[serde(rename = "ИНН")]
    pub inn: Option<i64>,
    /// 1-based line in the file (header is line 1).
    #[serde(skip)]
    pub line: u64,
}

/// Ordered slice of consecutive rows of a file.
#[derive(Debug, Clone, Default)]
pub struct RawChunk {
    pub rows: Vec<SourceRow>,
    /// Malformed rows dropped while filling this chunk.
    pub skipped: usize,
}

/// Synchronous iterator over chunks. Reads block, so async callers drive it
/// from `spawn_blocking`.
pub struct ChunkReader<R: Read> {
    source_id: String,
    reader: csv::Reader<R>,
    headers: csv::StringRecord,
    record: csv::StringRecord,
    chunk_size: usize,
    done: bool,
}

impl ChunkReader<File> {
    pub fn open(path: &Path, source_id: &str, chunk_size: usize) -> Result<Self, IngestError> {
        let file = File::open(path)
            .map_err(|e| IngestError::io(source_id, format!("{}: {}", path.display(), e)))?;
        Self::new(file, source_id, chunk_size)
    }
}

impl<R: Read> ChunkReader<R> {
    /// Wrap a reader and validate the header row before any data is consumed.
    pub fn new(input: R, source_id: &str, chunk_size: usize) -> Result<Self, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(false)
            .trim(csv::Trim::All)
            .from_reader(input);

        let headers: csv::StringRecord = reader
            .headers()
            .map_err(|e| IngestError::format(source_id, format!("cannot read header: {}", e)))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim())
            .collect();

        validate_headers(&headers).map_err(|reason| IngestError::format(source_id, reason))?;

        Ok(Self {
            source_id: source_id.to_string(),
            reader,
            headers,
            record: csv::StringRecord::new(),
            chunk_size: chunk_size.max(1),
            done: false,
        })
    }

    fn next_chunk(&mut self) -> Result<Option<RawChunk>, IngestError> {
        let mut chunk = RawChunk {
            rows: Vec::with_capacity(self.chunk_size),
            skipped: 0,
        };

        while chunk.rows.len() < self.chunk_size {
            match self.reader.read_record(&mut self.record) {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    if is_fatal(&e) {
                        self.done = true;
                        return Err(IngestError::io(&self.source_id, e));
                    }
                    debug!(source = %self.source_id, error = %e, "skipping malformed row");
                    chunk.skipped += 1;
                    continue;
                }
            }

            let line = self.record.position().map(|p| p.line()).unwrap_or(0);
            match self.record.deserialize::<SourceRow>(Some(&self.headers)) {
                Ok(mut row) => {
                    row.line = line;
                    chunk.rows.push(row);
                }
                Err(e) => {
                    debug!(source = %self.source_id, line, error = %e, "skipping unparsable row");
                    chunk.skipped += 1;
                }
            }
        }

        if chunk.rows.is_empty() && chunk.skipped == 0 {
            return Ok(None);
        }
        Ok(Some(chunk))
    }
}

impl<R: Read> Iterator for ChunkReader<R> {
    type Item = Result<RawChunk, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.next_chunk().transpose()
    }
}

fn validate_headers(headers: &csv::StringRecord) -> Result<(), String> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|spellings| !headers.iter().any(|h| spellings.contains(&h)))
        .map(|spellings| spellings[0])
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "missing required column(s) {:?}; found {:?}",
            missing,
            headers.iter().collect::<Vec<_>>()
        ))
    }
}

/// Only I/O failures end the file; everything else is a bad row.
fn is_fatal(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(e) if e.kind() != io::ErrorKind::InvalidData)
}
