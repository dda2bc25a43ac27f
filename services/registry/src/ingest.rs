//! Ingestion orchestrator.
//!
//! Per file: fetch gate → download → one transaction {clear partition → for each
//! chunk: normalize → upsert dimensions → upsert ranges} → commit → store the
//! version marker. Any error rolls the whole file back; other files are unaffected.
//! Runs of the same source are serialized; different sources run in parallel.

use crate::cache::VersionCache;
use crate::config::IngestSettings;
use crate::error::{CacheError, IngestError};
use crate::fetch::{gate, Fetcher, GateDecision};
use crate::model::{find_source, SourceFile};
use crate::normalize::normalize_chunk;
use crate::reader::{ChunkReader, RawChunk};
use crate::replace::clear_partition;
use crate::runs;
use crate::upsert::{upsert_operators, upsert_ranges, upsert_regions};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ingested,
    /// Version marker unchanged; nothing was touched.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub chunks: usize,
    pub rows_read: usize,
    /// Malformed rows dropped by the reader.
    pub rows_skipped: usize,
    /// Parsed rows with an invalid block or a block outside the partition.
    pub rows_rejected: usize,
    pub valid_rows: usize,
    pub ranges_removed: u64,
    pub ranges_written: u64,
    /// Operator candidates summed over chunks.
    pub operators: usize,
    /// Region candidates summed over chunks.
    pub regions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub source_id: String,
    pub outcome: Outcome,
    pub marker: Option<String>,
    pub stats: FileStats,
}

#[derive(Debug)]
pub struct FileResult {
    pub source_id: String,
    pub result: Result<FileReport, IngestError>,
}

#[derive(Clone)]
pub struct Ingestor {
    pool: PgPool,
    cache: Arc<dyn VersionCache>,
    fetcher: Fetcher,
    settings: IngestSettings,
    sources: Arc<Vec<SourceFile>>,
    /// One lock per configured source id.
    running: Arc<HashMap<String, Arc<Mutex<()>>>>,
}

impl Ingestor {
    pub fn new(
        pool: PgPool,
        cache: Arc<dyn VersionCache>,
        fetcher: Fetcher,
        settings: IngestSettings,
        sources: Vec<SourceFile>,
    ) -> Self {
        let running = sources
            .iter()
            .map(|s| (s.id.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Self {
            pool,
            cache,
            fetcher,
            settings,
            sources: Arc::new(sources),
            running: Arc::new(running),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    /// Ingest one configured file, by id or by position in the source list.
    pub async fn ingest_one(&self, key: &str, only_if_changed: bool) -> Result<FileReport, IngestError> {
        let source = find_source(&self.sources, key)
            .cloned()
            .ok_or_else(|| IngestError::UnknownSource(key.to_string()))?;
        self.ingest_file(&source, only_if_changed).await
    }

    /// Ingest every configured file concurrently. Results keep the source order.
    pub async fn ingest_all(&self, only_if_changed: bool) -> Vec<FileResult> {
        let handles: Vec<_> = self
            .sources
            .iter()
            .cloned()
            .map(|source| {
                let this = self.clone();
                let source_id = source.id.clone();
                let handle = tokio::spawn(async move { this.ingest_file(&source, only_if_changed).await });
                (source_id, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (source_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(IngestError::Persistence(format!("ingestion task failed: {}", e))),
            };
            results.push(FileResult { source_id, result });
        }
        results
    }

    /// Forget all cached version markers.
    pub async fn clear_markers(&self) -> Result<(), CacheError> {
        let ids: Vec<String> = self.sources.iter().map(|s| s.id.clone()).collect();
        self.cache.clear(&ids).await
    }

    /// Ingest a single file under the per-file deadline and record the run.
    ///
    /// Waits for any in-flight run of the same source first.
    pub async fn ingest_file(&self, source: &SourceFile, only_if_changed: bool) -> Result<FileReport, IngestError> {
        let lock = self.running.get(&source.id).cloned();
        let _guard = match &lock {
            Some(lock) => match lock.try_lock() {
                Ok(guard) => Some(guard),
                Err(_) => {
                    info!(source = %source.id, "ingestion of this file already running, waiting");
                    Some(lock.lock().await)
                }
            },
            None => None,
        };

        let run_id = match runs::start_run(&self.pool, &source.id).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(source = %source.id, error = %e, "could not record ingestion run");
                None
            }
        };

        let limit = self.settings.file_timeout;
        let result = match tokio::time::timeout(limit, self.run_file(source, only_if_changed)).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::Timeout {
                source_id: source.id.clone(),
                limit,
            }),
        };

        match &result {
            Ok(report) => info!(
                source = %source.id,
                outcome = ?report.outcome,
                removed = report.stats.ranges_removed,
                written = report.stats.ranges_written,
                skipped = report.stats.rows_skipped,
                rejected = report.stats.rows_rejected,
                "ingestion finished"
            ),
            Err(e) => warn!(source = %source.id, kind = e.kind(), error = %e, "ingestion failed"),
        }

        if let Some(run_id) = run_id {
            let (status, error, detail) = match &result {
                Ok(report) => (
                    match report.outcome {
                        Outcome::Ingested => "ok",
                        Outcome::Skipped => "skipped",
                    },
                    None,
                    serde_json::to_value(&report.stats).unwrap_or_default(),
                ),
                Err(e) => ("failed", Some(e.to_string()), serde_json::json!({ "kind": e.kind() })),
            };
            if let Err(e) = runs::finish_run(&self.pool, run_id, status, error.as_deref(), detail).await {
                warn!(source = %source.id, error = %e, "could not finish ingestion run record");
            }
        }

        result
    }

    async fn run_file(&self, source: &SourceFile, only_if_changed: bool) -> Result<FileReport, IngestError> {
        let marker = self.fetcher.version_marker(source).await?;
        let cached = if only_if_changed {
            self.cache.get(&source.id).await?
        } else {
            None
        };

        if gate(only_if_changed, marker.as_deref(), cached.as_deref()) == GateDecision::Skip {
            info!(source = %source.id, marker = ?marker, "unchanged since last ingestion, skipping");
            return Ok(FileReport {
                source_id: source.id.clone(),
                outcome: Outcome::Skipped,
                marker,
                stats: FileStats::default(),
            });
        }

        // Keeps a downloaded file alive until the run is over.
        let materialized = self.fetcher.materialize(source).await?;
        // Header problems surface here, before the partition is touched.
        let reader = open_reader(materialized.path().to_path_buf(), source, self.settings.chunk_size).await?;

        let mut stats = FileStats::default();
        let mut tx = self.pool.begin().await?;
        match self.write_partition(&mut tx, source, reader, &mut stats).await {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(source = %source.id, error = %rb, "rollback failed");
                }
                return Err(e);
            }
        }

        if let Some(marker) = &marker {
            if let Err(e) = self.cache.set(&source.id, marker).await {
                warn!(source = %source.id, error = %e, "could not store version marker");
            }
        }

        Ok(FileReport {
            source_id: source.id.clone(),
            outcome: Outcome::Ingested,
            marker,
            stats,
        })
    }

    async fn write_partition(
        &self,
        conn: &mut PgConnection,
        source: &SourceFile,
        reader: ChunkReader<File>,
        stats: &mut FileStats,
    ) -> Result<(), IngestError> {
        stats.ranges_removed = clear_partition(&mut *conn, &source.partition).await?;
        debug!(source = %source.id, removed = stats.ranges_removed, partition = %source.partition, "partition cleared");

        let mut reader = reader;
        loop {
            let (returned, chunk) = read_chunk(reader, &source.id).await?;
            reader = returned;
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            stats.chunks += 1;
            stats.rows_read += chunk.rows.len() + chunk.skipped;
            stats.rows_skipped += chunk.skipped;

            let normalized = normalize_chunk(&chunk.rows, &source.partition);
            stats.rows_rejected += normalized.rejected;
            stats.valid_rows += normalized.ranges.len();
            stats.operators += normalized.operators.len();
            stats.regions += normalized.regions.len();

            let operator_ids =
                upsert_operators(&mut *conn, &normalized.operators, self.settings.dimension_policy).await?;
            let region_ids =
                upsert_regions(&mut *conn, &normalized.regions, self.settings.dimension_policy).await?;
            stats.ranges_written += upsert_ranges(
                &mut *conn,
                &normalized.ranges,
                &operator_ids,
                &region_ids,
                self.settings.range_policy,
            )
            .await?;

            debug!(
                source = %source.id,
                chunk = stats.chunks,
                rows = chunk.rows.len(),
                written = stats.ranges_written,
                "chunk written"
            );
        }

        if stats.valid_rows == 0 {
            if self.settings.reject_empty {
                return Err(IngestError::EmptySource {
                    source_id: source.id.clone(),
                });
            }
            warn!(source = %source.id, removed = stats.ranges_removed, "no valid rows, partition is now empty");
        }
        Ok(())
    }
}

/// Open and validate the file on the blocking pool.
async fn open_reader(path: PathBuf, source: &SourceFile, chunk_size: usize) -> Result<ChunkReader<File>, IngestError> {
    let source_id = source.id.clone();
    let parent_span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _guard = parent_span.enter();
        ChunkReader::open(&path, &source_id, chunk_size)
    })
    .await
    .map_err(|e| IngestError::io(&source.id, format!("reader task panicked: {}", e)))?
}

/// Pull the next chunk on the blocking pool and hand the reader back.
async fn read_chunk(
    mut reader: ChunkReader<File>,
    source_id: &str,
) -> Result<(ChunkReader<File>, Option<Result<RawChunk, IngestError>>), IngestError> {
    let parent_span = tracing::Span::current();
    tokio::task::spawn_blocking(move || {
        let _guard = parent_span.enter();
        let chunk = reader.next();
        (reader, chunk)
    })
    .await
    .map_err(|e| IngestError::io(source_id, format!("reader task panicked: {}", e)))
}
