//! Numbering registry core.
//!
//! Maps subscriber-number blocks from the published numbering-plan CSV files
//! to their operator and region, and answers point lookups.
//!
//! Responsibilities:
//! - Fetch gate: skip files whose version marker did not change
//! - Chunked CSV reading and per-chunk normalization
//! - Idempotent upserts into a normalized Postgres schema
//! - Wholesale replacement of a file's partition inside one transaction
//! - Containment lookups over non-overlapping ranges

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod lookup;
pub mod model;
pub mod normalize;
pub mod reader;
pub mod replace;
pub mod runs;
pub mod schema;
pub mod upsert;

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::info;

pub use cache::{MemoryCache, RedisCache, VersionCache};
pub use config::{Config, DbSettings, HttpSettings, IngestSettings};
pub use error::{CacheError, ConfigError, IngestError, LookupError};
pub use fetch::Fetcher;
pub use ingest::{FileReport, FileResult, FileStats, Ingestor, Outcome};
pub use model::{ConflictPolicy, Partition, PhoneInfo, SourceFile};

/// Open the Postgres pool with acquire and statement timeouts applied.
pub async fn connect_pool(db: &DbSettings) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(&db.url)?.options([(
        "statement_timeout",
        db.statement_timeout.as_millis().to_string(),
    )]);

    PgPoolOptions::new()
        .max_connections(db.max_connections)
        .acquire_timeout(db.acquire_timeout)
        .connect_with(options)
        .await
}

/// Redis when configured, otherwise a process-local cache.
pub async fn connect_cache(redis_url: Option<&str>) -> Result<Arc<dyn VersionCache>, CacheError> {
    match redis_url {
        Some(url) => {
            let cache = RedisCache::connect(url).await?;
            info!("version markers cached in redis");
            Ok(Arc::new(cache))
        }
        None => {
            info!("REDIS_URL not set, version markers cached in memory");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

/// Wire an ingestor from configuration: pool, schema, cache and HTTP client.
pub async fn build_ingestor(config: &Config) -> Result<Ingestor, IngestError> {
    let pool = connect_pool(&config.db).await?;
    schema::ensure_schema(&pool).await?;
    let cache = connect_cache(config.redis_url.as_deref()).await?;
    let fetcher = Fetcher::new(&config.http)?;
    Ok(Ingestor::new(
        pool,
        cache,
        fetcher,
        config.ingest.clone(),
        config.sources.clone(),
    ))
}
