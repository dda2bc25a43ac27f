//! Environment configuration shared by the ingestor and the api.

use crate::error::ConfigError;
use crate::model::{default_sources, ConflictPolicy, SourceFile};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const MIN_CHUNK_SIZE: usize = 1000;
pub const MAX_CHUNK_SIZE: usize = 2000;

/// Env var holding the URL override for each source, by source id.
const SOURCE_URL_VARS: [(&str, &str); 4] = [
    ("ABC-3xx", "ABC_3XX_URL"),
    ("ABC-4xx", "ABC_4XX_URL"),
    ("ABC-8xx", "ABC_8XX_URL"),
    ("DEF-9xx", "DEF_9XX_URL"),
];

/// Knobs of a single file ingestion.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub dimension_policy: ConflictPolicy,
    pub range_policy: ConflictPolicy,
    pub file_timeout: Duration,
    /// Fail a file with no valid rows instead of committing an empty partition.
    pub reject_empty: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: MIN_CHUNK_SIZE,
            dimension_policy: ConflictPolicy::Ignore,
            range_policy: ConflictPolicy::Ignore,
            file_timeout: Duration::from_secs(1800),
            reject_empty: false,
        }
    }
}

/// Outbound HTTP settings. Certificate verification is always on.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Additional PEM root certificate to trust.
    pub extra_ca_cert: Option<PathBuf>,
    pub download_dir: PathBuf,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(15),
            extra_ca_cert: None,
            download_dir: PathBuf::from("./data/raw"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbSettings,
    /// Redis URL for the version-marker cache; in-process cache when absent.
    pub redis_url: Option<String>,
    pub http: HttpSettings,
    pub ingest: IngestSettings,
    pub sources: Vec<SourceFile>,
    pub api_bind: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any key/value source.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let chunk_size: usize = parse_or(&get, "CHUNK_SIZE", MIN_CHUNK_SIZE)?;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(ConfigError::Invalid {
                name: "CHUNK_SIZE",
                reason: format!(
                    "{} is outside {}..={}",
                    chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
                ),
            });
        }

        let mut sources = default_sources();
        for source in &mut sources {
            let var = SOURCE_URL_VARS
                .iter()
                .find(|(id, _)| *id == source.id)
                .map(|(_, var)| *var);
            if let Some(location) = var.and_then(|v| get(v)) {
                source.location = location;
            }
        }

        Ok(Self {
            db: DbSettings {
                url: get("DB_URL").ok_or(ConfigError::Missing("DB_URL"))?,
                max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 8)?,
                acquire_timeout: secs_or(&get, "DB_ACQUIRE_TIMEOUT_SECS", 30)?,
                statement_timeout: secs_or(&get, "DB_STATEMENT_TIMEOUT_SECS", 60)?,
            },
            redis_url: get("REDIS_URL"),
            http: HttpSettings {
                timeout: secs_or(&get, "HTTP_TIMEOUT_SECS", 120)?,
                connect_timeout: secs_or(&get, "HTTP_CONNECT_TIMEOUT_SECS", 15)?,
                extra_ca_cert: get("EXTRA_CA_CERT").map(PathBuf::from),
                download_dir: PathBuf::from(
                    get("DOWNLOAD_DIR").unwrap_or_else(|| "./data/raw".to_string()),
                ),
            },
            ingest: IngestSettings {
                chunk_size,
                dimension_policy: parse_or(&get, "DIMENSION_CONFLICT", ConflictPolicy::Ignore)?,
                range_policy: parse_or(&get, "RANGE_CONFLICT", ConflictPolicy::Ignore)?,
                file_timeout: secs_or(&get, "FILE_TIMEOUT_SECS", 1800)?,
                reject_empty: parse_or(&get, "REJECT_EMPTY_SOURCE", false)?,
            },
            sources,
            api_bind: get("API_BIND").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(get, name, default)?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "timeouts must be positive".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("DB_URL", "postgres://localhost/registry")]).unwrap();
        assert_eq!(config.ingest.chunk_size, 1000);
        assert_eq!(config.ingest.dimension_policy, ConflictPolicy::Ignore);
        assert_eq!(config.ingest.range_policy, ConflictPolicy::Ignore);
        assert_eq!(config.http.timeout, Duration::from_secs(120));
        assert!(config.redis_url.is_none());
        assert!(config.http.extra_ca_cert.is_none());
        assert_eq!(config.sources.len(), 4);
        assert_eq!(config.api_bind, "127.0.0.1:8080");
        assert!(!config.ingest.reject_empty);
    }

    #[test]
    fn test_reject_empty_is_opt_in() {
        let config = config_from(&[("DB_URL", "x"), ("REJECT_EMPTY_SOURCE", "true")]).unwrap();
        assert!(config.ingest.reject_empty);
        assert!(config_from(&[("DB_URL", "x"), ("REJECT_EMPTY_SOURCE", "yes")]).is_err());
    }

    #[test]
    fn test_db_url_required() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DB_URL")));
    }

    #[test]
    fn test_chunk_size_bounds() {
        assert!(config_from(&[("DB_URL", "x"), ("CHUNK_SIZE", "999")]).is_err());
        assert!(config_from(&[("DB_URL", "x"), ("CHUNK_SIZE", "2001")]).is_err());
        assert!(config_from(&[("DB_URL", "x"), ("CHUNK_SIZE", "abc")]).is_err());
        let config = config_from(&[("DB_URL", "x"), ("CHUNK_SIZE", "2000")]).unwrap();
        assert_eq!(config.ingest.chunk_size, 2000);
    }

    #[test]
    fn test_conflict_policies() {
        let config = config_from(&[
            ("DB_URL", "x"),
            ("DIMENSION_CONFLICT", "update"),
            ("RANGE_CONFLICT", "ignore"),
        ])
        .unwrap();
        assert_eq!(config.ingest.dimension_policy, ConflictPolicy::Update);
        assert_eq!(config.ingest.range_policy, ConflictPolicy::Ignore);
        assert!(config_from(&[("DB_URL", "x"), ("RANGE_CONFLICT", "merge")]).is_err());
    }

    #[test]
    fn test_source_url_override() {
        let config = config_from(&[("DB_URL", "x"), ("ABC_4XX_URL", "/mirror/ABC-4xx.csv")]).unwrap();
        let source = config.sources.iter().find(|s| s.id == "ABC-4xx").unwrap();
        assert_eq!(source.location, "/mirror/ABC-4xx.csv");
        assert!(!source.is_remote());
        let untouched = config.sources.iter().find(|s| s.id == "ABC-3xx").unwrap();
        assert!(untouched.is_remote());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(config_from(&[("DB_URL", "x"), ("HTTP_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = config_from(&[("DB_URL", "x"), ("REDIS_URL", "  ")]).unwrap();
        assert!(config.redis_url.is_none());
    }
}
