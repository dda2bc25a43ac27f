//! Fetch gate: version markers and downloads of the source files.

use crate::config::HttpSettings;
use crate::error::IngestError;
use crate::model::SourceFile;
use reqwest::header::{ETAG, LAST_MODIFIED};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Whether a file needs to be ingested on this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// Unchanged since the last successful ingestion.
    Skip,
}

/// Decide from the current and cached markers. A missing marker never matches.
pub fn gate(only_if_changed: bool, current: Option<&str>, cached: Option<&str>) -> GateDecision {
    match (only_if_changed, current, cached) {
        (true, Some(current), Some(cached)) if current == cached => GateDecision::Skip,
        _ => GateDecision::Proceed,
    }
}

/// A source file available on local disk for the duration of one run.
#[derive(Debug)]
pub enum Materialized {
    /// Configured local path, read in place.
    Local(PathBuf),
    /// Private download of a remote file, removed when dropped.
    Downloaded(NamedTempFile),
}

impl Materialized {
    pub fn path(&self) -> &Path {
        match self {
            Self::Local(path) => path,
            Self::Downloaded(file) => file.path(),
        }
    }
}

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    download_dir: PathBuf,
}

impl Fetcher {
    pub fn new(settings: &HttpSettings) -> Result<Self, IngestError> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .user_agent("NumberingRegistry/1.0 (registry ingestor)");

        if let Some(path) = &settings.extra_ca_cert {
            let pem = std::fs::read(path)
                .map_err(|e| IngestError::fetch("tls", format!("{}: {}", path.display(), e)))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| IngestError::fetch("tls", format!("{}: {}", path.display(), e)))?;
            info!(ca = %path.display(), "trusting extra root certificate");
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| IngestError::fetch("client", e))?;

        Ok(Self {
            client,
            download_dir: settings.download_dir.clone(),
        })
    }

    /// Lightweight version check: `ETag`, else `Last-Modified`, for remote files;
    /// content hash for local ones.
    pub async fn version_marker(&self, source: &SourceFile) -> Result<Option<String>, IngestError> {
        if !source.is_remote() {
            return local_marker(source).await.map(Some);
        }

        let resp = self
            .client
            .head(&source.location)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IngestError::fetch(&source.id, e))?;

        let header = |name: reqwest::header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        let marker = header(ETAG).or_else(|| header(LAST_MODIFIED));
        debug!(source = %source.id, marker = ?marker, "version marker");
        Ok(marker)
    }

    /// Make the file available on local disk for one run.
    ///
    /// Every call downloads into its own temp file under the download dir, so
    /// concurrent runs of the same source never read each other's bytes.
    pub async fn materialize(&self, source: &SourceFile) -> Result<Materialized, IngestError> {
        if !source.is_remote() {
            return Ok(Materialized::Local(PathBuf::from(&source.location)));
        }

        fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| IngestError::io(&source.id, e))?;
        let download = tempfile::Builder::new()
            .prefix(&format!("{}-", source.id))
            .suffix(".csv")
            .tempfile_in(&self.download_dir)
            .map_err(|e| IngestError::io(&source.id, e))?;

        info!(source = %source.id, url = %source.location, "downloading");
        let mut resp = self
            .client
            .get(&source.location)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IngestError::fetch(&source.id, e))?;

        let handle = download.reopen().map_err(|e| IngestError::io(&source.id, e))?;
        let mut file = fs::File::from_std(handle);
        let mut size_bytes: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| IngestError::fetch(&source.id, e))?
        {
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| IngestError::io(&source.id, e))?;
        }
        file.flush().await.map_err(|e| IngestError::io(&source.id, e))?;

        info!(source = %source.id, size_bytes, path = %download.path().display(), "downloaded");
        Ok(Materialized::Downloaded(download))
    }
}

async fn local_marker(source: &SourceFile) -> Result<String, IngestError> {
    let unreadable = |e: std::io::Error| IngestError::fetch(&source.id, format!("{}: {}", source.location, e));
    let mut file = fs::File::open(Path::new(&source.location)).await.map_err(unreadable)?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(unreadable)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Partition;
    use std::io::Write;

    fn local_source(path: &Path) -> SourceFile {
        SourceFile::new(
            "ABC-3xx",
            path.to_string_lossy().to_string(),
            Partition::new(3_000_000_000, 4_000_000_000),
        )
    }

    #[test]
    fn test_gate_skips_only_unchanged_when_filtered() {
        assert_eq!(gate(true, Some("\"a\""), Some("\"a\"")), GateDecision::Skip);
        assert_eq!(gate(true, Some("\"b\""), Some("\"a\"")), GateDecision::Proceed);
        assert_eq!(gate(false, Some("\"a\""), Some("\"a\"")), GateDecision::Proceed);
    }

    #[test]
    fn test_gate_missing_marker_never_matches() {
        assert_eq!(gate(true, None, None), GateDecision::Proceed);
        assert_eq!(gate(true, None, Some("\"a\"")), GateDecision::Proceed);
        assert_eq!(gate(true, Some("\"a\""), None), GateDecision::Proceed);
    }

    #[tokio::test]
    async fn test_local_marker_tracks_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "АВС/ DEF;От;До\n").unwrap();
        let fetcher = Fetcher::new(&HttpSettings::default()).unwrap();
        let source = local_source(file.path());

        let first = fetcher.version_marker(&source).await.unwrap().unwrap();
        let again = fetcher.version_marker(&source).await.unwrap().unwrap();
        assert!(first.starts_with("sha256:"));
        assert_eq!(first, again);

        write!(file, "383;1;2\n").unwrap();
        let changed = fetcher.version_marker(&source).await.unwrap().unwrap();
        assert_ne!(first, changed);
    }

    #[tokio::test]
    async fn test_local_missing_file_is_fetch_error() {
        let fetcher = Fetcher::new(&HttpSettings::default()).unwrap();
        let source = local_source(Path::new("/nonexistent/ABC-3xx.csv"));
        let err = fetcher.version_marker(&source).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_materialize_local_is_identity() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let fetcher = Fetcher::new(&HttpSettings::default()).unwrap();
        let source = local_source(file.path());
        let materialized = fetcher.materialize(&source).await.unwrap();
        assert!(matches!(materialized, Materialized::Local(_)));
        assert_eq!(materialized.path(), file.path());
    }
}
