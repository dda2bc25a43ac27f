//! Ingestor - Loads the numbering-plan registry files into Postgres
//!
//! Responsibilities:
//! - Trigger ingestion of one source file, or of all four concurrently
//! - Skip unchanged files when asked (version marker cache)
//! - Report per-file outcome; a failed file never affects the others
//!
//! Usage:
//!   # All files, only those that changed since the last run:
//!   cargo run --bin ingestor -- --all --only-changed
//!
//!   # One file, by id or index:
//!   cargo run --bin ingestor -- --file ABC-4xx
//!
//!   # Debug lookup:
//!   cargo run --bin ingestor -- --lookup 73838578850

use anyhow::{Context, Result};
use clap::Parser;
use registry::lookup::lookup_subscriber;
use registry::{build_ingestor, Config, FileReport, IngestError, Ingestor, LookupError, Outcome};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ingestor", about = "Loads numbering-plan files into the registry")]
struct Args {
    /// Source file to ingest (id such as ABC-3xx, or index 0-3)
    #[arg(long, conflicts_with = "all")]
    file: Option<String>,

    /// Ingest all source files concurrently
    #[arg(long, default_value = "false")]
    all: bool,

    /// Skip files whose version marker did not change
    #[arg(long, default_value = "false")]
    only_changed: bool,

    /// Forget cached version markers before doing anything else
    #[arg(long, default_value = "false")]
    clear_cache: bool,

    /// Print the configured sources and exit
    #[arg(long, default_value = "false")]
    list: bool,

    /// Print the most recent ingestion runs and exit
    #[arg(long)]
    runs: Option<i64>,

    /// Look up an 11-digit subscriber number and exit
    #[arg(long)]
    lookup: Option<String>,
}

fn print_sources(ingestor: &Ingestor) {
    println!("\nConfigured sources:");
    println!("{:-<60}", "");
    for (idx, source) in ingestor.sources().iter().enumerate() {
        println!("  [{}] {} {} -> {}", idx, source.id, source.partition, source.location);
    }
    println!("{:-<60}", "");
}

fn print_report(report: &FileReport) {
    match report.outcome {
        Outcome::Skipped => println!("  - {} unchanged, skipped", report.source_id),
        Outcome::Ingested => {
            let s = &report.stats;
            println!("  ✓ {} ingested", report.source_id);
            println!(
                "      rows: {} read, {} malformed, {} rejected, {} valid",
                s.rows_read, s.rows_skipped, s.rows_rejected, s.valid_rows
            );
            println!(
                "      ranges: {} removed, {} written ({} chunks)",
                s.ranges_removed, s.ranges_written, s.chunks
            );
        }
    }
}

fn print_failure(source_id: &str, err: &IngestError) {
    eprintln!("  ✗ {} failed ({}): {}", source_id, err.kind(), err);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    println!("=== Numbering Registry Ingestor ===");
    println!(
        "Chunk size: {}, dimension conflict: {:?}, range conflict: {:?}",
        config.ingest.chunk_size, config.ingest.dimension_policy, config.ingest.range_policy
    );

    let ingestor = build_ingestor(&config)
        .await
        .context("Failed to initialise ingestor")?;

    if args.list {
        print_sources(&ingestor);
        return Ok(());
    }

    if let Some(limit) = args.runs {
        let runs = registry::runs::recent_runs(ingestor.pool(), limit).await?;
        for run in runs {
            println!(
                "  {} {:<8} {:<8} {} {}",
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.source_id,
                run.status,
                run.error.unwrap_or_default(),
                run.detail
            );
        }
        return Ok(());
    }

    if let Some(number) = &args.lookup {
        return match lookup_subscriber(ingestor.pool(), number).await {
            Ok(Some(info)) => {
                println!("{}", serde_json::to_string_pretty(&info)?);
                Ok(())
            }
            Ok(None) => {
                println!("Number {} not found", number);
                Ok(())
            }
            Err(LookupError::InvalidNumber(reason)) => anyhow::bail!("Invalid number {}: {}", number, reason),
            Err(e) => Err(e.into()),
        };
    }

    if args.clear_cache {
        ingestor.clear_markers().await.context("Failed to clear version markers")?;
        println!("Version markers cleared");
    }

    let started = chrono::Utc::now();
    let mut failed = 0;

    if args.all {
        println!("\nIngesting {} file(s)...", ingestor.sources().len());
        for file in ingestor.ingest_all(args.only_changed).await {
            match &file.result {
                Ok(report) => print_report(report),
                Err(e) => {
                    print_failure(&file.source_id, e);
                    failed += 1;
                }
            }
        }
    } else if let Some(key) = &args.file {
        println!("\nIngesting {}...", key);
        match ingestor.ingest_one(key, args.only_changed).await {
            Ok(report) => print_report(&report),
            Err(e) => {
                print_failure(key, &e);
                failed += 1;
            }
        }
    } else if !args.clear_cache {
        print_sources(&ingestor);
        anyhow::bail!(
            "Must specify either:\n  \
             --all [--only-changed] to ingest every file, or\n  \
             --file <id|index> to ingest one file"
        );
    }

    println!("\n=== Ingestion Summary ===");
    println!("Elapsed: {}s", (chrono::Utc::now() - started).num_seconds());
    println!("Failed: {}", failed);

    if failed > 0 {
        anyhow::bail!("{} file(s) failed", failed);
    }
    Ok(())
}
