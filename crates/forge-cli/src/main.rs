//! TokenForge cache runner - drives the read cache from a JSON-lines script.
//!
//! Loads a fixture into an in-memory document store, puts a `DocumentCache`
//! in front of it, and executes one command per script line. Results go to
//! stdout as JSON lines; logs go to stderr.

mod fixture;
mod script;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tokenforge_core::DocumentCache;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use fixture::Fixture;

#[derive(Parser, Debug)]
#[command(name = "tokenforge-cache")]
#[command(about = "Run cache scripts against an in-memory document store")]
struct Args {
    /// Fixture file with the initial collections
    #[arg(short, long)]
    fixture: Option<PathBuf>,

    /// Script file (JSON lines); reads stdin when omitted
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Let slow fetches overwrite newer realtime values
    #[arg(long)]
    last_write_wins: bool,
}

fn init_logging(args: &Args) {
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_ids(false);

    if args.json_logs {
        builder.json().init();
    } else {
        builder.with_target(true).compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting TokenForge cache runner");

    let fixture = match &args.fixture {
        Some(path) => {
            let fixture = Fixture::load(path)
                .with_context(|| format!("failed to load fixture {}", path.display()))?;
            info!(
                path = %path.display(),
                documents = fixture.document_count(),
                "fixture loaded"
            );
            fixture
        }
        None => Fixture::default(),
    };

    let cache = DocumentCache::builder(Arc::new(fixture.into_backend()))
        .freshness_guard(!args.last_write_wins)
        .build();

    let stdout = std::io::stdout();
    let summary = match &args.script {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open script {}", path.display()))?;
            script::run_script(&cache, BufReader::new(file), stdout.lock()).await?
        }
        None => script::run_script(&cache, std::io::stdin().lock(), stdout.lock()).await?,
    };

    let cancelled = cache.unsubscribe_all();
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled_subscriptions = cancelled,
        "script finished"
    );

    if summary.failed > 0 {
        anyhow::bail!("{} command(s) failed", summary.failed);
    }
    Ok(())
}
