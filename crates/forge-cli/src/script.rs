//! JSON-lines script runner.
//!
//! Each non-blank line not starting with `#` is one command object tagged by
//! `op`. Every command produces one JSON line of output; a failed command is
//! reported and the script carries on.

use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::time::Duration;
use tokenforge_core::{
    CacheKey, DocumentCache, MemoryBackend, OptimizedQueryOptions, QueryConstraint, Result,
};
use tracing::{debug, warn};

use crate::fixture::{check_collection, check_id};

/// One script command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Command {
    Get {
        collection: String,
        id: String,
        #[serde(default)]
        options: OptimizedQueryOptions,
    },
    Query {
        collection: String,
        #[serde(default)]
        constraints: Vec<QueryConstraint>,
        #[serde(default)]
        options: OptimizedQueryOptions,
    },
    /// Write to the backend, as another client would.
    Put {
        collection: String,
        id: String,
        data: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
    /// Invalidate one document, or the whole collection when `id` is absent.
    Invalidate {
        collection: String,
        #[serde(default)]
        id: Option<String>,
    },
    Clear,
    UnsubscribeAll,
    Purge,
    Sleep {
        ms: u64,
    },
    Stats,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Query { .. } => "query",
            Command::Put { .. } => "put",
            Command::Delete { .. } => "delete",
            Command::Invalidate { .. } => "invalidate",
            Command::Clear => "clear",
            Command::UnsubscribeAll => "unsubscribeAll",
            Command::Purge => "purge",
            Command::Sleep { .. } => "sleep",
            Command::Stats => "stats",
        }
    }

    /// Reject collection names and ids that would not map to a unique
    /// cache key.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::Get { collection, id, .. }
            | Command::Put { collection, id, .. }
            | Command::Delete { collection, id } => {
                check_collection(collection)?;
                check_id(id)
            }
            Command::Invalidate { collection, id } => {
                check_collection(collection)?;
                id.as_deref().map_or(Ok(()), check_id)
            }
            Command::Query { collection, .. } => check_collection(collection),
            Command::Clear
            | Command::UnsubscribeAll
            | Command::Purge
            | Command::Sleep { .. }
            | Command::Stats => Ok(()),
        }
    }
}

/// Parse one script line. `None` for blank lines and comments.
pub fn parse_line(line: &str) -> Option<anyhow::Result<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line).with_context(|| format!("invalid command: {}", line)))
}

/// Run one command and return its result payload.
pub async fn execute(cache: &DocumentCache<MemoryBackend>, command: Command) -> Result<Value> {
    command.validate()?;
    match command {
        Command::Get {
            collection,
            id,
            options,
        } => {
            let key = CacheKey::document(&collection, &id);
            let was_cached = is_fresh_hit(cache, &key, &options);
            let document = cache
                .get_document_optimized(&collection, &id, &options)
                .await?;
            Ok(json!({ "key": key.as_str(), "cached": was_cached, "document": document }))
        }
        Command::Query {
            collection,
            constraints,
            options,
        } => {
            let key = CacheKey::query(&collection, &constraints)?;
            let was_cached = is_fresh_hit(cache, &key, &options);
            let documents = cache
                .query_optimized(&collection, &constraints, &options)
                .await?;
            Ok(json!({
                "key": key.as_str(),
                "cached": was_cached,
                "count": documents.len(),
                "documents": documents,
            }))
        }
        Command::Put {
            collection,
            id,
            data,
        } => {
            cache.backend().put_document(&collection, &id, data);
            Ok(json!({ "written": format!("{}/{}", collection, id) }))
        }
        Command::Delete { collection, id } => {
            let deleted = cache.backend().delete_document(&collection, &id);
            Ok(json!({ "deleted": deleted }))
        }
        Command::Invalidate {
            collection,
            id: Some(id),
        } => Ok(json!({ "removed": usize::from(cache.invalidate_document_cache(&collection, &id)) })),
        Command::Invalidate { collection, id: None } => {
            Ok(json!({ "removed": cache.invalidate_collection_cache(&collection) }))
        }
        Command::Clear => Ok(json!({ "removed": cache.clear_cache() })),
        Command::UnsubscribeAll => Ok(json!({ "cancelled": cache.unsubscribe_all() })),
        Command::Purge => Ok(json!({ "removed": cache.purge_expired() })),
        Command::Sleep { ms } => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({ "slept": ms }))
        }
        Command::Stats => Ok(serde_json::to_value(cache.stats())?),
    }
}

/// Whether a read with `options` will be answered from the cache.
fn is_fresh_hit(
    cache: &DocumentCache<MemoryBackend>,
    key: &CacheKey,
    options: &OptimizedQueryOptions,
) -> bool {
    options.cache.enabled && cache.is_cached(key)
}

/// Summary of a script run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Execute every command of `input`, writing one JSON line per command.
///
/// Malformed lines count as failures and do not stop the run; only I/O
/// errors on `input` or `output` do.
pub async fn run_script(
    cache: &DocumentCache<MemoryBackend>,
    input: impl BufRead,
    mut output: impl Write,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.context("failed to read script")?;
        let Some(parsed) = parse_line(&line) else {
            continue;
        };
        let line_no = index + 1;

        let record = match parsed {
            Ok(command) => {
                let op = command.name();
                debug!(line = line_no, op, "executing command");
                match execute(cache, command).await {
                    Ok(result) => {
                        summary.succeeded += 1;
                        json!({ "line": line_no, "op": op, "ok": true, "result": result })
                    }
                    Err(e) => {
                        summary.failed += 1;
                        warn!(line = line_no, op, error = %e, "command failed");
                        json!({
                            "line": line_no,
                            "op": op,
                            "ok": false,
                            "remote": e.is_remote(),
                            "error": e.to_string(),
                        })
                    }
                }
            }
            Err(e) => {
                summary.failed += 1;
                warn!(line = line_no, error = %e, "skipping malformed command");
                json!({ "line": line_no, "ok": false, "error": format!("{:#}", e) })
            }
        };

        writeln!(output, "{}", record).context("failed to write result")?;
    }

    Ok(summary)
}
