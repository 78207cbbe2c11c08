use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::record::RawItem;
use crate::sources::{Binding, ExtractOptions, Registry};

/// What one source contributed to a run.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Vec<RawItem>),
    /// The extractor could not be built, so it never ran.
    Unavailable(String),
    /// It ran and failed: error, panic or timeout.
    Failed(String),
}

impl Outcome {
    pub fn items(&self) -> &[RawItem] {
        match self {
            Outcome::Success(items) => items.as_slice(),
            _ => &[],
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "ok",
            Outcome::Unavailable(_) => "unavailable",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Unavailable(r) | Outcome::Failed(r) => Some(r.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub outcome: Outcome,
}

enum Pending {
    Running(JoinHandle<Outcome>),
    Done(Outcome),
}

/// Run every enabled source as its own task and collect one report per
/// source, in registry order. Never fails: each source's errors, panics and
/// timeouts end up in its own [`Outcome`].
pub async fn run_sources(
    registry: &Registry,
    filter: Option<&[String]>,
    query: &str,
    max_results: usize,
    options: &ExtractOptions,
    timeout: Option<Duration>,
) -> Vec<SourceReport> {
    let mut pending = Vec::new();
    for entry in registry.enabled(filter) {
        let task = match &entry.binding {
            Binding::Unavailable(reason) => {
                warn!("[{}] skipped: {}", entry.id, reason);
                Pending::Done(Outcome::Unavailable(reason.clone()))
            }
            Binding::Available(extractor) => {
                let extractor = extractor.clone();
                let id = entry.id.clone();
                let query = query.to_string();
                let options = options.clone();
                Pending::Running(tokio::spawn(async move {
                    let t0 = Instant::now();
                    let run = extractor.extract(&query, max_results, &options);
                    let result = match timeout {
                        Some(limit) => match tokio::time::timeout(limit, run).await {
                            Ok(result) => result,
                            Err(_) => {
                                warn!("[{}] timed out after {:.0}s", id, limit.as_secs_f64());
                                return Outcome::Failed(format!(
                                    "timed out after {:.0}s",
                                    limit.as_secs_f64()
                                ));
                            }
                        },
                        None => run.await,
                    };
                    match result {
                        Ok(mut items) => {
                            items.truncate(max_results);
                            info!(
                                "[{}] {} items in {:.1}s",
                                id,
                                items.len(),
                                t0.elapsed().as_secs_f64()
                            );
                            Outcome::Success(items)
                        }
                        Err(e) => {
                            warn!("[{}] failed: {:#}", id, e);
                            Outcome::Failed(format!("{:#}", e))
                        }
                    }
                }))
            }
        };
        pending.push((entry.id.clone(), task));
    }

    let mut reports = Vec::with_capacity(pending.len());
    for (source, task) in pending {
        let outcome = match task {
            Pending::Done(outcome) => outcome,
            Pending::Running(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("[{}] task aborted: {}", source, e);
                    Outcome::Failed(format!("task aborted: {}", e))
                }
            },
        };
        reports.push(SourceReport { source, outcome });
    }
    reports
}
