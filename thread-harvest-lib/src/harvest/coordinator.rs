//! Drives a complete harvest of one repository.

use super::checkpoint::{CheckpointReason, Checkpointer};
use super::executor::{FetchOutcome, RequestExecutor};
use super::gate::AdmissionGate;
use super::model::Repository;
use super::names::NameCache;
use super::pagination::Paginator;
use super::processor::ThreadProcessor;
use super::request_tracker::TrackedTopic;
use crate::Result;
use camino::Utf8PathBuf;
use core::future::Future;
use core::pin::pin;
use core::time::Duration;
use ohno::{EnrichableExt, IntoAppError, bail};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

const LOG_TARGET: &str = " harvester";
const ISSUE_PAGE_SIZE: u8 = 100;

/// What to harvest and how often to report and checkpoint.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub owner: String,
    pub repo: String,
    pub api_base_url: String,

    /// Issue list pages to fetch; zero means all.
    pub max_issue_pages: u32,

    /// Maximum threads processed concurrently.
    pub max_concurrent_threads: usize,

    /// Completed threads between periodic checkpoints; zero disables them.
    pub checkpoint_every: usize,

    /// Minimum time between progress log lines.
    pub progress_interval: Duration,
}

/// Outcome of a harvest that did not fail critically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestSummary {
    pub threads: usize,
    pub records: usize,

    /// Checkpoint written at the end, or `None` when no records were harvested.
    pub checkpoint: Option<Utf8PathBuf>,
    pub interrupted: bool,
}

/// Orchestrates repository verification, enumeration, bounded thread processing
/// and checkpointing.
#[derive(Debug)]
pub struct HarvestCoordinator {
    executor: Arc<RequestExecutor>,
    processor: ThreadProcessor,
    checkpointer: Arc<Checkpointer>,
    gate: AdmissionGate,
    options: HarvestOptions,
}

impl HarvestCoordinator {
    #[must_use]
    pub fn new(executor: Arc<RequestExecutor>, checkpointer: Arc<Checkpointer>, options: HarvestOptions) -> Self {
        let names = Arc::new(NameCache::new(Arc::clone(&executor), &options.api_base_url));
        Self {
            processor: ThreadProcessor::new(Arc::clone(&executor), names),
            gate: AdmissionGate::new(options.max_concurrent_threads),
            executor,
            checkpointer,
            options,
        }
    }

    /// Run the harvest until completion or Ctrl-C.
    pub async fn run(&self) -> Result<HarvestSummary> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Run the harvest until completion or until `interrupt` resolves.
    ///
    /// On a critical failure whatever has been harvested is written as a
    /// crash dump before the error is returned.
    pub async fn run_until<F: Future>(&self, interrupt: F) -> Result<HarvestSummary> {
        match self.harvest(interrupt).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                log::error!(target: LOG_TARGET, "Harvest failed: {e:#}");
                match self.checkpointer.save(CheckpointReason::CrashDump) {
                    Ok(Some(path)) => log::warn!(target: LOG_TARGET, "Partial results saved to '{path}'"),
                    Ok(None) => {}
                    Err(save_err) => log::error!(target: LOG_TARGET, "Could not save crash dump: {save_err:#}"),
                }
                Err(e)
            }
        }
    }

    async fn harvest<F: Future>(&self, interrupt: F) -> Result<HarvestSummary> {
        let tracker = self.executor.tracker();
        let owner = &self.options.owner;
        let repo = &self.options.repo;
        let base = self.options.api_base_url.trim_end_matches('/');

        tracker.set_phase("Verifying");
        self.verify_repository(base).await?;

        tracker.set_phase("Listing");
        tracker.show_requests();
        let issues_url = format!("{base}/repos/{owner}/{repo}/issues?state=all&per_page={ISSUE_PAGE_SIZE}");
        let items = Paginator::new(Arc::clone(&self.executor))
            .try_fetch_all(&issues_url, self.options.max_issue_pages)
            .await
            .map_err(|e| e.enrich_with(|| format!("enumerating threads of '{owner}/{repo}'")))?;

        let total = items.len();
        log::info!(target: LOG_TARGET, "Found {total} thread(s) in '{owner}/{repo}'");
        tracker.add_requests(TrackedTopic::Threads, total as u64);

        tracker.set_phase("Harvesting");
        tracker.show_threads();
        let mut tasks = JoinSet::new();
        for item in items {
            let gate = self.gate.clone();
            let processor = self.processor.clone();
            let _ = tasks.spawn(async move {
                let _permit = gate.admit().await;
                processor.process(item).await
            });
        }

        let buffer = Arc::clone(self.checkpointer.buffer());
        let mut interrupt = pin!(interrupt);
        let mut completed = 0_usize;
        let mut last_report = Instant::now();

        loop {
            tokio::select! {
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };

                    match joined {
                        Ok(records) => buffer.append(records),
                        Err(e) => log::warn!(target: LOG_TARGET, "Thread task failed: {e}"),
                    }

                    completed += 1;
                    tracker.complete_request(TrackedTopic::Threads);

                    if self.options.checkpoint_every > 0
                        && completed.is_multiple_of(self.options.checkpoint_every)
                        && let Err(e) = self.checkpointer.save(CheckpointReason::Checkpoint)
                    {
                        log::warn!(target: LOG_TARGET, "Could not save periodic checkpoint: {e:#}");
                    }

                    if last_report.elapsed() >= self.options.progress_interval {
                        log::info!(target: LOG_TARGET, "Progress: {completed}/{total} ({:.1}%)", percent(completed, total));
                        last_report = Instant::now();
                    }
                }

                _ = &mut interrupt => {
                    log::warn!(target: LOG_TARGET, "Interrupted after {completed}/{total} thread(s), saving progress");
                    let checkpoint = self.checkpointer.save(CheckpointReason::Interrupted)?;
                    tasks.abort_all();

                    return Ok(HarvestSummary {
                        threads: completed,
                        records: buffer.len(),
                        checkpoint,
                        interrupted: true,
                    });
                }
            }
        }

        let checkpoint = if buffer.is_empty() {
            log::warn!(target: LOG_TARGET, "No data processed");
            None
        } else {
            self.checkpointer.save(CheckpointReason::Final)?
        };

        Ok(HarvestSummary {
            threads: completed,
            records: buffer.len(),
            checkpoint,
            interrupted: false,
        })
    }

    async fn verify_repository(&self, base: &str) -> Result<()> {
        let owner = &self.options.owner;
        let repo = &self.options.repo;

        match self.executor.fetch(&format!("{base}/repos/{owner}/{repo}")).await {
            FetchOutcome::Success(page) => {
                let details: Repository =
                    serde_json::from_value(page.body).into_app_err_with(|| format!("unexpected repository shape for '{owner}/{repo}'"))?;
                log::info!(target: LOG_TARGET, "Targeting '{}'", details.full_name);
                if let Some(description) = details.description.filter(|d| !d.is_empty()) {
                    log::info!(target: LOG_TARGET, "Description: {description}");
                }
                Ok(())
            }
            FetchOutcome::NotFound => bail!("repository '{owner}/{repo}' not found"),
            FetchOutcome::PermanentError(e) => Err(e.enrich_with(|| format!("fetching repository '{owner}/{repo}'"))),
            FetchOutcome::RateLimited { .. } | FetchOutcome::TransientError(_) => {
                bail!("fetching repository '{owner}/{repo}' did not complete")
            }
        }
    }
}

#[expect(clippy::cast_precision_loss, reason = "thread counts are far below 2^52")]
fn percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        completed as f64 * 100.0 / total as f64
    }
}
