//! Shared result buffer and CSV checkpoint files.
//!
//! Checkpoints are named `github_{owner}_{repo}_{REASON}.csv`. A checkpoint
//! replaces an earlier one with the same reason and leaves the others alone.
//! Files are written under a temporary name and renamed into place, so readers
//! never see a partially written checkpoint.

use super::executor::StallHook;
use super::model::{ThreadRecord, sort_records};
use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::IntoAppError;
use std::fs;
use std::sync::{Arc, Mutex};
use strum::{Display, EnumIter, IntoStaticStr};
use tokio::runtime::{Handle, RuntimeFlavor};

const LOG_TARGET: &str = "checkpoint";
const FINAL_SUFFIX: &str = "_FINAL.csv";

/// Why a checkpoint was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointReason {
    /// All thread tasks finished.
    Final,

    /// The run failed outside of any single thread.
    CrashDump,

    /// Every credential is exhausted and requests are about to block.
    RateLimitPause,

    /// Periodic snapshot after a number of completed threads.
    Checkpoint,

    /// The process received an interrupt.
    Interrupted,
}

/// Append-only buffer of harvested records shared by all thread tasks.
#[derive(Debug, Default)]
pub struct ResultBuffer {
    records: Mutex<Vec<ThreadRecord>>,
}

impl ResultBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, records: Vec<ThreadRecord>) {
        if records.is_empty() {
            return;
        }

        self.records.lock().expect("lock not poisoned").extend(records);
    }

    /// Copy of the current contents, in append order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ThreadRecord> {
        self.records.lock().expect("lock not poisoned").clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().expect("lock not poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes snapshots of a [`ResultBuffer`] to the output directory.
#[derive(Debug)]
pub struct Checkpointer {
    buffer: Arc<ResultBuffer>,
    output_dir: Utf8PathBuf,
    owner: String,
    repo: String,

    /// Buffer length at the last rate-limit flush, so concurrent stalls write once.
    last_stall_flush: Mutex<Option<usize>>,
}

impl Checkpointer {
    #[must_use]
    pub fn new(buffer: Arc<ResultBuffer>, output_dir: impl Into<Utf8PathBuf>, owner: &str, repo: &str) -> Self {
        Self {
            buffer,
            output_dir: output_dir.into(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            last_stall_flush: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<ResultBuffer> {
        &self.buffer
    }

    /// Where a checkpoint for `reason` is written.
    #[must_use]
    pub fn path_for(&self, reason: CheckpointReason) -> Utf8PathBuf {
        self.output_dir.join(format!("github_{}_{}_{reason}.csv", self.owner, self.repo))
    }

    /// Snapshot, sort and write the buffer.
    ///
    /// Returns the path written, or `None` if the buffer is empty.
    pub fn save(&self, reason: CheckpointReason) -> Result<Option<Utf8PathBuf>> {
        let mut records = self.buffer.snapshot();
        if records.is_empty() {
            log::info!(target: LOG_TARGET, "No records to save for {reason} checkpoint");
            return Ok(None);
        }

        sort_records(&mut records);

        let path = self.path_for(reason);
        fs::create_dir_all(&self.output_dir).into_app_err_with(|| format!("creating output directory '{}'", self.output_dir))?;
        write_records(&path, &records)?;

        log::info!(target: LOG_TARGET, "Saved {} record(s) to '{path}' ({reason})", records.len());
        Ok(Some(path))
    }
}

impl Checkpointer {
    fn flush_before_stall(&self, wait: Duration) {
        let mut last = self.last_stall_flush.lock().expect("lock not poisoned");
        let len = self.buffer.len();
        if *last == Some(len) {
            return;
        }

        log::info!(
            target: LOG_TARGET,
            "Saving progress before waiting {:.1} minute(s) for rate limits",
            wait.as_secs_f64() / 60.0
        );

        match self.save(CheckpointReason::RateLimitPause) {
            Ok(_) => *last = Some(len),
            Err(e) => log::error!(target: LOG_TARGET, "Could not save rate limit checkpoint: {e:#}"),
        }
    }
}

impl StallHook for Checkpointer {
    fn before_stall(&self, wait: Duration) {
        // the write blocks, so let the multi-threaded runtime move other tasks off this worker first
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.flush_before_stall(wait));
            }
            _ => self.flush_before_stall(wait),
        }
    }
}

/// Write `records` as CSV to `path`, replacing any existing file atomically.
pub fn write_records(path: &Utf8Path, records: &[ThreadRecord]) -> Result<()> {
    let tmp_path = Utf8PathBuf::from(format!("{path}.tmp"));

    let mut writer = csv::Writer::from_path(&tmp_path).into_app_err_with(|| format!("creating checkpoint file '{tmp_path}'"))?;
    for record in records {
        writer
            .serialize(record)
            .into_app_err_with(|| format!("writing checkpoint file '{tmp_path}'"))?;
    }
    writer
        .flush()
        .into_app_err_with(|| format!("flushing checkpoint file '{tmp_path}'"))?;
    drop(writer);

    fs::rename(&tmp_path, path).into_app_err_with(|| format!("moving checkpoint into place at '{path}'"))?;
    Ok(())
}

/// The most recently modified `*_FINAL.csv` in `dir`, if any.
pub fn latest_final(dir: &Utf8Path) -> Result<Option<Utf8PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<(std::time::SystemTime, Utf8PathBuf)> = None;
    for entry in dir.read_dir_utf8().into_app_err_with(|| format!("reading directory '{dir}'"))? {
        let entry = entry.into_app_err_with(|| format!("reading directory '{dir}'"))?;
        if !entry.file_name().ends_with(FINAL_SUFFIX) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .into_app_err_with(|| format!("reading modification time of '{}'", entry.path()))?;

        if latest.as_ref().is_none_or(|(newest, _)| modified > *newest) {
            latest = Some((modified, entry.path().to_path_buf()));
        }
    }

    Ok(latest.map(|(_, path)| path))
}
