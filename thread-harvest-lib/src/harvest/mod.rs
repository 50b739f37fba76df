//! Collection of issue and pull request threads from the GitHub REST API
//!
//! Data flows leaf to root through these pieces:
//!
//! - [`CredentialPool`] owns every API token and decides, under a single lock,
//!   whether an exhausted token should be rotated out or whether the caller has to wait.
//! - [`RequestExecutor`] issues one GET at a time, classifies the response into a
//!   [`FetchOutcome`], retries transient failures and resolves rate limits through the pool.
//! - [`Paginator`] follows `Link` headers to produce the items of a collection.
//! - [`ThreadProcessor`] turns one issue or pull request into a set of [`ThreadRecord`]s,
//!   resolving display names through a shared [`NameCache`].
//! - [`HarvestCoordinator`] runs thread processing behind an [`AdmissionGate`], collects
//!   records into a [`ResultBuffer`] and writes checkpoints through a [`Checkpointer`].

mod checkpoint;
mod coordinator;
mod credentials;
mod executor;
mod gate;
mod model;
mod names;
mod pagination;
mod processor;
mod progress;
mod request_tracker;

pub use checkpoint::{CheckpointReason, Checkpointer, ResultBuffer, latest_final, write_records};
pub use coordinator::{HarvestCoordinator, HarvestOptions, HarvestSummary};
pub use credentials::{ActiveCredential, CredentialPool, Rotation, TOKEN_ENV_VAR, secrets_from_env};
pub use executor::{ExecutorOptions, FetchOutcome, Page, RateLimitInfo, RequestExecutor, StallHook};
pub use gate::AdmissionGate;
pub use model::{
    Account, Comment, IssueSummary, PullRequestDetails, PullRequestLink, RecordRole, Repository, Review, ThreadRecord, UserProfile,
    sort_records,
};
pub use names::NameCache;
pub use pagination::Paginator;
pub use processor::ThreadProcessor;
pub use progress::Progress;
pub use request_tracker::{RequestTracker, TopicStatus, TrackedTopic};
