//! REST payload shapes and the flat record type written to checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The account that authored an issue, comment or review.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: u64,
    pub login: String,
}

/// Repository metadata, used to verify the target before harvesting.
#[derive(Debug, Deserialize)]
pub struct Repository {
    pub full_name: String,
    pub description: Option<String>,
}

/// One entry from the repository issue list. Pull requests appear here too,
/// carrying a `pull_request` link.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueSummary {
    pub id: u64,
    pub number: u64,
    pub title: Option<String>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub html_url: String,
    pub user: Account,
    #[serde(default)]
    pub comments: u64,
    pub comments_url: String,
    pub pull_request: Option<PullRequestLink>,
}

impl IssueSummary {
    #[must_use]
    pub const fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestLink {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub user: Option<Account>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    pub user: Option<Account>,
}

/// Size statistics only present on the pull request resource itself.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct PullRequestDetails {
    pub commits: Option<u64>,
    pub changed_files: Option<u64>,
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub name: Option<String>,
}

/// What a record represents within its thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordRole {
    RootIssue,
    RootPullRequest,
    Comment,
}

/// One row of harvested data.
///
/// Field order is the column order of checkpoint files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub record_id: u64,
    pub thread_id: u64,
    pub parent_id: Option<u64>,
    pub role: RecordRole,
    pub author_id: u64,
    pub author_username: String,
    pub author_display_name: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub collaborator_usernames: Option<String>,
    pub commits: Option<u64>,
    pub changed_files: Option<u64>,
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
}

impl ThreadRecord {
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Order records newest first, breaking ties by record id.
pub fn sort_records(records: &mut [ThreadRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.record_id.cmp(&b.record_id)));
}
