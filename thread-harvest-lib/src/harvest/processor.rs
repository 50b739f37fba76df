//! Turns one issue or pull request into its flat record set.

use super::executor::{FetchOutcome, RequestExecutor};
use super::model::{Account, Comment, IssueSummary, PullRequestDetails, RecordRole, Review, ThreadRecord};
use super::names::NameCache;
use super::pagination::Paginator;
use crate::Result;
use futures_util::future::join_all;
use ohno::IntoAppError;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

const LOG_TARGET: &str = "    thread";

/// Fetches everything belonging to a thread and normalizes it into [`ThreadRecord`]s.
#[derive(Debug, Clone)]
pub struct ThreadProcessor {
    executor: Arc<RequestExecutor>,
    paginator: Paginator,
    names: Arc<NameCache>,
}

impl ThreadProcessor {
    #[must_use]
    pub fn new(executor: Arc<RequestExecutor>, names: Arc<NameCache>) -> Self {
        Self {
            paginator: Paginator::new(Arc::clone(&executor)),
            executor,
            names,
        }
    }

    /// Produce the records for one entry of the issue list.
    ///
    /// Never fails: any problem is logged and yields no records for the thread.
    pub async fn process(&self, item: Value) -> Vec<ThreadRecord> {
        let number = item.get("number").and_then(Value::as_u64);
        match self.try_process(item).await {
            Ok(records) => records,
            Err(e) => {
                match number {
                    Some(n) => log::warn!(target: LOG_TARGET, "Skipping thread #{n}: {e:#}"),
                    None => log::warn!(target: LOG_TARGET, "Skipping thread: {e:#}"),
                }
                Vec::new()
            }
        }
    }

    async fn try_process(&self, item: Value) -> Result<Vec<ThreadRecord>> {
        let issue: IssueSummary = serde_json::from_value(item).into_app_err("unexpected issue shape")?;
        let pr_url = issue.pull_request.as_ref().map(|pr| pr.url.as_str());

        let (author_name, details, reviews, comments) = tokio::join!(
            self.names.resolve(&issue.user.login),
            self.pull_request_details(pr_url),
            self.pull_request_reviews(pr_url),
            self.comments(&issue),
        );

        let mut collaborators = BTreeSet::new();
        let _ = collaborators.insert(issue.user.login.clone());
        for review in reviews {
            if let Some(user) = review.user {
                let _ = collaborators.insert(user.login);
            }
        }

        let authored: Vec<(&Comment, &Account)> = comments.iter().filter_map(|c| c.user.as_ref().map(|u| (c, u))).collect();
        let comment_names = join_all(authored.iter().map(|(_, user)| self.names.resolve(&user.login))).await;

        let mut records = Vec::with_capacity(authored.len() + 1);
        records.push(root_record(&issue, author_name, details.unwrap_or_default()));

        for ((comment, user), name) in authored.into_iter().zip(comment_names) {
            if issue.is_pull_request() {
                let _ = collaborators.insert(user.login.clone());
            }
            records.push(comment_record(&issue, comment, user, name));
        }

        records[0].collaborator_usernames = Some(collaborators.into_iter().collect::<Vec<_>>().join(","));

        log::debug!(target: LOG_TARGET, "Thread #{} produced {} record(s)", issue.number, records.len());
        Ok(records)
    }

    async fn pull_request_details(&self, url: Option<&str>) -> Option<PullRequestDetails> {
        let url = url?;
        match self.executor.fetch(url).await {
            FetchOutcome::Success(page) => match serde_json::from_value(page.body) {
                Ok(details) => Some(details),
                Err(e) => {
                    log::debug!(target: LOG_TARGET, "Unexpected pull request shape at '{url}': {e}");
                    None
                }
            },
            FetchOutcome::NotFound
            | FetchOutcome::PermanentError(_)
            | FetchOutcome::RateLimited { .. }
            | FetchOutcome::TransientError(_) => None,
        }
    }

    async fn pull_request_reviews(&self, url: Option<&str>) -> Vec<Review> {
        match url {
            Some(url) => self.paginator.fetch_all_as(&format!("{url}/reviews"), 0).await,
            None => Vec::new(),
        }
    }

    async fn comments(&self, issue: &IssueSummary) -> Vec<Comment> {
        if issue.comments == 0 {
            return Vec::new();
        }

        self.paginator.fetch_all_as(&issue.comments_url, 0).await
    }
}

fn root_record(issue: &IssueSummary, author_display_name: Option<String>, details: PullRequestDetails) -> ThreadRecord {
    ThreadRecord {
        record_id: issue.id,
        thread_id: issue.number,
        parent_id: None,
        role: if issue.is_pull_request() {
            RecordRole::RootPullRequest
        } else {
            RecordRole::RootIssue
        },
        author_id: issue.user.id,
        author_username: issue.user.login.clone(),
        author_display_name,
        title: issue.title.clone(),
        body: issue.body.clone(),
        created_at: issue.created_at,
        url: issue.html_url.clone(),
        collaborator_usernames: None,
        commits: details.commits,
        changed_files: details.changed_files,
        additions: details.additions,
        deletions: details.deletions,
    }
}

fn comment_record(issue: &IssueSummary, comment: &Comment, author: &Account, author_display_name: Option<String>) -> ThreadRecord {
    ThreadRecord {
        record_id: comment.id,
        thread_id: issue.number,
        parent_id: Some(issue.id),
        role: RecordRole::Comment,
        author_id: author.id,
        author_username: author.login.clone(),
        author_display_name,
        title: None,
        body: comment.body.clone(),
        created_at: comment.created_at,
        url: comment.html_url.clone(),
        collaborator_usernames: None,
        commits: None,
        changed_files: None,
        additions: None,
        deletions: None,
    }
}
