//! Harvest-wide memo of account display names.

use super::executor::{FetchOutcome, RequestExecutor};
use super::model::UserProfile;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const LOG_TARGET: &str = "     names";

/// Result of one profile request.
#[derive(Debug)]
enum Lookup {
    /// The account's display name, if it has one.
    Resolved(Option<String>),

    /// The request failed; nothing is known about the account.
    Failed,
}

/// Maps usernames to display names, fetching each profile at most once per
/// harvest in the common case.
///
/// The lock is only held to read or write the map, never across a request.
/// Two tasks resolving the same new username at the same moment may both
/// fetch it; the last result stored wins.
#[derive(Debug)]
pub struct NameCache {
    executor: Arc<RequestExecutor>,
    users_url: String,
    names: Mutex<HashMap<String, Option<String>>>,
}

impl NameCache {
    /// Create an empty cache that looks up profiles under `{api_base_url}/users/`.
    #[must_use]
    pub fn new(executor: Arc<RequestExecutor>, api_base_url: &str) -> Self {
        Self {
            executor,
            users_url: format!("{}/users", api_base_url.trim_end_matches('/')),
            names: Mutex::new(HashMap::new()),
        }
    }

    /// Display name for `username`, or `None` if the account has none or the lookup failed.
    ///
    /// Failed lookups are not cached, so a later thread asks again.
    pub async fn resolve(&self, username: &str) -> Option<String> {
        let cached = self.names.lock().expect("lock not poisoned").get(username).cloned();
        if let Some(cached) = cached {
            return cached;
        }

        let Lookup::Resolved(name) = self.lookup(username).await else {
            return None;
        };

        let _ = self
            .names
            .lock()
            .expect("lock not poisoned")
            .insert(username.to_string(), name.clone());

        name
    }

    /// Number of usernames with a cached result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.lock().expect("lock not poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn lookup(&self, username: &str) -> Lookup {
        let url = format!("{}/{username}", self.users_url);
        match self.executor.fetch(&url).await {
            FetchOutcome::Success(page) => match serde_json::from_value::<UserProfile>(page.body) {
                Ok(profile) => Lookup::Resolved(profile.name.filter(|n| !n.trim().is_empty())),
                Err(e) => {
                    log::debug!(target: LOG_TARGET, "Unexpected profile shape for '{username}': {e}");
                    Lookup::Resolved(None)
                }
            },
            FetchOutcome::NotFound => {
                log::debug!(target: LOG_TARGET, "No profile for '{username}'");
                Lookup::Resolved(None)
            }
            FetchOutcome::PermanentError(e) => {
                log::debug!(target: LOG_TARGET, "Could not resolve display name for '{username}': {e:#}");
                Lookup::Failed
            }
            FetchOutcome::RateLimited { .. } | FetchOutcome::TransientError(_) => Lookup::Failed,
        }
    }
}
