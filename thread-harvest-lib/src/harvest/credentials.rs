//! Credential pool with rate-limit aware rotation.
//!
//! The pool owns every configured API token along with the time at which each
//! token is next believed to have request credit. Callers build request headers
//! from the active token and report exhaustion back to the pool, which decides
//! under a single lock whether to rotate to another token or to wait.

use crate::Result;
use chrono::{DateTime, Utc};
use core::fmt::{Debug, Formatter};
use core::time::Duration;
use ohno::{IntoAppError, bail};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use std::sync::Mutex;

const LOG_TARGET: &str = "    tokens";
const ACCEPT_GITHUB_V3: &str = "application/vnd.github.v3+json";

/// Environment variable consulted when no numbered tokens are present.
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// One token with its own independent rate-limit budget.
struct Credential {
    authorization: HeaderValue,
    usable_after: DateTime<Utc>,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credential")
            .field("authorization", &"<redacted>")
            .field("usable_after", &self.usable_after)
            .finish()
    }
}

#[derive(Debug)]
struct PoolState {
    credentials: Vec<Credential>,
    current: usize,
}

/// What a caller should do after reporting an exhausted credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Another credential is usable now; re-issue the request immediately.
    RetryNow,

    /// Every credential is exhausted; re-issue the request after this long.
    Wait(Duration),
}

/// Headers for the active credential, tagged with the index they were built from.
#[derive(Debug, Clone)]
pub struct ActiveCredential {
    pub index: usize,
    pub headers: HeaderMap,
}

/// Holds the configured credentials and the index of the one currently in use.
#[derive(Debug)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Create a pool from raw token strings. Blank entries are ignored.
    ///
    /// Fails if no tokens remain or if a token cannot be used as a header value.
    pub fn new<I, S>(secrets: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut credentials = Vec::new();
        for (i, secret) in secrets.into_iter().enumerate() {
            let secret = secret.as_ref().trim();
            if secret.is_empty() {
                continue;
            }

            let mut authorization =
                HeaderValue::from_str(&format!("token {secret}")).into_app_err_with(|| format!("credential #{} is not a valid header value", i + 1))?;
            authorization.set_sensitive(true);

            credentials.push(Credential {
                authorization,
                usable_after: DateTime::UNIX_EPOCH,
            });
        }

        if credentials.is_empty() {
            bail!("no API credentials configured; set {TOKEN_ENV_VAR}_1, {TOKEN_ENV_VAR}_2, ... or {TOKEN_ENV_VAR}");
        }

        log::info!(target: LOG_TARGET, "Loaded {} credential(s)", credentials.len());

        Ok(Self {
            state: Mutex::new(PoolState { credentials, current: 0 }),
        })
    }

    /// Number of credentials in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("lock not poisoned").credentials.len()
    }

    /// Always `false`; a pool cannot be constructed without credentials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the credential currently in use.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.state.lock().expect("lock not poisoned").current
    }

    /// Build the request headers for the credential currently in use.
    #[must_use]
    pub fn active_headers(&self) -> ActiveCredential {
        let state = self.state.lock().expect("lock not poisoned");
        let credential = &state.credentials[state.current];

        let mut headers = HeaderMap::with_capacity(2);
        let _ = headers.insert(AUTHORIZATION, credential.authorization.clone());
        let _ = headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_GITHUB_V3));

        ActiveCredential {
            index: state.current,
            headers,
        }
    }

    /// Record that the credential at `failed_index` has no credit until `reset_at`
    /// and decide how the caller should proceed.
    pub fn report_exhausted(&self, failed_index: usize, reset_at: DateTime<Utc>) -> Rotation {
        self.report_exhausted_at(failed_index, reset_at, Utc::now())
    }

    /// Same as [`report_exhausted`](Self::report_exhausted) with an explicit notion of "now".
    pub fn report_exhausted_at(&self, failed_index: usize, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Rotation {
        let mut state = self.state.lock().expect("lock not poisoned");

        // a late duplicate report must never pull a reset time backwards
        if let Some(failed) = state.credentials.get_mut(failed_index) {
            failed.usable_after = failed.usable_after.max(reset_at);
        }

        // another caller already rotated away from the failed credential
        if state.current != failed_index && state.credentials[state.current].usable_after <= now {
            return Rotation::RetryNow;
        }

        if let Some(index) = state.credentials.iter().position(|c| c.usable_after <= now) {
            if index != state.current {
                log::warn!(target: LOG_TARGET, "Switching to credential #{}", index + 1);
            }
            state.current = index;
            return Rotation::RetryNow;
        }

        let (earliest_index, earliest) = state
            .credentials
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.usable_after))
            .min_by_key(|&(_, usable_after)| usable_after)
            .expect("pool is never empty");

        // park on the credential that frees up first so the retry after the wait uses it
        state.current = earliest_index;
        drop(state);

        let wait = (earliest - now).to_std().unwrap_or(Duration::ZERO);
        log::warn!(
            target: LOG_TARGET,
            "All credentials exhausted, waiting {:.1} minute(s) until {}",
            wait.as_secs_f64() / 60.0,
            earliest.with_timezone(&chrono::Local).format("%T")
        );

        Rotation::Wait(wait)
    }
}

/// Collect token strings from the environment.
///
/// Reads `GITHUB_TOKEN_1`, `GITHUB_TOKEN_2`, ... until the first missing index.
/// Falls back to a single `GITHUB_TOKEN` when no numbered token is set.
pub fn secrets_from_env<F>(lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut secrets = Vec::new();
    for i in 1.. {
        match lookup(&format!("{TOKEN_ENV_VAR}_{i}")) {
            Some(secret) if !secret.trim().is_empty() => secrets.push(secret),
            _ => break,
        }
    }

    if secrets.is_empty()
        && let Some(secret) = lookup(TOKEN_ENV_VAR)
    {
        secrets.push(secret);
    }

    secrets
}
