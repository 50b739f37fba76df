//! Single-request execution against the GitHub REST API.
//!
//! Every request runs through a small state machine. Transient failures are
//! retried a fixed number of times with a fixed backoff, while rate-limit
//! exhaustion is resolved by rotating credentials or waiting for the earliest
//! reset. Callers only ever see success, not-found, or a permanent failure.

use super::credentials::{CredentialPool, Rotation};
use super::request_tracker::{RequestTracker, TopicStatus, TrackedTopic};
use crate::Result;
use chrono::{DateTime, Utc};
use core::time::Duration;
use ohno::{AppError, EnrichableExt, IntoAppError, app_err};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, LINK};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

const LOG_TARGET: &str = "  executor";
const USER_AGENT: &str = "thread-harvest";

static NEXT_LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).expect("invalid regex"));

/// One page of a successful response.
#[derive(Debug, Clone)]
pub struct Page {
    pub body: Value,

    /// Target of the `rel="next"` entry in the `Link` header, if any.
    pub next: Option<String>,
}

/// Classification of a request.
///
/// A single attempt may produce any variant. [`RequestExecutor::fetch`] resolves
/// `RateLimited` and `TransientError` internally and never returns them.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(Page),
    NotFound,
    RateLimited { reset_at: Option<DateTime<Utc>> },
    TransientError(AppError),
    PermanentError(AppError),
}

impl FetchOutcome {
    /// The page, if the request succeeded.
    #[must_use]
    pub fn into_page(self) -> Option<Page> {
        match self {
            Self::Success(page) => Some(page),
            _ => None,
        }
    }
}

/// Rate limit headers from a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u64,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Called right before a request blocks because every credential is exhausted.
pub trait StallHook: Send + Sync {
    fn before_stall(&self, wait: Duration);
}

/// Retry and timing policy.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Attempts per request for transient failures.
    pub max_attempts: u32,
    pub retry_backoff: Duration,

    /// Added to the server-reported reset time before a credential is considered usable again.
    pub reset_grace: Duration,
    pub request_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            reset_grace: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

enum State {
    Attempting { attempt: u32 },
    Rotating { credential: usize, reset_at: DateTime<Utc>, attempt: u32 },
    Waiting { wait: Duration, attempt: u32 },
    Done(FetchOutcome),
}

/// Issues authenticated GET requests through a shared [`CredentialPool`].
pub struct RequestExecutor {
    client: reqwest::Client,
    pool: Arc<CredentialPool>,
    options: ExecutorOptions,
    tracker: RequestTracker,
    stall_hook: Option<Arc<dyn StallHook>>,
}

impl core::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("pool", &self.pool)
            .field("options", &self.options)
            .field("stall_hook", &self.stall_hook.as_ref().map(|_| "<dyn StallHook>"))
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    pub fn new(pool: Arc<CredentialPool>, tracker: RequestTracker, options: ExecutorOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(options.request_timeout)
            .build()
            .into_app_err("creating HTTP client")?;

        Ok(Self {
            client,
            pool,
            options,
            tracker,
            stall_hook: None,
        })
    }

    /// Install a hook that runs before any full-exhaustion wait.
    #[must_use]
    pub fn with_stall_hook(mut self, hook: Arc<dyn StallHook>) -> Self {
        self.stall_hook = Some(hook);
        self
    }

    #[must_use]
    pub const fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Fetch `url`, returning `Success`, `NotFound` or `PermanentError`.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        self.tracker.add_requests(TrackedTopic::Requests, 1);

        let mut state = State::Attempting { attempt: 1 };
        let outcome = loop {
            state = match state {
                State::Attempting { attempt } => {
                    let credential = self.pool.active_headers();
                    match self.attempt(url, credential.headers).await {
                        FetchOutcome::RateLimited { reset_at } => {
                            let reset_at = reset_at.unwrap_or_else(Utc::now) + self.options.reset_grace;
                            log::debug!(target: LOG_TARGET, "Credential #{} rate limited on '{url}'", credential.index + 1);
                            State::Rotating {
                                credential: credential.index,
                                reset_at,
                                attempt,
                            }
                        }

                        FetchOutcome::TransientError(e) if attempt < self.options.max_attempts => {
                            log::debug!(target: LOG_TARGET, "Attempt {attempt}/{} for '{url}' failed: {e:#}", self.options.max_attempts);
                            tokio::time::sleep(self.options.retry_backoff).await;
                            State::Attempting { attempt: attempt + 1 }
                        }

                        FetchOutcome::TransientError(e) => {
                            log::warn!(target: LOG_TARGET, "Giving up on '{url}' after {attempt} attempt(s): {e:#}");
                            State::Done(FetchOutcome::PermanentError(
                                e.enrich_with(|| format!("giving up after {attempt} attempt(s)")),
                            ))
                        }

                        outcome => State::Done(outcome),
                    }
                }

                State::Rotating {
                    credential,
                    reset_at,
                    attempt,
                } => match self.pool.report_exhausted(credential, reset_at) {
                    Rotation::RetryNow => State::Attempting { attempt },
                    Rotation::Wait(wait) => State::Waiting { wait, attempt },
                },

                State::Waiting { wait, attempt } => {
                    if let Some(hook) = &self.stall_hook {
                        hook.before_stall(wait);
                    }

                    self.tracker.set_topic_status(TrackedTopic::Requests, TopicStatus::Blocked);
                    if !log::log_enabled!(log::Level::Warn) {
                        self.tracker
                            .println(&format!("GitHub rate limit exceeded: waiting {} second(s)...", wait.as_secs()));
                    }

                    tokio::time::sleep(wait).await;

                    self.tracker.set_topic_status(TrackedTopic::Requests, TopicStatus::Active);
                    log::info!(target: LOG_TARGET, "Rate limit wait over, resuming requests");
                    State::Attempting { attempt }
                }

                State::Done(outcome) => break outcome,
            };
        };

        self.tracker.complete_request(TrackedTopic::Requests);
        outcome
    }

    /// Issue one GET and classify the response.
    async fn attempt(&self, url: &str, headers: HeaderMap) -> FetchOutcome {
        let resp = match self.client.get(url).headers(headers).send().await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::TransientError(AppError::from(e).enrich_with(|| format!("requesting '{url}'"))),
        };

        let status = resp.status();
        if status.is_success() {
            let next = next_link(resp.headers());
            return match resp.json::<Value>().await {
                Ok(body) => FetchOutcome::Success(Page { body, next }),
                Err(e) if e.is_decode() => {
                    FetchOutcome::PermanentError(AppError::from(e).enrich_with(|| format!("response from '{url}' is not valid JSON")))
                }
                Err(e) => FetchOutcome::TransientError(AppError::from(e).enrich_with(|| format!("reading response from '{url}'"))),
            };
        }

        if status == StatusCode::NOT_FOUND {
            return FetchOutcome::NotFound;
        }

        if status == StatusCode::FORBIDDEN
            && let Some(rate_limit) = extract_rate_limit_from_headers(resp.headers())
            && rate_limit.remaining == 0
        {
            return FetchOutcome::RateLimited {
                reset_at: rate_limit.reset_at,
            };
        }

        FetchOutcome::TransientError(app_err!("HTTP {status} from '{url}'"))
    }
}

/// Extract rate limit information from API response headers.
///
/// Returns `None` if the remaining-credit header is absent or malformed. An
/// unparseable reset header yields `reset_at: None`.
fn extract_rate_limit_from_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?.trim().parse::<u64>().ok()?;

    let reset_at = headers
        .get("x-ratelimit-reset")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    Some(RateLimitInfo { remaining, reset_at })
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    NEXT_LINK_REGEX.captures(link).map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::progress::Progress;
    use reqwest::header::HeaderValue;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug)]
    struct NoOpProgress;

    impl Progress for NoOpProgress {
        fn set_phase(&self, _phase: &str) {}
        fn set_determinate(&self, _callback: Box<dyn Fn() -> (u64, u64, String) + Send + Sync + 'static>) {}
        fn set_indeterminate(&self, _callback: Box<dyn Fn() -> String + Send + Sync + 'static>) {}
        fn println(&self, _msg: &str) {}
        fn done(&self) {}
    }

    #[derive(Debug, Default)]
    struct RecordingHook {
        stalls: Mutex<Vec<Duration>>,
    }

    impl StallHook for RecordingHook {
        fn before_stall(&self, wait: Duration) {
            self.stalls.lock().unwrap().push(wait);
        }
    }

    fn fast_options() -> ExecutorOptions {
        ExecutorOptions {
            retry_backoff: Duration::ZERO,
            reset_grace: Duration::ZERO,
            ..ExecutorOptions::default()
        }
    }

    fn executor(tokens: &[&str]) -> RequestExecutor {
        let pool = Arc::new(CredentialPool::new(tokens).unwrap());
        let tracker = RequestTracker::new(&(Arc::new(NoOpProgress) as Arc<dyn Progress>));
        RequestExecutor::new(pool, tracker, fast_options()).unwrap()
    }

    fn rate_limited(reset_at: i64) -> ResponseTemplate {
        ResponseTemplate::new(403)
            .insert_header("x-ratelimit-remaining", "0")
            .insert_header("x-ratelimit-reset", reset_at.to_string().as_str())
    }

    #[test]
    fn test_next_link_between_other_relations() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.github.com/x?page=1>; rel="prev", <https://api.github.com/x?page=3>; rel="next", <https://api.github.com/x?page=9>; rel="last""#,
            ),
        );

        assert_eq!(next_link(&headers).as_deref(), Some("https://api.github.com/x?page=3"));
    }

    #[test]
    fn test_next_link_absent() {
        let mut headers = HeaderMap::new();
        assert!(next_link(&headers).is_none());

        let _ = headers.insert(LINK, HeaderValue::from_static(r#"<https://api.github.com/x?page=1>; rel="first""#));
        assert!(next_link(&headers).is_none());
    }

    #[test]
    fn test_extract_rate_limit_from_headers() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let _ = headers.insert("x-ratelimit-reset", HeaderValue::from_static("1704067200"));

        let rate_limit = extract_rate_limit_from_headers(&headers).unwrap();
        assert_eq!(rate_limit.remaining, 0);
        assert_eq!(rate_limit.reset_at.unwrap().timestamp(), 1_704_067_200);
    }

    #[test]
    fn test_extract_rate_limit_invalid_reset() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let _ = headers.insert("x-ratelimit-reset", HeaderValue::from_static("soon"));

        let rate_limit = extract_rate_limit_from_headers(&headers).unwrap();
        assert!(rate_limit.reset_at.is_none());
    }

    #[test]
    fn test_extract_rate_limit_missing_remaining() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert("x-ratelimit-reset", HeaderValue::from_static("1704067200"));
        assert!(extract_rate_limit_from_headers(&headers).is_none());
    }

    #[tokio::test]
    async fn test_success_with_next_link() {
        let server = MockServer::start().await;
        let next = format!("{}/items?page=2", server.uri());
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(header("authorization", "token alpha"))
            .and(header("accept", "application/vnd.github.v3+json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([1, 2]))
                    .insert_header("link", format!(r#"<{next}>; rel="next""#).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let exec = executor(&["alpha"]);
        let page = exec.fetch(&format!("{}/items", server.uri())).await.into_page().unwrap();

        assert_eq!(page.body, serde_json::json!([1, 2]));
        assert_eq!(page.next.as_deref(), Some(next.as_str()));
        assert_eq!(exec.tracker().completed(TrackedTopic::Requests), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = executor(&["alpha"]).fetch(&format!("{}/missing", server.uri())).await;
        assert!(matches!(outcome, FetchOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = executor(&["alpha"]).fetch(&format!("{}/flaky", server.uri())).await;
        assert!(matches!(outcome, FetchOutcome::PermanentError(_)));
    }

    #[tokio::test]
    async fn test_transient_error_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let outcome = executor(&["alpha"]).fetch(&format!("{}/flaky", server.uri())).await;
        assert!(matches!(outcome, FetchOutcome::Success(_)));
    }

    #[tokio::test]
    async fn test_forbidden_with_credit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).insert_header("x-ratelimit-remaining", "42"))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = executor(&["alpha", "beta"]).fetch(&format!("{}/forbidden", server.uri())).await;
        assert!(matches!(outcome, FetchOutcome::PermanentError(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = executor(&["alpha"]).fetch(&format!("{}/html", server.uri())).await;
        assert!(matches!(outcome, FetchOutcome::PermanentError(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_rotates_without_delay() {
        let server = MockServer::start().await;
        let reset_at = Utc::now().timestamp() + 3600;
        Mock::given(method("GET"))
            .and(header("authorization", "token alpha"))
            .respond_with(rate_limited(reset_at))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "token beta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let hook = Arc::new(RecordingHook::default());
        let exec = executor(&["alpha", "beta"]).with_stall_hook(Arc::clone(&hook) as Arc<dyn StallHook>);

        let start = std::time::Instant::now();
        let outcome = exec.fetch(&format!("{}/issues", server.uri())).await;

        assert!(matches!(outcome, FetchOutcome::Success(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(hook.stalls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_exhaustion_waits_then_retries() {
        let server = MockServer::start().await;
        let reset_at = Utc::now().timestamp() + 1;
        Mock::given(method("GET"))
            .respond_with(rate_limited(reset_at))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
            .mount(&server)
            .await;

        let hook = Arc::new(RecordingHook::default());
        let exec = executor(&["alpha"]).with_stall_hook(Arc::clone(&hook) as Arc<dyn StallHook>);

        let outcome = exec.fetch(&format!("{}/repo", server.uri())).await;

        assert!(matches!(outcome, FetchOutcome::Success(_)));
        let stalls = hook.stalls.lock().unwrap();
        assert_eq!(stalls.len(), 1);
        assert!(stalls[0] <= Duration::from_secs(2));
        drop(stalls);
    }

    #[tokio::test]
    async fn test_connection_failure_is_permanent_after_retries() {
        let exec = executor(&["alpha"]);
        // nothing listens on port 9 of the loopback interface in test environments
        let outcome = exec.fetch("http://127.0.0.1:9/unreachable").await;
        assert!(matches!(outcome, FetchOutcome::PermanentError(_)));
    }
}
