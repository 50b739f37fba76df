//! Link-header pagination over collection endpoints.

use super::executor::{FetchOutcome, RequestExecutor};
use crate::Result;
use core::pin::pin;
use futures_util::stream::{self, Stream, StreamExt};
use ohno::{EnrichableExt, app_err};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

const LOG_TARGET: &str = "  paginate";

/// Follows `rel="next"` links from a starting URL.
#[derive(Debug, Clone)]
pub struct Paginator {
    executor: Arc<RequestExecutor>,
}

impl Paginator {
    #[must_use]
    pub const fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// Lazily fetch pages starting at `start_url`.
    ///
    /// The stream ends when a response has no next link, a fetch does not
    /// succeed, a page is empty or not a JSON array, or `max_pages` pages have
    /// been produced. A `max_pages` of zero means no cap.
    pub fn pages<'a>(&'a self, start_url: &str, max_pages: u32) -> impl Stream<Item = Vec<Value>> + 'a {
        self.try_pages(start_url, max_pages).filter_map(|page| async move {
            match page {
                Ok(items) => Some(items),
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "Stopping pagination: {e:#}");
                    None
                }
            }
        })
    }

    /// Like [`pages`](Self::pages), but a fetch that does not succeed or a body
    /// that is not a JSON array yields one final `Err`.
    pub fn try_pages<'a>(&'a self, start_url: &str, max_pages: u32) -> impl Stream<Item = Result<Vec<Value>>> + 'a {
        stream::unfold((Some(start_url.to_string()), 0_u32), move |(url, fetched)| async move {
            let url = url?;
            if max_pages > 0 && fetched >= max_pages {
                log::debug!(target: LOG_TARGET, "Reached page cap of {max_pages}, not fetching '{url}'");
                return None;
            }

            let page = match self.executor.fetch(&url).await {
                FetchOutcome::Success(page) => page,
                FetchOutcome::NotFound => return Some((Err(app_err!("'{url}' not found")), (None, fetched))),
                FetchOutcome::PermanentError(e) => {
                    return Some((Err(e.enrich_with(|| format!("fetching page '{url}'"))), (None, fetched)));
                }
                FetchOutcome::RateLimited { .. } | FetchOutcome::TransientError(_) => {
                    return Some((Err(app_err!("fetching page '{url}' did not complete")), (None, fetched)));
                }
            };

            let Value::Array(items) = page.body else {
                return Some((Err(app_err!("expected a JSON array from '{url}'")), (None, fetched)));
            };

            if items.is_empty() {
                return None;
            }

            Some((Ok(items), (page.next, fetched + 1)))
        })
    }

    /// Collect every item across all pages.
    ///
    /// Items from pages fetched before a failure are kept.
    pub async fn fetch_all(&self, start_url: &str, max_pages: u32) -> Vec<Value> {
        let mut items = Vec::new();
        let mut pages = pin!(self.pages(start_url, max_pages));
        while let Some(page) = pages.next().await {
            items.extend(page);
        }

        items
    }

    /// Collect every item across all pages, failing if any page cannot be fetched.
    pub async fn try_fetch_all(&self, start_url: &str, max_pages: u32) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut pages = pin!(self.try_pages(start_url, max_pages));
        while let Some(page) = pages.next().await {
            items.extend(page?);
        }

        Ok(items)
    }

    /// Like [`fetch_all`](Self::fetch_all), deserializing each item and skipping those that do not match `T`.
    pub async fn fetch_all_as<T: DeserializeOwned>(&self, start_url: &str, max_pages: u32) -> Vec<T> {
        self.fetch_all(start_url, max_pages)
            .await
            .into_iter()
            .filter_map(|item| match serde_json::from_value(item) {
                Ok(value) => Some(value),
                Err(e) => {
                    log::debug!(target: LOG_TARGET, "Skipping malformed item from '{start_url}': {e}");
                    None
                }
            })
            .collect()
    }
}
