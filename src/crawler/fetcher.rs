//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for an update run, including:
//! - Building HTTP clients with proper user agent strings
//! - A global token-bucket rate limit shared by every worker
//! - Response caching keyed by exact URL
//! - Retry logic with quadratic backoff for transient failures
//! - Concurrent listing-page fetches with partial-failure tolerance

use crate::config::{Config, UserAgentConfig};
use crate::crawler::cache::{Cache, MemoryCache};
use crate::crawler::pipeline::{preloaded, Stage};
use crate::url::{detail_url, listing_url, parse_base_url};
use crate::{CatalogError, ConfigError, Result};
use bytes::Bytes;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Timeout for a whole request, body included
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use catalog_mirror::config::UserAgentConfig;
/// use catalog_mirror::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "CatalogMirror".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Aggregate of the listing pages that could not be fetched
///
/// Returned next to the pages that did succeed, so callers can tell a
/// degraded-but-usable result from a complete one.
#[derive(Debug)]
pub struct PartialFetchError {
    /// `(page, cause)` for every failed page, in page order
    pub failures: Vec<(u32, CatalogError)>,
}

impl PartialFetchError {
    /// Page numbers that failed, in ascending order
    pub fn pages(&self) -> Vec<u32> {
        self.failures.iter().map(|(page, _)| *page).collect()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for PartialFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} listing page(s) failed", self.failures.len())?;
        for (page, cause) in &self.failures {
            write!(f, "; page {}: {}", page, cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for PartialFetchError {}

/// Rate-limited, caching, retrying HTTP fetcher
///
/// Cloning is cheap: the client, limiter and cache are shared, so every clone
/// draws from the same token bucket and sees the same cached responses.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    limiter: Arc<DirectLimiter>,
    cache: Arc<dyn Cache>,
    base: Url,
    page_size: u32,
    max_retries: u32,
    retry_base_delay: Duration,
    listing_workers: usize,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("base", &self.base.as_str())
            .field("page_size", &self.page_size)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("listing_workers", &self.listing_workers)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Creates a fetcher with an empty [`MemoryCache`]
    ///
    /// # Arguments
    ///
    /// * `config` - The full configuration; `source`, `fetcher`, `pipeline`
    ///   and `user-agent` sections are used
    ///
    /// # Returns
    ///
    /// * `Ok(Fetcher)` - Ready to fetch
    /// * `Err(CatalogError)` - Invalid base URL, zero rate, or client build failure
    pub fn new(config: &Config) -> Result<Self> {
        let fetcher_config = &config.fetcher;

        let rate = NonZeroU32::new(fetcher_config.requests_per_second).ok_or_else(|| {
            ConfigError::Validation("requests-per-second must be greater than 0".to_string())
        })?;
        let burst = NonZeroU32::new(fetcher_config.burst)
            .ok_or_else(|| ConfigError::Validation("burst must be greater than 0".to_string()))?;
        let quota = Quota::per_second(rate).allow_burst(burst);

        let base = parse_base_url(&config.source.base_url)?;
        let client = build_http_client(
            &config.user_agent,
            Duration::from_secs(fetcher_config.request_timeout_secs),
        )?;

        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::direct(quota)),
            cache: Arc::new(MemoryCache::new()),
            base,
            page_size: config.source.page_size,
            max_retries: fetcher_config.max_retries.max(1),
            retry_base_delay: Duration::from_millis(fetcher_config.retry_base_delay_ms),
            listing_workers: config.pipeline.listing_workers,
        })
    }

    /// Replaces the response cache
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fetches a URL, consulting the cache first
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Cache hit | Return cached body, no request |
    /// | Non-2xx status | Retry, delay `attempt² × base` |
    /// | Transport error / timeout | Retry, delay `attempt² × base` |
    /// | Token cancelled | Immediate `Cancelled` |
    /// | `max_retries` attempts used | `RetriesExhausted` wrapping the last cause |
    ///
    /// Every attempt takes a token from the shared rate limiter.
    pub async fn fetch(&self, token: &CancellationToken, url: &Url) -> Result<Bytes> {
        if let Some(body) = self.cache.get(url.as_str()) {
            tracing::trace!("Cache hit: {}", url);
            return Ok(body);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            match self.attempt(token, url).await {
                Ok(body) => {
                    self.cache.put(url.to_string(), body.clone());
                    return Ok(body);
                }
                Err(CatalogError::Cancelled) => return Err(CatalogError::Cancelled),
                Err(e) if attempt >= self.max_retries => {
                    return Err(CatalogError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.retry_base_delay * (attempt * attempt);
                    tracing::debug!(
                        "Attempt {} for {} failed ({}), retrying in {}ms",
                        attempt,
                        url,
                        e,
                        delay.as_millis()
                    );

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(CatalogError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One rate-limited GET with no retry
    async fn attempt(&self, token: &CancellationToken, url: &Url) -> Result<Bytes> {
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(CatalogError::Cancelled),
            _ = self.limiter.until_ready() => {}
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(CatalogError::Cancelled),
            response = self.client.get(url.clone()).send() => {
                response.map_err(|source| CatalogError::Http {
                    url: url.to_string(),
                    source,
                })?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(CatalogError::Cancelled),
            body = response.bytes() => body.map_err(|source| CatalogError::Http {
                url: url.to_string(),
                source,
            }),
        }
    }

    /// Fetches one listing (search) page, 1-based
    pub async fn fetch_listing_page(&self, token: &CancellationToken, page: u32) -> Result<Bytes> {
        let url = listing_url(&self.base, page, self.page_size)?;
        self.fetch(token, &url).await
    }

    /// Fetches the detail page for one slug
    pub async fn fetch_detail_page(&self, token: &CancellationToken, slug: &str) -> Result<Bytes> {
        let url = detail_url(&self.base, slug)?;
        self.fetch(token, &url).await
    }

    /// Fetches listing pages `1..=total_pages` on a fixed worker pool
    ///
    /// A failing page never stops its siblings. Workers stop pulling new pages
    /// once the token is cancelled, so pages never attempted appear in neither
    /// half of the result.
    ///
    /// # Returns
    ///
    /// The bodies of every page that succeeded, plus `Some(PartialFetchError)`
    /// if and only if at least one page failed.
    pub async fn fetch_listing_pages_concurrently(
        &self,
        token: &CancellationToken,
        total_pages: u32,
    ) -> (BTreeMap<u32, Bytes>, Option<PartialFetchError>) {
        let mut pages = BTreeMap::new();
        let mut failures = Vec::new();

        if total_pages == 0 {
            return (pages, None);
        }

        let stage = Stage::new("listing", self.listing_workers, self.listing_workers);
        let fetcher = self.clone();
        let worker_token = token.clone();

        let (mut results, handle) = stage.run(token, preloaded(1..=total_pages), move |page| {
            let fetcher = fetcher.clone();
            let token = worker_token.clone();
            async move { Some((page, fetcher.fetch_listing_page(&token, page).await)) }
        });

        while let Some((page, result)) = results.recv().await {
            match result {
                Ok(body) => {
                    pages.insert(page, body);
                }
                Err(e) => {
                    tracing::warn!("Listing page {} failed: {}", page, e);
                    failures.push((page, e));
                }
            }
        }
        handle.join().await;

        if failures.is_empty() {
            (pages, None)
        } else {
            failures.sort_by_key(|(page, _)| *page);
            (pages, Some(PartialFetchError { failures }))
        }
    }
}
