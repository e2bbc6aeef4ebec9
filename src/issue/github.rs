//! GitHub v3 search issuer.
//!
//! One conjunctive sub-query maps to one `GET /search/{kind}?q=...`
//! call; the interesting part is everything around it. Before each
//! request the issuer sleeps a jittered delay derived from the search
//! rate limit discovered at connect time, waits out exhausted rate
//! windows, and retries transport failures with exponential back-off.
//! A `422 Unprocessable Entity` means the server rejected the
//! sub-query itself and is only tolerated in approximate mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use clap::ValueEnum;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, DATE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::{triangular_delay, Issued, QueryIssuer, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Without a token GitHub grants 10 searches per minute.
const UNAUTHENTICATED_DELAY_SECS: f64 = 6.0;

/// Granularity of cancellable sleeps.
const SLEEP_STEP: StdDuration = StdDuration::from_millis(200);

/// Which search endpoint the counts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchKind {
    Code,
    Commits,
    Issues,
    Repositories,
    Topics,
    Users,
}

impl SearchKind {
    fn segment(self) -> &'static str {
        match self {
            SearchKind::Code => "code",
            SearchKind::Commits => "commits",
            SearchKind::Issues => "issues",
            SearchKind::Repositories => "repositories",
            SearchKind::Topics => "topics",
            SearchKind::Users => "users",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub token: Option<String>,
    pub base_url: String,
    pub kind: SearchKind,
    pub query_max_length: usize,
    pub admit_long_query: bool,
    pub admit_incomplete: bool,
    /// Upper bound of the jitter interval, as a multiple of the base delay.
    pub waiting_factor: u32,
    pub retry: RetryPolicy,
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            token: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            kind: SearchKind::Code,
            query_max_length: 128,
            admit_long_query: false,
            admit_incomplete: false,
            waiting_factor: 7,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct GithubIssuer {
    config: GithubConfig,
    client: reqwest::Client,
    /// Seconds between requests, `60 / rate_limit_per_minute`.
    delay: f64,
    rng: StdRng,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateResources,
}

#[derive(Debug, Deserialize)]
struct RateResources {
    search: RateBudget,
}

#[derive(Debug, Deserialize)]
struct RateBudget {
    limit: u32,
    remaining: u32,
    reset: i64,
}

#[derive(Debug)]
struct SearchRate {
    limit: u32,
    remaining: u32,
    reset: DateTime<Utc>,
    server_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    #[serde(default)]
    incomplete_results: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl GithubIssuer {
    /// Connect and discover the search rate budget.
    pub async fn connect(config: GithubConfig, cancel: Arc<AtomicBool>) -> Result<Self> {
        let mut issuer = Self::offline(config, cancel)?;
        debug!("discovering search rate limit");
        let rate = issuer.search_rate().await?;
        issuer.delay = 60.0 / rate.limit.max(1) as f64;
        debug!(
            limit_per_minute = rate.limit,
            delay_secs = issuer.delay,
            "rate limit discovered"
        );
        Ok(issuer)
    }

    /// Build an issuer without contacting the server. Used in
    /// simulation, where only the length policy and time estimates are
    /// exercised; estimates assume the unauthenticated budget.
    pub fn offline(config: GithubConfig, cancel: Arc<AtomicBool>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::Config("token contains invalid header characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("querent/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(GithubIssuer {
            config,
            client,
            delay: UNAUTHENTICATED_DELAY_SECS,
            rng: StdRng::from_entropy(),
            cancel,
        })
    }

    async fn search_rate(&self) -> Result<SearchRate> {
        let url = format!("{}/rate_limit", self.config.base_url);
        let response = self.send_with_retry(&url, &[]).await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Auth("the server rejected the token".into()));
        }
        let server_date = header_date(&response).unwrap_or_else(Utc::now);
        if !status.is_success() {
            return Err(Error::Connection(format!(
                "rate limit request failed with status {status}"
            )));
        }
        let payload: RateLimitResponse = response
            .json()
            .await
            .map_err(|e| Error::Connection(format!("malformed rate limit response: {e}")))?;
        let budget = payload.resources.search;
        Ok(SearchRate {
            limit: budget.limit,
            remaining: budget.remaining,
            reset: DateTime::from_timestamp(budget.reset, 0).unwrap_or(server_date),
            server_date,
        })
    }

    /// One GET with the transport retry policy applied: retryable
    /// statuses (403/429/5xx) honour `Retry-After` when present and
    /// back off exponentially otherwise; connection failures get their
    /// own budget. Whatever response survives the budget is returned
    /// as-is for the caller to interpret.
    async fn send_with_retry(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let policy = self.config.retry;
        let mut connect_left = policy.connect;
        let mut status_left = policy.status;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.get(url).query(query).send().await {
                Ok(response) => {
                    let code = response.status();
                    let retryable = matches!(code.as_u16(), 403 | 429 | 500 | 502 | 503 | 504);
                    if !retryable || status_left == 0 || attempt >= policy.total {
                        return Ok(response);
                    }
                    status_left -= 1;
                    let wait = retry_after_secs(&response).unwrap_or_else(|| policy.backoff(attempt));
                    warn!(
                        status = %code,
                        attempt,
                        wait_secs = wait,
                        "retryable status, backing off"
                    );
                    self.sleep(wait).await?;
                }
                Err(e) if (e.is_connect() || e.is_timeout())
                    && connect_left > 0
                    && attempt < policy.total =>
                {
                    connect_left -= 1;
                    let wait = policy.backoff(attempt);
                    warn!(error = %e, attempt, wait_secs = wait, "connection failed, backing off");
                    self.sleep(wait).await?;
                }
                Err(e) => return Err(Error::Connection(e.to_string())),
            }
        }
    }

    /// Sleep in small steps so a cancellation request is noticed
    /// mid-wait, not only between sub-queries.
    async fn sleep(&self, secs: f64) -> Result<()> {
        let deadline = tokio::time::Instant::now() + StdDuration::from_secs_f64(secs.max(0.0));
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep(SLEEP_STEP.min(deadline - now)).await;
        }
    }
}

impl QueryIssuer for GithubIssuer {
    async fn issue(&mut self, name: &str, query: &str) -> Result<Issued> {
        debug!(query = %name, "getting results amount");
        if !self.check_length(name, query)? {
            debug!(query = %name, "sub-query discarded");
            return Ok(Issued::Discarded);
        }

        let jitter = triangular_delay(
            &mut self.rng,
            self.delay,
            self.delay * self.config.waiting_factor as f64,
        );
        debug!(query = %name, seconds = format!("{jitter:.2}"), "delaying");
        self.sleep(jitter).await?;

        let mut rate = self.search_rate().await?;
        while rate.remaining == 0 {
            let wait = (rate.reset - rate.server_date).num_seconds().max(1) as f64;
            debug!(query = %name, seconds = wait, "rate limit reached, waiting for reset");
            self.sleep(wait).await?;
            rate = self.search_rate().await?;
        }

        debug!(query = %name, "issuing");
        let url = format!("{}/search/{}", self.config.base_url, self.config.kind.segment());
        // per_page=1 forces the backend to materialize the first item,
        // and with it the real total count.
        let response = self
            .send_with_retry(&url, &[("q", query), ("per_page", "1")])
            .await?;
        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => Err(Error::Auth("the server rejected the token".into())),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let message = response.text().await.unwrap_or_default();
                if self.config.admit_incomplete {
                    warn!(query = %name, %message, "server rejected sub-query");
                    Ok(Issued::Discarded)
                } else {
                    Err(Error::Query {
                        name: name.to_string(),
                        message,
                    })
                }
            }
            s if !s.is_success() => Err(Error::Connection(format!(
                "search request failed with status {s}"
            ))),
            _ => {
                let payload: SearchResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::Connection(format!("malformed search response: {e}")))?;
                if payload.incomplete_results {
                    debug!(query = %name, "server reported incomplete results");
                }
                debug!(
                    query = %name,
                    total = payload.total_count,
                    materialized = !payload.items.is_empty(),
                    "results amount received"
                );
                Ok(Issued::Count(payload.total_count))
            }
        }
    }

    fn check_length(&self, name: &str, query: &str) -> Result<bool> {
        let length = query.chars().count();
        if length <= self.config.query_max_length {
            return Ok(true);
        }
        if self.config.admit_long_query {
            warn!(
                query = %name,
                length,
                max = self.config.query_max_length,
                "maximum sub-query length exceeded"
            );
            Ok(false)
        } else {
            Err(Error::QueryTooLong {
                name: name.to_string(),
                length,
                max: self.config.query_max_length,
            })
        }
    }

    fn estimated_time(&self, subqueries: u64) -> (Duration, Duration) {
        let min_secs = subqueries as f64 * self.delay;
        let max_secs = min_secs * self.config.waiting_factor as f64;
        (
            Duration::milliseconds((min_secs * 1000.0) as i64),
            Duration::milliseconds((max_secs * 1000.0) as i64),
        )
    }

    async fn server_now(&mut self) -> Result<DateTime<Utc>> {
        debug!("getting server current datetime");
        Ok(self.search_rate().await?.server_date)
    }

    fn reseed(&mut self, seed: Option<u64>) {
        self.rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
    }
}

fn header_date(response: &reqwest::Response) -> Option<DateTime<Utc>> {
    let raw = response.headers().get(DATE)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn retry_after_secs(response: &reqwest::Response) -> Option<f64> {
    let raw = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<f64>().ok()
}
