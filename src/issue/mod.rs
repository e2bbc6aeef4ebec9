//! Query issuing against the remote search backend.
//!
//! The issuer owns everything the engine should not care about: rate
//! budget arithmetic, jittered delays, transport retries, the length
//! policy and the server clock. The engine sees only [`QueryIssuer`].

pub mod github;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::error::Result;

pub use github::{GithubConfig, GithubIssuer, SearchKind};

/// Outcome of one sub-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issued {
    /// The server's total count for the sub-query.
    Count(u64),
    /// The sub-query was rejected or skipped and contributes nothing;
    /// only tolerated in approximate mode or under the long-query
    /// waiver.
    Discarded,
}

#[allow(async_fn_in_trait)]
pub trait QueryIssuer {
    /// Issue one rendered sub-query. `name` identifies it in logs.
    /// Fatal failures (authentication, exhausted transport) surface as
    /// errors; tolerated per-sub-query failures as [`Issued::Discarded`].
    async fn issue(&mut self, name: &str, query: &str) -> Result<Issued>;

    /// Whether `query` fits the server's length cap. `Ok(false)` means
    /// skip-with-warning; the strict policy errors instead.
    fn check_length(&self, name: &str, query: &str) -> Result<bool>;

    /// (min, max) wall-clock estimate for issuing `subqueries` requests.
    fn estimated_time(&self, subqueries: u64) -> (Duration, Duration);

    /// The server's current time, for run statistics.
    async fn server_now(&mut self) -> Result<DateTime<Utc>>;

    /// Reseed the delay jitter; `None` draws from entropy.
    fn reseed(&mut self, seed: Option<u64>);
}

/// Transport retry knobs, applied around every request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Ceiling on attempts per request, whatever the failure kind.
    pub total: u32,
    /// Budget for connection-level failures (refused, timeout).
    pub connect: u32,
    /// Budget for retryable statuses (403/429/5xx).
    pub status: u32,
    pub backoff_factor: f64,
    /// Cap in seconds on a single back-off sleep.
    pub backoff_max: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            total: 10,
            connect: 10,
            status: 10,
            backoff_factor: 6.0,
            backoff_max: 600.0,
        }
    }
}

impl RetryPolicy {
    /// Exponential back-off for the given 1-based attempt, capped.
    pub(crate) fn backoff(&self, attempt: u32) -> f64 {
        let exp = 2f64.powi(attempt.saturating_sub(1) as i32);
        (self.backoff_factor * exp).min(self.backoff_max)
    }
}

/// Sample a triangular distribution on `[low, high]` with mode `low`.
/// Used to jitter the inter-request delay so bursts do not line up
/// with the server's rate window.
pub(crate) fn triangular_delay(rng: &mut impl Rng, low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    // Inverse-CDF sampling; with the mode at `low` only the upper
    // branch applies.
    let u: f64 = rng.gen();
    high - ((1.0 - u) * (high - low) * (high - low)).sqrt()
}
