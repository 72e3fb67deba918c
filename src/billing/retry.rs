//! Fixed-delay retry for billing API reads.
//!
//! The default policy never gives up: a non-success response is logged, the
//! task sleeps for the fixed delay and tries again. The sleeping task keeps its
//! admission slot, so a struggling upstream throttles the whole run.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::{Error, Result};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// Total attempts allowed, `None` for unbounded.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none()
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn allows_retry_after(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_made < max)
    }
}

/// A successful read and how many attempts it took.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Value,
    pub attempts: u32,
}

#[derive(Debug)]
enum AttemptFailure {
    Status(StatusCode),
    Transport(reqwest::Error),
    Body(reqwest::Error),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Status(status) => write!(f, "HTTP {}", status.as_u16()),
            AttemptFailure::Transport(e) => write!(f, "transport error: {e}"),
            AttemptFailure::Body(e) => write!(f, "unreadable body: {e}"),
        }
    }
}

/// Issues GET requests with fixed headers until one returns 200.
#[derive(Clone)]
pub struct RetryingFetcher {
    http: reqwest::Client,
    headers: HeaderMap,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(http: reqwest::Client, headers: HeaderMap, policy: RetryPolicy) -> Self {
        Self {
            http,
            headers,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url` as JSON, retrying per policy.
    ///
    /// Only returns an error when the policy has a cap and it is reached.
    pub async fn fetch(&self, url: &str) -> Result<Fetched> {
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let failure = match self.attempt(url).await {
                Ok(body) => return Ok(Fetched { body, attempts }),
                Err(failure) => failure,
            };

            if !self.policy.allows_retry_after(attempts) {
                tracing::warn!(
                    url,
                    attempts,
                    failure = %failure,
                    "API call failed, retry limit reached"
                );
                return Err(Error::RetriesExhausted {
                    url: url.to_string(),
                    attempts,
                    last_failure: failure.to_string(),
                });
            }

            tracing::debug!(
                url,
                attempt = attempts,
                failure = %failure,
                retry_in_secs = self.policy.delay.as_secs_f64(),
                "API call attempt failed, retrying"
            );
            tokio::time::sleep(self.policy.delay).await;
        }
    }

    /// Single GET without retry; the caller decides what a failure means.
    pub async fn get_once(&self, url: &str) -> Result<reqwest::Response> {
        Ok(self
            .http
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?)
    }

    async fn attempt(&self, url: &str) -> std::result::Result<Value, AttemptFailure> {
        let response = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(AttemptFailure::Transport)?;

        if response.status() != StatusCode::OK {
            return Err(AttemptFailure::Status(response.status()));
        }

        response.json::<Value>().await.map_err(AttemptFailure::Body)
    }
}
