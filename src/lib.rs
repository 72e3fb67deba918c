//! # cloud-usage
//!
//! Harvests per-organization cloud billing data from the billing API and
//! materializes it as time-series documents in a search store.
//!
//! Every document carries a deterministic id derived from its semantic key
//! (day, organization, deployment, document class), so repeated runs upsert
//! instead of duplicating. Each run also regenerates a 90-day cost forecast
//! from the trailing week of actual spend.
//!
//! ```rust,no_run
//! use cloud_usage::{Config, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cloud_usage::Error> {
//!     let config = Config::load("config.toml")?;
//!     let pipeline = Pipeline::connect(config, false).await?;
//!     let summary = pipeline.run().await?;
//!     println!("{} organizations processed", summary.organizations.len());
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod billing;
pub mod config;
pub mod documents;
pub mod forecast;
pub mod harvest;
pub mod key;
pub mod normalize;
pub mod pipeline;
pub mod store;

pub use billing::{BillingClient, Fetched, OrgLookup, RetryPolicy, RetryingFetcher};
pub use config::{Config, ConfigError, CustomerConfig, HarvestSettings, LedgerEntry, System};
pub use documents::{
    CreditDocument, Document, ForecastDocument, OrgIdentity, OverageDocument, UsageDocument,
};
pub use forecast::{FORECAST_DAYS, ForecastEngine, ForecastOutcome, TRAILING_DAYS};
pub use harvest::{AdmissionGate, DayFailure, HarvestReport, Harvester, lookback_window};
pub use key::DocumentKey;
pub use normalize::{NormalizeError, normalize};
pub use pipeline::{OrgSummary, Pipeline, RunSummary};
pub use store::{BulkFailure, BulkReport, BulkSink, StoreAuth, StoreClient};

/// Error type for cloud-usage operations.
///
/// Every variant names the request or operation it came from so that a gap in
/// the billing data can be traced back to an org, day or deployment.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Billing API answered with a non-success status.
    #[error("API error (HTTP {status}) from {url}")]
    Api { url: String, status: u16 },

    /// Network connectivity or request failed.
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A successful response did not have the expected shape.
    #[error("Unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// A capped retry policy ran out of attempts.
    #[error("Gave up on {url} after {attempts} attempts (last failure: {last_failure})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_failure: String,
    },

    /// Destination store rejected or failed an operation.
    #[error("Store {operation} failed{}: {message}", match status {
        Some(s) => format!(" (HTTP {s})"),
        None => String::new(),
    })]
    Store {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A harvest task ended without producing a result.
    #[error("Harvest task failed for {day}: {message}")]
    Task {
        day: chrono::NaiveDate,
        message: String,
    },
}

impl Error {
    pub(crate) fn store(
        operation: &'static str,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Error::Store {
            operation,
            status,
            message: message.into(),
        }
    }

    /// Whether the failure came from the destination store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store { .. })
    }

    /// Whether the failure is fatal for the whole run rather than one org.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_)) || self.is_store_error()
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Store { status, .. } => *status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = Error::RetriesExhausted {
            url: "https://billing/charts".into(),
            attempts: 4,
            last_failure: "HTTP 503".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("HTTP 503"));
    }

    #[test]
    fn test_store_error_display() {
        let err = Error::store("bulk", Some(429), "too many requests");
        assert_eq!(
            err.to_string(),
            "Store bulk failed (HTTP 429): too many requests"
        );
        assert!(err.is_store_error());
        assert_eq!(err.status_code(), Some(429));

        let err = Error::store("ping", None, "connection refused");
        assert_eq!(err.to_string(), "Store ping failed: connection refused");
    }

    #[test]
    fn test_fatal_classification() {
        let config_err: Error = config::ConfigError::InvalidValue {
            key: "output.index".into(),
            message: "must not be empty".into(),
        }
        .into();
        assert!(config_err.is_fatal());

        let api = Error::Api {
            url: "u".into(),
            status: 500,
        };
        assert!(!api.is_fatal());
        assert_eq!(api.status_code(), Some(500));
    }
}
