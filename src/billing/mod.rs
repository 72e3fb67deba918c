//! Billing API client.
//!
//! Wraps the four billing endpoints the harvest needs. Strictness differs by
//! call site:
//!
//! - daily charts and trailing totals go through [`RetryingFetcher`] and block
//!   until they succeed (or until a configured cap is hit)
//! - per-deployment items are fetched once; a failure drops the breakdown
//! - the org lookup is fetched once and reports what happened as [`OrgLookup`]

mod retry;
mod types;

pub use retry::{DEFAULT_RETRY_DELAY, Fetched, RetryPolicy, RetryingFetcher};
pub use types::{ChartSeries, ChartsResponse, CostTotals, CostsResponse, DeploymentSummary};

use std::time::Duration;

use chrono::NaiveDate;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};

use crate::documents::DAY_FORMAT;
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of looking up an organization's display name.
#[derive(Debug)]
pub enum OrgLookup {
    Found(String),
    /// The API answered but does not know the org.
    NotFound { status: u16 },
    /// The API could not be reached or answered with garbage.
    Unreachable(Error),
}

#[derive(Clone)]
pub struct BillingClient {
    base_url: String,
    fetcher: RetryingFetcher,
}

impl BillingClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: &SecretString,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Self::with_http(http, base_url, api_key, policy)
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: &SecretString,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("ApiKey {}", api_key.expose_secret()))
            .map_err(|_| crate::config::ConfigError::InvalidValue {
                key: "api_keys".into(),
                message: "API key contains characters not allowed in a header".into(),
            })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            fetcher: RetryingFetcher::new(http, headers, policy),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn fetcher(&self) -> &RetryingFetcher {
        &self.fetcher
    }

    /// Deployments with usage on `day`. Retries per policy.
    pub async fn daily_charts(&self, org_id: &str, day: NaiveDate) -> Result<ChartsResponse> {
        let day = day.format(DAY_FORMAT);
        let url = format!(
            "{}/billing/costs/{org_id}/charts?from={day}&to={day}",
            self.base_url
        );
        let fetched = self.fetcher.fetch(&url).await?;
        if fetched.attempts > 1 {
            tracing::debug!(
                org = org_id,
                %day,
                attempts = fetched.attempts,
                "Chart fetch succeeded after retries"
            );
        }
        serde_json::from_value(fetched.body).map_err(|e| Error::Decode {
            url,
            message: e.to_string(),
        })
    }

    /// Raw cost breakdown for one deployment on `day`, `None` on any failure.
    pub async fn deployment_items(
        &self,
        org_id: &str,
        deployment_id: &str,
        day: NaiveDate,
    ) -> Option<serde_json::Value> {
        let day = day.format(DAY_FORMAT);
        let url = format!(
            "{}/billing/costs/{org_id}/deployments/{deployment_id}/items?from={day}&to={day}",
            self.base_url
        );

        let response = match self.fetcher.get_once(&url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    org = org_id,
                    deployment = deployment_id,
                    %day,
                    error = %e,
                    "Item fetch failed, omitting items"
                );
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            tracing::warn!(
                org = org_id,
                deployment = deployment_id,
                %day,
                status = response.status().as_u16(),
                "Item fetch returned non-success, omitting items"
            );
            return None;
        }

        match response.json().await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!(
                    org = org_id,
                    deployment = deployment_id,
                    %day,
                    error = %e,
                    "Item body unreadable, omitting items"
                );
                None
            }
        }
    }

    /// Total cost over `from..=to`. Retries per policy.
    pub async fn total_cost(
        &self,
        org_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Decimal> {
        let url = format!(
            "{}/billing/costs/{org_id}?from={}&to={}",
            self.base_url,
            from.format(DAY_FORMAT),
            to.format(DAY_FORMAT)
        );
        let fetched = self.fetcher.fetch(&url).await?;
        let costs: CostsResponse =
            serde_json::from_value(fetched.body).map_err(|e| Error::Decode {
                url,
                message: e.to_string(),
            })?;
        Ok(costs.costs.total)
    }

    /// Look up an organization's display name. Never retries.
    pub async fn lookup_org(&self, org_id: &str) -> OrgLookup {
        let url = format!("{}/organizations/{org_id}", self.base_url);

        let response = match self.fetcher.get_once(&url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(
                    org = org_id,
                    error = %e,
                    "Failed to reach API when looking up org"
                );
                return OrgLookup::Unreachable(e);
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            tracing::debug!(
                org = org_id,
                base_url = %self.base_url,
                status = status.as_u16(),
                "Org not found"
            );
            return OrgLookup::NotFound {
                status: status.as_u16(),
            };
        }

        match response.json::<types::Organization>().await {
            Ok(org) => OrgLookup::Found(org.name),
            Err(e) => {
                tracing::error!(org = org_id, error = %e, "Org lookup returned an unreadable body");
                OrgLookup::Unreachable(Error::Network(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    fn client(server: &MockServer) -> BillingClient {
        BillingClient::new(
            server.uri(),
            &SecretString::from("secret-key"),
            RetryPolicy::fixed(Duration::from_millis(5)).with_max_attempts(3),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_daily_charts_sends_day_range_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/billing/costs/org1/charts"))
            .and(query_param("from", "2024-05-17"))
            .and(query_param("to", "2024-05-17"))
            .and(header("authorization", "ApiKey secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"values": [{"id": "d1", "name": "prod"}]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let charts = client(&server).daily_charts("org1", day()).await.unwrap();
        let deployments = charts.into_deployments();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].id, "d1");
    }

    #[tokio::test]
    async fn test_daily_charts_undecodable_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/billing/costs/org1/charts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": "nope"})))
            .mount(&server)
            .await;

        let err = client(&server).daily_charts("org1", day()).await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[tokio::test]
    async fn test_deployment_items_failure_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/billing/costs/org1/deployments/d1/items"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        assert!(
            client(&server)
                .deployment_items("org1", "d1", day())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_total_cost() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/billing/costs/org1"))
            .and(query_param("from", "2024-05-10"))
            .and(query_param("to", "2024-05-16"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"costs": {"total": 700}})),
            )
            .mount(&server)
            .await;

        let total = client(&server)
            .total_cost(
                "org1",
                NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
                NaiveDate::from_ymd_opt(2024, 5, 16).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(total, dec!(700));
    }

    #[tokio::test]
    async fn test_lookup_org_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/organizations/known"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "known", "name": "Acme"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/organizations/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.lookup_org("known").await,
            OrgLookup::Found(name) if name == "Acme"
        ));
        assert!(matches!(
            client.lookup_org("missing").await,
            OrgLookup::NotFound { status: 404 }
        ));
    }

    #[tokio::test]
    async fn test_lookup_org_unreachable() {
        // Nothing listens on the discard port.
        let client = BillingClient::new(
            "http://127.0.0.1:9",
            &SecretString::from("k"),
            RetryPolicy::default(),
        )
        .unwrap();
        assert!(matches!(
            client.lookup_org("any").await,
            OrgLookup::Unreachable(Error::Network(_))
        ));
    }
}
