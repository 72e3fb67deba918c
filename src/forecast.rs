//! Rolling cost forecast.
//!
//! The forecast is the trailing week's average daily spend projected flat
//! over the next 90 days. It is rebuilt from scratch every run: compute the
//! new set, delete the org's previous forecast, write the new one. The trailing
//! total is fetched before anything is deleted, so a failed fetch leaves the
//! old forecast in place.

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use crate::billing::BillingClient;
use crate::documents::ForecastDocument;
use crate::store::{BulkReport, BulkSink};
use crate::Result;

/// Days of actuals averaged, ending yesterday.
pub const TRAILING_DAYS: u32 = 7;
/// Days projected, starting tomorrow.
pub const FORECAST_DAYS: u32 = 90;

#[derive(Debug, Clone)]
pub struct ForecastOutcome {
    pub daily_average: Decimal,
    pub deleted: u64,
    pub written: BulkReport,
}

/// `(first, last)` day of the trailing window, both inclusive.
pub fn trailing_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = today
        .checked_sub_days(Days::new(u64::from(TRAILING_DAYS)))
        .unwrap_or(NaiveDate::MIN);
    let last = today.checked_sub_days(Days::new(1)).unwrap_or(NaiveDate::MIN);
    (first, last)
}

pub fn daily_average(total: Decimal) -> Decimal {
    total / Decimal::from(TRAILING_DAYS)
}

/// One document per day from `today + 1` through `today + FORECAST_DAYS`.
pub fn forecast_documents(org_id: &str, today: NaiveDate, daily: Decimal) -> Vec<ForecastDocument> {
    (1..=u64::from(FORECAST_DAYS))
        .filter_map(|ahead| today.checked_add_days(Days::new(ahead)))
        .map(|day| ForecastDocument::new(day, org_id, daily))
        .collect()
}

/// Matches this org's forecast documents and nothing else.
pub fn forecast_query(org_id: &str) -> Value {
    json!({
        "bool": {
            "filter": [
                {"term": {"organization.id": org_id}},
                {"term": {"organization.forecast": true}}
            ]
        }
    })
}

#[derive(Clone)]
pub struct ForecastEngine {
    billing: BillingClient,
    sink: BulkSink,
}

impl ForecastEngine {
    pub fn new(billing: BillingClient, sink: BulkSink) -> Self {
        Self { billing, sink }
    }

    pub async fn recompute(&self, org_id: &str, today: NaiveDate) -> Result<ForecastOutcome> {
        let (first, last) = trailing_window(today);
        tracing::debug!(org = org_id, %first, %last, "Getting average daily costs");
        let total = self.billing.total_cost(org_id, first, last).await?;

        let daily = daily_average(total);
        let documents = forecast_documents(org_id, today, daily);
        tracing::debug!(org = org_id, %daily, documents = documents.len(), "Computed forecast");

        let deleted = self
            .sink
            .store()
            .delete_by_query(forecast_query(org_id))
            .await?;
        tracing::debug!(org = org_id, deleted, "Deleted previous forecast documents");

        let written = self.sink.ingest(&documents).await;
        Ok(ForecastOutcome {
            daily_average: daily,
            deleted,
            written,
        })
    }
}
