//! One run over every configured organization.
//!
//! Per organization: resolve its name, harvest the lookback window, upsert
//! the usage documents, write purchases and overages, then rebuild the
//! forecast. A problem with one organization never stops the next; only
//! store connectivity and configuration errors end the run.

use chrono::{Local, NaiveDate};

use crate::billing::{BillingClient, OrgLookup};
use crate::config::{Config, CustomerConfig, LOOKBACK_WARN_DAYS, LedgerEntry};
use crate::documents::{CreditDocument, OrgIdentity, OverageDocument};
use crate::forecast::{ForecastEngine, ForecastOutcome};
use crate::harvest::{AdmissionGate, DayFailure, Harvester, lookback_window};
use crate::store::{BulkReport, BulkSink, StoreClient};
use crate::Result;

#[derive(Debug)]
pub struct OrgSummary {
    pub org: OrgIdentity,
    pub usage: BulkReport,
    pub failed_days: Vec<DayFailure>,
    /// Purchases and overages.
    pub ledger: BulkReport,
    /// `None` when the forecast could not be rebuilt this run.
    pub forecast: Option<ForecastOutcome>,
}

impl OrgSummary {
    pub fn is_clean(&self) -> bool {
        self.usage.is_clean()
            && self.failed_days.is_empty()
            && self.ledger.is_clean()
            && self.forecast.as_ref().is_some_and(|f| f.written.is_clean())
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub organizations: Vec<OrgSummary>,
    /// Org ids the billing API did not recognize.
    pub skipped: Vec<String>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.organizations.iter().all(OrgSummary::is_clean)
    }
}

pub struct Pipeline {
    config: Config,
    store: StoreClient,
    gate: AdmissionGate,
}

impl Pipeline {
    /// Connect to the store and make sure the index exists.
    ///
    /// With `reset` the index is dropped and recreated first.
    pub async fn connect(config: Config, reset: bool) -> Result<Self> {
        let endpoint = config.store_endpoint()?;
        let auth = config.store_auth()?;
        let store = StoreClient::new(endpoint, &auth, config.output.index.clone())?;
        store.ping().await?;
        store.prepare_index(reset).await?;
        Ok(Self::from_parts(config, store))
    }

    /// Build from an already prepared store connection.
    pub fn from_parts(config: Config, store: StoreClient) -> Self {
        let gate = AdmissionGate::new(config.harvest.concurrency);
        Self {
            config,
            store,
            gate,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub async fn run(&self) -> Result<RunSummary> {
        self.run_for(Local::now().date_naive()).await
    }

    /// Run as if the current date were `today`.
    pub async fn run_for(&self, today: NaiveDate) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for customer in &self.config.customers {
            tracing::info!(org = %customer.org_id, "Processing organization");
            match self.run_org(customer, today).await? {
                Some(org_summary) => summary.organizations.push(org_summary),
                None => summary.skipped.push(customer.org_id.clone()),
            }
        }

        tracing::info!(
            organizations = summary.organizations.len(),
            skipped = summary.skipped.len(),
            clean = summary.is_clean(),
            "Run finished"
        );
        Ok(summary)
    }

    async fn run_org(
        &self,
        customer: &CustomerConfig,
        today: NaiveDate,
    ) -> Result<Option<OrgSummary>> {
        let api_key = self.config.api_key_for(customer.system)?;
        let billing =
            BillingClient::new(customer.billing_url(), api_key, self.config.retry_policy())?;
        let sink = BulkSink::new(self.store.clone())
            .with_chunk_size(self.config.harvest.bulk_chunk_size);

        let name = match billing.lookup_org(&customer.org_id).await {
            OrgLookup::Found(name) => Some(name),
            OrgLookup::NotFound { status } => {
                tracing::error!(
                    org = %customer.org_id,
                    system = %customer.system,
                    status,
                    "Organization not found, skipping"
                );
                return Ok(None);
            }
            OrgLookup::Unreachable(_) => None,
        };
        let org = OrgIdentity::new(customer.org_id.clone(), name);
        tracing::debug!(
            org = %org.id,
            system = %customer.system,
            name = ?org.name,
            "Resolved organization"
        );

        if customer.lookback >= LOOKBACK_WARN_DAYS {
            tracing::warn!(
                org = %org.id,
                lookback = customer.lookback,
                "Lookback is high, APIs may reject due to too many requests"
            );
        }

        let harvester = Harvester::new(billing.clone(), self.gate.clone());
        let harvest = harvester
            .harvest(&org, lookback_window(today, customer.lookback))
            .await;
        let usage = sink.ingest(&harvest.documents).await;
        tracing::info!(
            org = %org.id,
            written = usage.succeeded,
            failed = usage.failed.len(),
            failed_days = harvest.failed_days.len(),
            "Usage documents ingested"
        );

        let ledger = write_ledger(&sink, &org.id, &customer.purchases, &customer.overages).await;

        tracing::info!(org = %org.id, "Calculating consumption forecast");
        let forecast = match ForecastEngine::new(billing, sink).recompute(&org.id, today).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(org = %org.id, error = %e, "Forecast not updated");
                None
            }
        };

        Ok(Some(OrgSummary {
            org,
            usage,
            failed_days: harvest.failed_days,
            ledger,
            forecast,
        }))
    }
}

async fn write_ledger(
    sink: &BulkSink,
    org_id: &str,
    purchases: &[LedgerEntry],
    overages: &[LedgerEntry],
) -> BulkReport {
    let mut report = BulkReport::default();

    if !purchases.is_empty() {
        tracing::info!(org = org_id, count = purchases.len(), "Adding purchases");
    }
    for entry in purchases {
        report.merge(
            sink.write_one(&CreditDocument::new(entry.date, org_id, entry.ecu))
                .await,
        );
    }

    if !overages.is_empty() {
        tracing::info!(org = org_id, count = overages.len(), "Adding overage charges");
    }
    for entry in overages {
        report.merge(
            sink.write_one(&OverageDocument::new(entry.date, org_id, entry.ecu))
                .await,
        );
    }

    report
}
