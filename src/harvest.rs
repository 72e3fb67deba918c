//! Bounded-concurrency harvest of daily usage.
//!
//! One task per day in the lookback window. Every task passes through the
//! run-wide [`AdmissionGate`] before touching the network and keeps its slot
//! until the day is done, retries included. Tasks build their documents
//! locally and the harvester merges them as they join.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Days, NaiveDate};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::billing::BillingClient;
use crate::documents::{OrgIdentity, UsageDocument};
use crate::normalize::normalize;
use crate::{Error, Result};

pub const DEFAULT_CONCURRENCY: usize = 30;

#[derive(Debug)]
struct GateInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Run-wide cap on concurrently admitted day-tasks.
///
/// Construct once per run and clone into every harvester; clones share slots.
#[derive(Debug, Clone)]
pub struct AdmissionGate(Arc<GateInner>);

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self(Arc::new(GateInner {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }))
    }

    /// Wait for a free slot. The slot is released when the guard drops.
    pub async fn admit(&self) -> Admission {
        let permit = self
            .0
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("admission gate is never closed");
        let now = self.0.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.0.peak.fetch_max(now, Ordering::AcqRel);
        Admission {
            _permit: permit,
            gate: Arc::clone(&self.0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.0.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.0.in_flight.load(Ordering::Acquire)
    }

    /// Highest number of simultaneously admitted tasks seen so far.
    pub fn peak(&self) -> usize {
        self.0.peak.load(Ordering::Acquire)
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

pub struct Admission {
    _permit: OwnedSemaphorePermit,
    gate: Arc<GateInner>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Days to harvest: yesterday and the `days - 1` before it.
pub fn lookback_window(today: NaiveDate, days: u32) -> BTreeSet<NaiveDate> {
    (1..=u64::from(days))
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .collect()
}

#[derive(Debug)]
pub struct DayFailure {
    pub day: NaiveDate,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct HarvestReport {
    /// Documents in completion order, which varies between runs.
    pub documents: Vec<UsageDocument>,
    pub failed_days: Vec<DayFailure>,
}

impl HarvestReport {
    pub fn is_complete(&self) -> bool {
        self.failed_days.is_empty()
    }
}

#[derive(Clone)]
pub struct Harvester {
    billing: BillingClient,
    gate: AdmissionGate,
}

impl Harvester {
    pub fn new(billing: BillingClient, gate: AdmissionGate) -> Self {
        Self { billing, gate }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Harvest every deployment active on every day in `days`.
    pub async fn harvest(
        &self,
        org: &OrgIdentity,
        days: impl IntoIterator<Item = NaiveDate>,
    ) -> HarvestReport {
        let mut tasks = JoinSet::new();
        let mut pending = BTreeSet::new();

        for day in days {
            if !pending.insert(day) {
                continue;
            }
            let billing = self.billing.clone();
            let gate = self.gate.clone();
            let org = org.clone();
            let span = tracing::debug_span!("harvest_day", org = %org.id, %day);
            tasks.spawn(
                async move {
                    let _admission = gate.admit().await;
                    let result = harvest_day(&billing, &org, day).await;
                    (day, result)
                }
                .instrument(span),
            );
        }

        tracing::debug!(org = %org.id, days = pending.len(), "Spawned day tasks");

        let mut report = HarvestReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((day, Ok(documents))) => {
                    pending.remove(&day);
                    report.documents.extend(documents);
                }
                Ok((day, Err(error))) => {
                    pending.remove(&day);
                    tracing::error!(org = %org.id, %day, error = %error, "Day harvest failed");
                    report.failed_days.push(DayFailure { day, error });
                }
                Err(join_error) => {
                    tracing::error!(org = %org.id, error = %join_error, "Day task panicked");
                }
            }
        }

        // Whatever is still pending belongs to a task that panicked.
        for day in pending {
            report.failed_days.push(DayFailure {
                day,
                error: Error::Task {
                    day,
                    message: "task panicked before returning".into(),
                },
            });
        }

        report
    }
}

async fn harvest_day(
    billing: &BillingClient,
    org: &OrgIdentity,
    day: NaiveDate,
) -> Result<Vec<UsageDocument>> {
    let deployments = billing.daily_charts(&org.id, day).await?.into_deployments();

    let mut documents = Vec::with_capacity(deployments.len());
    for deployment in &deployments {
        let items = billing
            .deployment_items(&org.id, &deployment.id, day)
            .await
            .and_then(|raw| match normalize(raw) {
                Ok(items) => Some(items),
                Err(e) => {
                    tracing::warn!(
                        org = %org.id,
                        deployment = %deployment.id,
                        %day,
                        error = %e,
                        "Item payload not normalizable, omitting items"
                    );
                    None
                }
            });
        documents.push(UsageDocument::new(day, org, deployment, items));
    }

    tracing::debug!(org = %org.id, %day, deployments = documents.len(), "Harvested day");
    Ok(documents)
}
