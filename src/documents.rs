//! Documents written to the destination store.
//!
//! Field names are the flat dotted keys the index mapping declares
//! (`organization.id`, `deployment.name`, ...). The id is never part of the
//! body; it travels as the bulk action's `_id`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

use crate::billing::DeploymentSummary;
use crate::key::DocumentKey;

/// Date format used for `@timestamp` and for key derivation.
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// A document that can be upserted by id.
pub trait Document: Serialize + Send + Sync {
    fn id(&self) -> DocumentKey;
}

/// Organization the harvested documents belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgIdentity {
    pub id: String,
    /// Display name, absent when the lookup could not reach the API.
    pub name: Option<String>,
}

impl OrgIdentity {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

fn serialize_day<S: Serializer>(day: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&day.format(DAY_FORMAT))
}

/// One deployment's billing for one day.
#[derive(Debug, Clone, Serialize)]
pub struct UsageDocument {
    #[serde(skip)]
    id: DocumentKey,
    #[serde(rename = "@timestamp", serialize_with = "serialize_day")]
    timestamp: NaiveDate,
    #[serde(rename = "organization.id")]
    org_id: String,
    #[serde(rename = "organization.name", skip_serializing_if = "Option::is_none")]
    org_name: Option<String>,
    #[serde(rename = "deployment.id")]
    deployment_id: String,
    #[serde(rename = "deployment.name")]
    deployment_name: String,
    #[serde(rename = "deployment.items", skip_serializing_if = "Option::is_none")]
    items: Option<serde_json::Value>,
}

impl UsageDocument {
    /// `items` is the normalized cost breakdown, `None` when it could not be fetched.
    pub fn new(
        day: NaiveDate,
        org: &OrgIdentity,
        deployment: &DeploymentSummary,
        items: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: DocumentKey::usage(day, &deployment.id),
            timestamp: day,
            org_id: org.id.clone(),
            org_name: org.name.clone(),
            deployment_id: deployment.id.clone(),
            deployment_name: deployment.name.clone(),
            items,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.timestamp
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn deployment_name(&self) -> &str {
        &self.deployment_name
    }

    pub fn items(&self) -> Option<&serde_json::Value> {
        self.items.as_ref()
    }
}

impl Document for UsageDocument {
    fn id(&self) -> DocumentKey {
        self.id
    }
}

/// Purchased credits recorded on a configured date.
#[derive(Debug, Clone, Serialize)]
pub struct CreditDocument {
    #[serde(skip)]
    id: DocumentKey,
    #[serde(rename = "@timestamp", serialize_with = "serialize_day")]
    timestamp: NaiveDate,
    #[serde(rename = "organization.id")]
    org_id: String,
    #[serde(rename = "organization.credits", with = "rust_decimal::serde::float")]
    credits: Decimal,
}

impl CreditDocument {
    pub fn new(day: NaiveDate, org_id: impl Into<String>, credits: Decimal) -> Self {
        let org_id = org_id.into();
        Self {
            id: DocumentKey::credit(day, &org_id),
            timestamp: day,
            org_id,
            credits,
        }
    }

    pub fn credits(&self) -> Decimal {
        self.credits
    }
}

impl Document for CreditDocument {
    fn id(&self) -> DocumentKey {
        self.id
    }
}

/// Overage charge recorded on a configured date.
#[derive(Debug, Clone, Serialize)]
pub struct OverageDocument {
    #[serde(skip)]
    id: DocumentKey,
    #[serde(rename = "@timestamp", serialize_with = "serialize_day")]
    timestamp: NaiveDate,
    #[serde(rename = "organization.id")]
    org_id: String,
    #[serde(rename = "organization.overage", with = "rust_decimal::serde::float")]
    overage: Decimal,
}

impl OverageDocument {
    pub fn new(day: NaiveDate, org_id: impl Into<String>, overage: Decimal) -> Self {
        let org_id = org_id.into();
        Self {
            id: DocumentKey::overage(day, &org_id),
            timestamp: day,
            org_id,
            overage,
        }
    }

    pub fn overage(&self) -> Decimal {
        self.overage
    }
}

impl Document for OverageDocument {
    fn id(&self) -> DocumentKey {
        self.id
    }
}

/// Projected spend for one future day.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastDocument {
    #[serde(skip)]
    id: DocumentKey,
    #[serde(rename = "@timestamp", serialize_with = "serialize_day")]
    timestamp: NaiveDate,
    #[serde(rename = "organization.id")]
    org_id: String,
    #[serde(rename = "organization.forecast")]
    forecast: bool,
    #[serde(
        rename = "organization.forecast_credits",
        with = "rust_decimal::serde::float"
    )]
    forecast_credits: Decimal,
}

impl ForecastDocument {
    pub fn new(day: NaiveDate, org_id: impl Into<String>, forecast_credits: Decimal) -> Self {
        let org_id = org_id.into();
        Self {
            id: DocumentKey::forecast(day, &org_id),
            timestamp: day,
            org_id,
            forecast: true,
            forecast_credits,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.timestamp
    }

    pub fn forecast_credits(&self) -> Decimal {
        self.forecast_credits
    }
}

impl Document for ForecastDocument {
    fn id(&self) -> DocumentKey {
        self.id
    }
}
