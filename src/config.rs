//! Run configuration.
//!
//! Loaded once from a TOML file, validated as a whole, then handed to the
//! pipeline read-only.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use thiserror::Error;

use crate::billing::{DEFAULT_RETRY_DELAY, RetryPolicy};
use crate::harvest::DEFAULT_CONCURRENCY;
use crate::store::{DEFAULT_CHUNK_SIZE, StoreAuth, endpoint_from_cloud_id};

/// Lookbacks at or above this are likely to hit API rate limits.
pub const LOOKBACK_WARN_DAYS: u32 = 60;

const GOVCLOUD_BASE_URL: &str = "https://admin.us-gov-east-1.aws.elastic-cloud.com/api/v1";
const COMMERCIAL_BASE_URL: &str = "https://adminconsole.found.no/api/v1";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No API key configured for system {0}")]
    MissingApiKey(System),

    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed: ")?;
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Which billing deployment an organization lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    Govcloud,
    Commercial,
}

impl System {
    pub fn base_url(self) -> &'static str {
        match self {
            System::Govcloud => GOVCLOUD_BASE_URL,
            System::Commercial => COMMERCIAL_BASE_URL,
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            System::Govcloud => f.write_str("govcloud"),
            System::Commercial => f.write_str("commercial"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub cloud_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, deserialize_with = "secret")]
    pub pw: Option<SecretString>,
    #[serde(default, deserialize_with = "secret")]
    pub api_key: Option<SecretString>,
    pub index: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeys {
    #[serde(default, deserialize_with = "secret")]
    pub govcloud: Option<SecretString>,
    #[serde(default, deserialize_with = "secret")]
    pub commercial: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestSettings {
    pub concurrency: usize,
    pub retry_delay_secs: u64,
    /// Absent means retry forever.
    pub max_attempts: Option<u32>,
    pub bulk_chunk_size: usize,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_delay_secs: DEFAULT_RETRY_DELAY.as_secs(),
            max_attempts: None,
            bulk_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// A dated credit purchase or overage grant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LedgerEntry {
    #[serde(deserialize_with = "toml_date")]
    pub date: NaiveDate,
    pub ecu: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerConfig {
    #[serde(deserialize_with = "org_id")]
    pub org_id: String,
    pub system: System,
    pub lookback: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, rename = "purchase")]
    pub purchases: Vec<LedgerEntry>,
    #[serde(default, rename = "overage")]
    pub overages: Vec<LedgerEntry>,
}

impl CustomerConfig {
    pub fn billing_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.system.base_url())
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub output: OutputConfig,
    #[serde(default)]
    pub api_keys: ApiKeys,
    #[serde(default)]
    pub harvest: HarvestSettings,
    #[serde(default, rename = "customer")]
    pub customers: Vec<CustomerConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        match (&self.output.cloud_id, &self.output.url) {
            (Some(_), Some(_)) => {
                errors.push(invalid("output", "set only one of cloud_id and url"))
            }
            (None, None) => errors.push(invalid("output", "one of cloud_id or url is required")),
            _ => {}
        }
        if let Some(cloud_id) = &self.output.cloud_id
            && let Err(e) = endpoint_from_cloud_id(cloud_id)
        {
            errors.push(e);
        }
        if self.output.api_key.is_none()
            && (self.output.user.is_none() || self.output.pw.is_none())
        {
            errors.push(invalid("output", "api_key or both user and pw are required"));
        }
        if self.output.index.trim().is_empty() {
            errors.push(invalid("output.index", "must not be empty"));
        }
        if self.harvest.concurrency == 0 {
            errors.push(invalid("harvest.concurrency", "must be at least 1"));
        }
        if self.harvest.bulk_chunk_size == 0 {
            errors.push(invalid("harvest.bulk_chunk_size", "must be at least 1"));
        }
        if self.harvest.max_attempts == Some(0) {
            errors.push(invalid("harvest.max_attempts", "must be at least 1"));
        }

        for customer in &self.customers {
            if customer.lookback == 0 {
                errors.push(invalid(
                    &format!("customer.{}.lookback", customer.org_id),
                    "must be at least 1",
                ));
            }
            if self.api_key_for(customer.system).is_err()
                && !errors
                    .iter()
                    .any(|e| matches!(e, ConfigError::MissingApiKey(s) if *s == customer.system))
            {
                errors.push(ConfigError::MissingApiKey(customer.system));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationErrors(ValidationErrors(errors)))
        }
    }

    pub fn api_key_for(&self, system: System) -> ConfigResult<&SecretString> {
        let key = match system {
            System::Govcloud => self.api_keys.govcloud.as_ref(),
            System::Commercial => self.api_keys.commercial.as_ref(),
        };
        key.ok_or(ConfigError::MissingApiKey(system))
    }

    pub fn store_endpoint(&self) -> ConfigResult<String> {
        match (&self.output.cloud_id, &self.output.url) {
            (Some(cloud_id), _) => endpoint_from_cloud_id(cloud_id),
            (None, Some(url)) => Ok(url.trim_end_matches('/').to_string()),
            (None, None) => Err(invalid("output", "one of cloud_id or url is required")),
        }
    }

    pub fn store_auth(&self) -> ConfigResult<StoreAuth> {
        if let Some(key) = &self.output.api_key {
            return Ok(StoreAuth::ApiKey(key.clone()));
        }
        match (&self.output.user, &self.output.pw) {
            (Some(user), Some(pw)) => Ok(StoreAuth::Basic {
                user: user.clone(),
                password: pw.clone(),
            }),
            _ => Err(invalid("output", "api_key or both user and pw are required")),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(Duration::from_secs(self.harvest.retry_delay_secs));
        match self.harvest.max_attempts {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn toml_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let datetime = toml::value::Datetime::deserialize(deserializer)?;
    let date = datetime
        .date
        .ok_or_else(|| de::Error::custom("expected a date such as 2024-01-31"))?;
    NaiveDate::from_ymd_opt(
        i32::from(date.year),
        u32::from(date.month),
        u32::from(date.day),
    )
    .ok_or_else(|| de::Error::custom(format!("{datetime} is not a calendar date")))
}

/// Org ids are strings upstream but often written as bare integers.
fn org_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrgIdVisitor;

    impl Visitor<'_> for OrgIdVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an organization id as a string or integer")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            if v.trim().is_empty() {
                return Err(E::custom("org_id must not be empty"));
            }
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(OrgIdVisitor)
}
