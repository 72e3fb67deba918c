//! Deterministic document identity.
//!
//! An id is the MD5 digest of the key parts concatenated in order, rendered as
//! a hyphenated UUID. The same parts always produce the same id, which is what
//! lets the store upsert instead of duplicate on re-runs.

use std::fmt;

use chrono::NaiveDate;
use md5::{Digest, Md5};
use serde::Serialize;
use uuid::Uuid;

use crate::documents::DAY_FORMAT;

const PURCHASE_SUFFIX: &str = "purchase";
const OVERAGE_SUFFIX: &str = "overage";
const FORECAST_SUFFIX: &str = "forecast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DocumentKey(Uuid);

impl DocumentKey {
    /// Derive an id from ordered key parts.
    ///
    /// Parts are joined without a separator, so `["a", "bc"]` and `["ab", "c"]`
    /// collide. Callers keep the part order fixed per document class.
    pub fn derive<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = Md5::new();
        for part in parts {
            hasher.update(part.as_ref().as_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest);
        Self(Uuid::from_bytes(bytes))
    }

    /// Usage record for one deployment on one day.
    pub fn usage(day: NaiveDate, deployment_id: &str) -> Self {
        Self::derive([format_day(day).as_str(), deployment_id])
    }

    pub fn credit(day: NaiveDate, org_id: &str) -> Self {
        Self::derive([format_day(day).as_str(), org_id, PURCHASE_SUFFIX])
    }

    pub fn overage(day: NaiveDate, org_id: &str) -> Self {
        Self::derive([format_day(day).as_str(), org_id, OVERAGE_SUFFIX])
    }

    pub fn forecast(day: NaiveDate, org_id: &str) -> Self {
        Self::derive([format_day(day).as_str(), org_id, FORECAST_SUFFIX])
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_derive_matches_md5_digest() {
        // md5("") and md5("abc")
        assert_eq!(
            DocumentKey::derive(Vec::<String>::new()).to_string(),
            "d41d8cd9-8f00-b204-e980-0998ecf8427e"
        );
        assert_eq!(
            DocumentKey::derive(["abc"]).to_string(),
            "90015098-3cd2-4fb0-d696-3f7d28e17f72"
        );
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = DocumentKey::usage(day(2024, 3, 1), "dep-1");
        let b = DocumentKey::usage(day(2024, 3, 1), "dep-1");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_derive_concatenates_parts() {
        assert_eq!(DocumentKey::derive(["a", "bc"]), DocumentKey::derive(["abc"]));
        assert_eq!(
            DocumentKey::usage(day(2024, 3, 1), "dep-1"),
            DocumentKey::derive(["2024-03-01dep-1"])
        );
    }

    #[test]
    fn test_derive_is_order_sensitive() {
        assert_ne!(
            DocumentKey::derive(["bc", "a"]),
            DocumentKey::derive(["a", "bc"])
        );
    }

    #[test]
    fn test_document_classes_do_not_collide() {
        let d = day(2024, 3, 1);
        let credit = DocumentKey::credit(d, "org");
        let overage = DocumentKey::overage(d, "org");
        let forecast = DocumentKey::forecast(d, "org");
        assert_ne!(credit, overage);
        assert_ne!(credit, forecast);
        assert_ne!(overage, forecast);
        assert_eq!(credit, DocumentKey::derive(["2024-03-01", "org", "purchase"]));
    }

    #[test]
    fn test_serializes_as_hyphenated_string() {
        let key = DocumentKey::derive(["abc"]);
        assert_eq!(
            serde_json::to_value(key).unwrap(),
            serde_json::json!("90015098-3cd2-4fb0-d696-3f7d28e17f72")
        );
    }
}
