//! Billing API response types.

use rust_decimal::Decimal;
use serde::Deserialize;

/// `GET /billing/costs/{org}/charts` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartsResponse {
    #[serde(default)]
    pub data: Vec<ChartSeries>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartSeries {
    #[serde(default)]
    pub values: Vec<DeploymentSummary>,
}

/// A deployment that had usage on the charted day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeploymentSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl ChartsResponse {
    /// Deployments from the first series; a single-day chart has exactly one.
    pub fn into_deployments(self) -> Vec<DeploymentSummary> {
        self.data
            .into_iter()
            .next()
            .map(|series| series.values)
            .unwrap_or_default()
    }
}

/// `GET /billing/costs/{org}` response, reduced to the total.
#[derive(Debug, Clone, Deserialize)]
pub struct CostsResponse {
    pub costs: CostTotals,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostTotals {
    pub total: Decimal,
}

/// `GET /organizations/{org}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_charts_response_deployments() {
        let charts: ChartsResponse = serde_json::from_value(json!({
            "data": [{
                "timestamp": 1715904000,
                "values": [
                    {"id": "a1", "name": "prod", "value": 12.5},
                    {"id": "b2", "name": "staging", "value": 1.0}
                ]
            }]
        }))
        .unwrap();

        let deployments = charts.into_deployments();
        assert_eq!(deployments.len(), 2);
        assert_eq!(deployments[0].id, "a1");
        assert_eq!(deployments[1].name, "staging");
    }

    #[test]
    fn test_empty_chart_has_no_deployments() {
        let charts: ChartsResponse = serde_json::from_value(json!({"data": []})).unwrap();
        assert!(charts.into_deployments().is_empty());

        let charts: ChartsResponse = serde_json::from_value(json!({})).unwrap();
        assert!(charts.into_deployments().is_empty());
    }

    #[test]
    fn test_costs_total_accepts_float() {
        let costs: CostsResponse =
            serde_json::from_value(json!({"costs": {"total": 700.0, "dimensions": []}})).unwrap();
        assert_eq!(costs.costs.total, dec!(700));
    }
}
