use crate::calendar::{BillingPeriod, Month};
use crate::error::Result;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One billing line item as read from the record store.
///
/// `billing_month` is kept as the raw token so that records with an
/// unresolvable month still flow through the rule engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BillingRecord {
    pub id: String,
    pub project_name: String,
    #[serde(default)]
    pub project_id: Option<u64>,
    pub billing_year: i32,
    pub billing_month: String,
    pub platform: String,
    #[serde(default)]
    pub service_description: String,
    #[serde(default)]
    pub sku_description: String,
    #[serde(rename = "type", default)]
    pub record_type: String,
    pub cost: f64,
}

impl BillingRecord {
    pub fn period(&self) -> Result<BillingPeriod> {
        BillingPeriod::parse(self.billing_year, &self.billing_month)
    }
}

/// Project metadata needed by the analytics: the id used by the stores and
/// the name the rule engine matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub id: u64,
    pub project_name: String,
    pub platform: String,
}

/// A persisted cost anomaly finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Anomaly {
    pub id: u64,
    pub project_id: u64,
    pub billing_year: i32,
    pub billing_month: Month,
    pub anomalous_cost: f64,
    pub average_cost: f64,
    #[serde(default)]
    pub is_acknowledged: bool,
    pub timestamp: DateTime<Utc>,
    pub platform: String,
}

impl Anomaly {
    pub fn period(&self) -> BillingPeriod {
        BillingPeriod::new(self.billing_year, self.billing_month)
    }
}

/// An anomaly before the store has assigned it an id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnomaly {
    pub project_id: u64,
    pub billing_year: i32,
    pub billing_month: Month,
    pub anomalous_cost: f64,
    pub average_cost: f64,
    pub platform: String,
}

impl NewAnomaly {
    pub fn period(&self) -> BillingPeriod {
        BillingPeriod::new(self.billing_year, self.billing_month)
    }
}

/// Aggregated cost of one project for one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyTotal {
    pub period: BillingPeriod,
    pub total: f64,
}

/// One projected month. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ForecastPoint {
    pub year: i32,
    pub month_token: Month,
    pub predicted_cost: f64,
}

impl ForecastPoint {
    pub fn period(&self) -> BillingPeriod {
        BillingPeriod::new(self.year, self.month_token)
    }
}

/// Filters for `BillingStore::query_records`. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub platform: Option<String>,
    pub year: Option<i32>,
    pub month: Option<Month>,
    pub project_id: Option<u64>,
}

impl RecordFilter {
    pub fn matches(&self, record: &BillingRecord) -> bool {
        if let Some(platform) = &self.platform {
            if &record.platform != platform {
                return false;
            }
        }
        if let Some(year) = self.year {
            if record.billing_year != year {
                return false;
            }
        }
        if let Some(month) = self.month {
            if record.billing_month != month.token() {
                return false;
            }
        }
        if let Some(project_id) = self.project_id {
            if record.project_id != Some(project_id) {
                return false;
            }
        }
        true
    }
}
