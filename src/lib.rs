//! # Cloud Cost Pipeline
//!
//! Billing transformation and analytics for monthly cloud billing data.
//!
//! ## Core Concepts
//!
//! - **Business rules**: administrator-defined rewrites of billing attribution
//!   (project renames, service moves, cost distribution) applied in id order,
//!   each optionally limited to a date window
//! - **Anomalies**: months where a project's cost jumps well above its trailing
//!   six-month baseline, recorded once per project and month
//! - **Forecasts**: a linear trend over the last twelve monthly totals,
//!   projected three months ahead and summed across projects
//!
//! Storage is abstracted behind the traits in [`store`]; in-memory
//! implementations are provided.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cloud_cost_pipeline::*;
//!
//! let rules = InMemoryRuleRepository::new(rule_definitions);
//! let billing = InMemoryBillingStore::new(projects, records);
//! let anomalies = InMemoryAnomalyStore::new();
//!
//! let pipeline = CostPipeline::new(&rules, &billing, &anomalies);
//!
//! let report = pipeline.transformed_records(&RecordFilter {
//!     platform: Some("gcp".to_string()),
//!     year: Some(2025),
//!     ..Default::default()
//! })?;
//! let scan = pipeline.detect_anomalies(2025, Month::Mar, "gcp")?;
//! let outlook = pipeline.forecast_all(2025)?;
//! ```

pub mod anomaly;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod rules;
pub mod schema;
pub mod store;

pub use anomaly::{AnomalyDetector, Baseline, DetectionReport};
pub use calendar::{BillingPeriod, Month};
pub use config::{DetectorConfig, ForecastConfig, PipelineConfig};
pub use engine::{apply_rules, total_cost, RuleEngine};
pub use error::{CostPipelineError, Result};
pub use forecast::{Forecaster, LinearTrend, PortfolioForecast, ProjectForecastReport};
pub use rules::{load_rules, DateWindow, Rule, RuleDefinition, RuleKind};
pub use schema::*;
pub use store::{
    AnomalyStore, BillingStore, InMemoryAnomalyStore, InMemoryBillingStore,
    InMemoryRuleRepository, RuleRepository,
};

use log::{debug, info};
use std::collections::HashMap;

/// Wires the stores to the rule engine, the anomaly detector and the forecaster.
pub struct CostPipeline<'a> {
    rules: &'a dyn RuleRepository,
    billing: &'a dyn BillingStore,
    anomalies: &'a dyn AnomalyStore,
    config: PipelineConfig,
}

impl<'a> CostPipeline<'a> {
    pub fn new(
        rules: &'a dyn RuleRepository,
        billing: &'a dyn BillingStore,
        anomalies: &'a dyn AnomalyStore,
    ) -> Self {
        Self {
            rules,
            billing,
            anomalies,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(
        rules: &'a dyn RuleRepository,
        billing: &'a dyn BillingStore,
        anomalies: &'a dyn AnomalyStore,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            rules,
            billing,
            anomalies,
            config,
        })
    }

    /// Reads matching records and applies the active rules for the filter's
    /// platform. Distributed records get their project id resolved by name.
    pub fn transformed_records(&self, filter: &RecordFilter) -> Result<Vec<BillingRecord>> {
        let records = self.billing.query_records(filter)?;
        let definitions = self.rules.list_active_rules(filter.platform.as_deref())?;
        let rules = load_rules(&definitions);

        info!(
            "Transforming {} billing records with {} active rules",
            records.len(),
            rules.len()
        );

        let directory: HashMap<String, u64> = self
            .billing
            .list_projects()?
            .into_iter()
            .map(|p| (p.project_name, p.id))
            .collect();
        debug!("Project directory holds {} entries", directory.len());

        Ok(RuleEngine::with_project_directory(directory).apply_rules(&records, &rules))
    }

    pub fn detect_anomalies(
        &self,
        year: i32,
        month: Month,
        platform: &str,
    ) -> Result<DetectionReport> {
        AnomalyDetector::with_config(self.billing, self.anomalies, self.config.detector.clone())
            .detect_anomalies(year, month, platform)
    }

    pub fn acknowledge_anomaly(&self, anomaly_id: u64) -> Result<()> {
        self.anomalies.acknowledge(anomaly_id)?;
        self.anomalies.commit()
    }

    pub fn unacknowledged_anomalies(&self, platform: &str) -> Result<Vec<Anomaly>> {
        self.anomalies.list_unacknowledged(platform)
    }

    pub fn forecast(&self, project_id: u64) -> Result<Option<Vec<ForecastPoint>>> {
        self.forecaster().forecast(project_id)
    }

    pub fn project_forecast_report(&self, project_id: u64) -> Result<ProjectForecastReport> {
        self.forecaster().project_report(project_id)
    }

    pub fn forecast_all(&self, year: i32) -> Result<PortfolioForecast> {
        self.forecaster().forecast_all(year)
    }

    fn forecaster(&self) -> Forecaster<'a> {
        Forecaster::with_config(self.billing, self.config.forecast.clone())
    }
}
