use crate::calendar::{BillingPeriod, Month};
use crate::config::DetectorConfig;
use crate::error::Result;
use crate::schema::NewAnomaly;
use crate::store::{AnomalyStore, BillingStore};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Mean and spread of a project's trailing monthly totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub stddev: f64,
    /// True when the history had no usable variance and the synthetic floor was used.
    pub used_flat_fallback: bool,
    pub points: usize,
}

impl Baseline {
    /// `None` when the history is shorter than `config.min_history_points`.
    pub fn from_history(history: &[f64], config: &DetectorConfig) -> Option<Self> {
        if history.len() < config.min_history_points || history.is_empty() {
            return None;
        }

        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let stddev = if history.len() > 1 {
            let variance =
                history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt()
        } else {
            f64::NAN
        };

        let (stddev, used_flat_fallback) = if stddev.is_nan() || stddev == 0.0 {
            (mean * config.flat_history_stddev_ratio, true)
        } else {
            (stddev, false)
        };

        Some(Self {
            mean,
            stddev,
            used_flat_fallback,
            points: history.len(),
        })
    }

    pub fn threshold(&self, config: &DetectorConfig) -> f64 {
        self.mean + config.sigma_multiplier * self.stddev
    }

    /// Both the statistical band and the absolute floor must be exceeded.
    pub fn is_anomalous(&self, current: f64, config: &DetectorConfig) -> bool {
        current > self.threshold(config) && (current - self.mean) > config.min_absolute_increase
    }
}

/// Outcome of one detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub period: BillingPeriod,
    pub platform: String,
    pub scanned: usize,
    pub flagged: usize,
    pub inserted: usize,
    pub skipped_insufficient_history: usize,
    pub failed: usize,
}

enum ProjectOutcome {
    InsufficientHistory,
    Normal,
    Flagged { inserted: bool },
}

pub struct AnomalyDetector<'a> {
    billing: &'a dyn BillingStore,
    anomalies: &'a dyn AnomalyStore,
    config: DetectorConfig,
}

impl<'a> AnomalyDetector<'a> {
    pub fn new(billing: &'a dyn BillingStore, anomalies: &'a dyn AnomalyStore) -> Self {
        Self::with_config(billing, anomalies, DetectorConfig::default())
    }

    pub fn with_config(
        billing: &'a dyn BillingStore,
        anomalies: &'a dyn AnomalyStore,
        config: DetectorConfig,
    ) -> Self {
        Self {
            billing,
            anomalies,
            config,
        }
    }

    /// Pure verdict for one project: the baseline if `current` is anomalous.
    pub fn evaluate(&self, current: f64, history: &[f64]) -> Option<Baseline> {
        Baseline::from_history(history, &self.config)
            .filter(|baseline| baseline.is_anomalous(current, &self.config))
    }

    /// Scans every project billed on `platform` in the given month and records
    /// new anomalies.
    ///
    /// An out-of-range period, or a failure to read the month's totals or to
    /// commit, aborts the run. A store failure while handling one project is
    /// logged and counted, and the scan moves on to the next project.
    pub fn detect_anomalies(
        &self,
        year: i32,
        month: Month,
        platform: &str,
    ) -> Result<DetectionReport> {
        self.config.validate()?;
        let period = BillingPeriod::new(year, month);
        let lookback = period.trailing(self.config.lookback_months)?;
        let totals = self.billing.project_totals(period, platform)?;

        let mut report = DetectionReport {
            period,
            platform: platform.to_string(),
            scanned: totals.len(),
            flagged: 0,
            inserted: 0,
            skipped_insufficient_history: 0,
            failed: 0,
        };

        for (project_id, current) in totals {
            match self.check_project(project_id, period, &lookback, current, platform) {
                Ok(ProjectOutcome::InsufficientHistory) => {
                    report.skipped_insufficient_history += 1;
                }
                Ok(ProjectOutcome::Normal) => {}
                Ok(ProjectOutcome::Flagged { inserted }) => {
                    report.flagged += 1;
                    if inserted {
                        report.inserted += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "Anomaly check failed for project {} in {}: {}",
                        project_id, period, e
                    );
                    report.failed += 1;
                }
            }
        }

        self.anomalies.commit()?;

        info!(
            "Anomaly scan for {} on {}: {} projects, {} flagged, {} new",
            period, platform, report.scanned, report.flagged, report.inserted
        );
        Ok(report)
    }

    fn check_project(
        &self,
        project_id: u64,
        period: BillingPeriod,
        lookback: &[BillingPeriod],
        current: f64,
        platform: &str,
    ) -> Result<ProjectOutcome> {
        let history = self.history(project_id, lookback)?;

        let Some(baseline) = Baseline::from_history(&history, &self.config) else {
            debug!(
                "Project {} has {} months of history before {}, skipping",
                project_id,
                history.len(),
                period
            );
            return Ok(ProjectOutcome::InsufficientHistory);
        };

        if !baseline.is_anomalous(current, &self.config) {
            return Ok(ProjectOutcome::Normal);
        }

        debug!(
            "Project {} cost {:.2} in {} exceeds threshold {:.2} (mean {:.2})",
            project_id,
            current,
            period,
            baseline.threshold(&self.config),
            baseline.mean
        );

        let inserted = self.anomalies.insert_if_absent(NewAnomaly {
            project_id,
            billing_year: period.year,
            billing_month: period.month,
            anomalous_cost: current,
            average_cost: baseline.mean,
            platform: platform.to_string(),
        })?;

        Ok(ProjectOutcome::Flagged { inserted })
    }

    /// Trailing monthly totals, most recent first. Months without cost are skipped.
    fn history(&self, project_id: u64, lookback: &[BillingPeriod]) -> Result<Vec<f64>> {
        let mut history = Vec::new();
        for &past in lookback {
            if let Some(total) = self.billing.aggregate_monthly(project_id, past)? {
                history.push(total);
            }
        }
        Ok(history)
    }
}
