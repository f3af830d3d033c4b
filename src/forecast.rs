use crate::calendar::BillingPeriod;
use crate::config::ForecastConfig;
use crate::error::{CostPipelineError, Result};
use crate::schema::{ForecastPoint, MonthlyTotal};
use crate::store::BillingStore;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordinary least squares fit of `value ~ index`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearTrend {
    /// Fits against zero-based positions. Needs at least two values.
    pub fn fit(values: &[f64]) -> Option<Self> {
        if values.len() < 2 {
            return None;
        }

        let n = values.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = values.iter().sum::<f64>() / n;

        let (covariance, variance) = values.iter().enumerate().fold(
            (0.0, 0.0),
            |(cov, var), (i, &y)| {
                let dx = i as f64 - mean_x;
                (cov + dx * (y - mean_y), var + dx * dx)
            },
        );

        let slope = covariance / variance;
        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn predict(&self, index: f64) -> f64 {
        self.intercept + self.slope * index
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectForecastReport {
    pub project_id: u64,
    /// Chronological monthly totals the trend was fitted on.
    pub historical: Vec<MonthlyTotal>,
    /// Empty when there was not enough history.
    pub forecast: Vec<ForecastPoint>,
}

/// Summed forecast across every project that produced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioForecast {
    pub year: i32,
    pub points: Vec<ForecastPoint>,
}

pub struct Forecaster<'a> {
    billing: &'a dyn BillingStore,
    config: ForecastConfig,
}

impl<'a> Forecaster<'a> {
    pub fn new(billing: &'a dyn BillingStore) -> Self {
        Self::with_config(billing, ForecastConfig::default())
    }

    pub fn with_config(billing: &'a dyn BillingStore, config: ForecastConfig) -> Self {
        Self { billing, config }
    }

    /// Projects the next `horizon` months for one project, or `None` with
    /// fewer than `min_points` months of history.
    ///
    /// The regression runs over positions, not calendar months: a gap in the
    /// history shortens the timeline instead of stretching it.
    pub fn forecast(&self, project_id: u64) -> Result<Option<Vec<ForecastPoint>>> {
        let history = self.history(project_id)?;
        self.project(&history)
    }

    pub fn project_report(&self, project_id: u64) -> Result<ProjectForecastReport> {
        let historical = self.history(project_id)?;
        let forecast = self.project(&historical)?.unwrap_or_default();
        Ok(ProjectForecastReport {
            project_id,
            historical,
            forecast,
        })
    }

    /// Sums per-project forecasts by month. Projects without a forecast add
    /// nothing; `year` is echoed back and does not filter the projects.
    pub fn forecast_all(&self, year: i32) -> Result<PortfolioForecast> {
        let projects = self.billing.list_projects()?;

        let mut buckets: BTreeMap<BillingPeriod, f64> = BTreeMap::new();
        let mut contributing = 0usize;
        for project in &projects {
            if let Some(points) = self.forecast(project.id)? {
                contributing += 1;
                for point in points {
                    *buckets.entry(point.period()).or_insert(0.0) += point.predicted_cost;
                }
            }
        }

        info!(
            "Portfolio forecast built from {} of {} projects",
            contributing,
            projects.len()
        );

        Ok(PortfolioForecast {
            year,
            points: buckets
                .into_iter()
                .map(|(period, predicted_cost)| ForecastPoint {
                    year: period.year,
                    month_token: period.month,
                    predicted_cost,
                })
                .collect(),
        })
    }

    fn history(&self, project_id: u64) -> Result<Vec<MonthlyTotal>> {
        self.config.validate()?;
        let mut series = self
            .billing
            .aggregate_monthly_series(project_id, self.config.history_limit)?;
        series.sort_by_key(|t| t.period);
        Ok(series)
    }

    fn project(&self, history: &[MonthlyTotal]) -> Result<Option<Vec<ForecastPoint>>> {
        if history.len() < self.config.min_points {
            debug!(
                "Only {} months of history, need {} to forecast",
                history.len(),
                self.config.min_points
            );
            return Ok(None);
        }

        let values: Vec<f64> = history.iter().map(|t| t.total).collect();
        let (Some(trend), Some(last)) = (LinearTrend::fit(&values), history.last()) else {
            return Ok(None);
        };
        let last_index = (values.len() - 1) as f64;
        let horizon = i32::try_from(self.config.horizon).map_err(|_| {
            CostPipelineError::InvalidConfig(format!("horizon {} is too large", self.config.horizon))
        })?;

        (1..=horizon)
            .map(|step| {
                let period = last.period.add_months(step)?;
                Ok(ForecastPoint {
                    year: period.year,
                    month_token: period.month,
                    predicted_cost: trend.predict(last_index + f64::from(step)).max(0.0),
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}
