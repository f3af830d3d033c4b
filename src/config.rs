use crate::error::{CostPipelineError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Upper bound for every month-count setting: ten years of billing.
pub const MAX_MONTHS: u32 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DetectorConfig {
    #[schemars(description = "How many calendar months before the target month form the baseline.")]
    pub lookback_months: u32,

    #[schemars(description = "Minimum months with recorded cost needed before a verdict is given.")]
    pub min_history_points: usize,

    #[schemars(description = "Standard deviations above the mean that mark a month as anomalous.")]
    pub sigma_multiplier: f64,

    #[schemars(
        description = "Minimum absolute increase over the mean, in currency units. Suppresses noise on small accounts."
    )]
    pub min_absolute_increase: f64,

    #[schemars(
        description = "Fraction of the mean used as the standard deviation when the history has no variance."
    )]
    pub flat_history_stddev_ratio: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            lookback_months: 6,
            min_history_points: 3,
            sigma_multiplier: 2.0,
            min_absolute_increase: 50.0,
            flat_history_stddev_ratio: 0.1,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        validate_month_count("lookback_months", self.lookback_months as usize)?;
        // Sample standard deviation needs two points.
        if self.min_history_points < 2 || self.min_history_points > self.lookback_months as usize {
            return Err(CostPipelineError::InvalidConfig(format!(
                "min_history_points {} must be between 2 and lookback_months ({})",
                self.min_history_points, self.lookback_months
            )));
        }
        validate_non_negative("sigma_multiplier", self.sigma_multiplier)?;
        validate_non_negative("min_absolute_increase", self.min_absolute_increase)?;
        validate_non_negative("flat_history_stddev_ratio", self.flat_history_stddev_ratio)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ForecastConfig {
    #[schemars(description = "Most recent monthly totals used to fit the trend.")]
    pub history_limit: usize,

    #[schemars(description = "Minimum monthly totals required to produce a forecast.")]
    pub min_points: usize,

    #[schemars(description = "Number of future months to project.")]
    pub horizon: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            history_limit: 12,
            min_points: 3,
            horizon: 3,
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_points < 2 {
            return Err(CostPipelineError::InvalidConfig(format!(
                "min_points {} must be at least 2 to fit a line",
                self.min_points
            )));
        }
        validate_month_count("history_limit", self.history_limit)?;
        if self.history_limit < self.min_points {
            return Err(CostPipelineError::InvalidConfig(format!(
                "history_limit {} is below min_points {}",
                self.history_limit, self.min_points
            )));
        }
        validate_month_count("horizon", self.horizon as usize)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub forecast: ForecastConfig,
}

impl PipelineConfig {
    /// Parses and validates a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.forecast.validate()
    }
}

fn validate_month_count(name: &str, value: usize) -> Result<()> {
    if value == 0 || value > MAX_MONTHS as usize {
        return Err(CostPipelineError::InvalidConfig(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_MONTHS, value
        )));
    }
    Ok(())
}

fn validate_non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(CostPipelineError::InvalidConfig(format!(
            "{} must be a non-negative number, got {}",
            name, value
        )));
    }
    Ok(())
}
