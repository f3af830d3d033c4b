use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CostPipelineError {
    #[error("Invalid billing month token: {0}")]
    InvalidMonth(String),

    #[error("Rule {rule_id} has unknown rule type '{rule_type}'")]
    InvalidRuleType { rule_id: u64, rule_type: String },

    #[error("Rule {rule_id} has an invalid config: {details}")]
    InvalidRuleConfig { rule_id: u64, details: String },

    #[error("Rule {rule_id} ends on {end} before it starts on {start}")]
    InvalidDateWindow {
        rule_id: u64,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("Billing period out of range: {0}")]
    PeriodOutOfRange(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Anomaly {0} not found")]
    AnomalyNotFound(u64),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CostPipelineError>;
