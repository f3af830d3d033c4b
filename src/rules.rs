use crate::calendar::BillingPeriod;
use crate::error::{CostPipelineError, Result};
use chrono::NaiveDate;
use log::{debug, warn};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const RENAME_PROJECT: &str = "RENAME_PROJECT";
pub const MOVE_SERVICE: &str = "MOVE_SERVICE";
pub const DISTRIBUTE_COST: &str = "DISTRIBUTE_COST";

/// A business rule as stored by the rule repository. The config payload is
/// an untyped JSON blob until `Rule::from_definition` validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rule_type: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub config: serde_json::Value,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub platform: String,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenameProjectConfig {
    #[schemars(description = "Exact project name to match on the billing record.")]
    pub source_project_name: String,
    #[schemars(description = "Project name written to matching records.")]
    pub new_project_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MoveServiceConfig {
    #[schemars(description = "Project the services are currently billed to.")]
    pub from_project: String,
    #[serde(default)]
    #[schemars(description = "Service descriptions to move. An empty list moves nothing.")]
    pub services: Vec<String>,
    #[schemars(description = "Project that receives the moved services.")]
    pub to_project: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DistributeCostConfig {
    #[schemars(description = "Project whose cost is split across the targets.")]
    pub source_project: String,
    #[serde(default)]
    #[schemars(
        description = "Projects receiving an equal share. An empty list drops the source cost entirely."
    )]
    pub target_project_names: Vec<String>,
}

/// The three supported rule kinds with their validated payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "rule_type", content = "config", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleKind {
    RenameProject(RenameProjectConfig),
    MoveService(MoveServiceConfig),
    DistributeCost(DistributeCostConfig),
}

impl RuleKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::RenameProject(_) => RENAME_PROJECT,
            RuleKind::MoveService(_) => MOVE_SERVICE,
            RuleKind::DistributeCost(_) => DISTRIBUTE_COST,
        }
    }

    pub fn config_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RuleKind)
    }

    pub fn config_schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::config_schema())
    }
}

/// Inclusive activation window. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        if let Some(start) = self.start {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if date > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: u64,
    pub name: String,
    pub platform: String,
    pub window: DateWindow,
    pub kind: RuleKind,
}

impl Rule {
    pub fn from_definition(definition: &RuleDefinition) -> Result<Self> {
        let kind = match definition.rule_type.as_str() {
            RENAME_PROJECT => RuleKind::RenameProject(parse_config(definition)?),
            MOVE_SERVICE => RuleKind::MoveService(parse_config(definition)?),
            DISTRIBUTE_COST => RuleKind::DistributeCost(parse_config(definition)?),
            other => {
                return Err(CostPipelineError::InvalidRuleType {
                    rule_id: definition.id,
                    rule_type: other.to_string(),
                })
            }
        };

        if let (Some(start), Some(end)) = (definition.start_date, definition.end_date) {
            if end < start {
                return Err(CostPipelineError::InvalidDateWindow {
                    rule_id: definition.id,
                    start,
                    end,
                });
            }
        }

        Ok(Self {
            id: definition.id,
            name: definition.name.clone(),
            platform: definition.platform.clone(),
            window: DateWindow {
                start: definition.start_date,
                end: definition.end_date,
            },
            kind,
        })
    }

    /// Whether the rule's window covers the first day of `period`.
    pub fn is_effective_for(&self, period: &BillingPeriod) -> bool {
        match period.first_day() {
            Some(date) => self.window.contains(date),
            None => false,
        }
    }
}

fn parse_config<T: DeserializeOwned>(definition: &RuleDefinition) -> Result<T> {
    serde_json::from_value(definition.config.clone()).map_err(|e| {
        CostPipelineError::InvalidRuleConfig {
            rule_id: definition.id,
            details: e.to_string(),
        }
    })
}

/// Converts stored definitions into the ordered rule list the engine runs.
///
/// Inactive definitions are dropped. Invalid ones are logged and skipped so a
/// single bad administrative edit cannot stop ingestion.
pub fn load_rules(definitions: &[RuleDefinition]) -> Vec<Rule> {
    let mut rules: Vec<Rule> = definitions
        .iter()
        .filter(|d| d.is_active)
        .filter_map(|d| match Rule::from_definition(d) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!("Skipping business rule '{}': {}", d.name, e);
                None
            }
        })
        .collect();

    rules.sort_by_key(|r| r.id);
    debug!(
        "Loaded {} of {} business rule definitions",
        rules.len(),
        definitions.len()
    );
    rules
}
