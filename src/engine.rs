use crate::calendar::BillingPeriod;
use crate::rules::{DistributeCostConfig, MoveServiceConfig, RenameProjectConfig, Rule, RuleKind};
use crate::schema::BillingRecord;
use log::{debug, info};
use std::collections::HashMap;

/// Rules split by kind, each partition in ascending id order.
struct RulePlan<'a> {
    renames: Vec<(&'a Rule, &'a RenameProjectConfig)>,
    moves: Vec<(&'a Rule, &'a MoveServiceConfig)>,
    distributions: Vec<(&'a Rule, &'a DistributeCostConfig)>,
}

impl<'a> RulePlan<'a> {
    fn partition(rules: &'a [Rule]) -> Self {
        let mut ordered: Vec<&Rule> = rules.iter().collect();
        ordered.sort_by_key(|r| r.id);

        let mut plan = RulePlan {
            renames: Vec::new(),
            moves: Vec::new(),
            distributions: Vec::new(),
        };
        for rule in ordered {
            match &rule.kind {
                RuleKind::RenameProject(cfg) => plan.renames.push((rule, cfg)),
                RuleKind::MoveService(cfg) => plan.moves.push((rule, cfg)),
                RuleKind::DistributeCost(cfg) => plan.distributions.push((rule, cfg)),
            }
        }
        plan
    }
}

/// Applies business rules to a batch of billing records.
///
/// The engine never touches its input: every phase consumes the working set
/// and returns a new one, and phases run in a fixed order (renames, service
/// moves, cost distribution) so distribution sees the relabelled projects.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    project_directory: Option<HashMap<String, u64>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `project_id` on distributed records by target project name.
    pub fn with_project_directory(directory: HashMap<String, u64>) -> Self {
        Self {
            project_directory: Some(directory),
        }
    }

    pub fn apply_rules(&self, records: &[BillingRecord], rules: &[Rule]) -> Vec<BillingRecord> {
        if records.is_empty() || rules.is_empty() {
            return records.to_vec();
        }

        let plan = RulePlan::partition(rules);
        debug!(
            "Applying {} rename, {} move and {} distribution rules to {} records",
            plan.renames.len(),
            plan.moves.len(),
            plan.distributions.len(),
            records.len()
        );

        let working = records.to_vec();
        let working = rename_projects(working, &plan.renames);
        let working = move_services(working, &plan.moves);
        let output = self.distribute_costs(working, &plan.distributions);

        info!(
            "Rule application produced {} records from {} inputs",
            output.len(),
            records.len()
        );
        output
    }

    fn distribute_costs(
        &self,
        records: Vec<BillingRecord>,
        rules: &[(&Rule, &DistributeCostConfig)],
    ) -> Vec<BillingRecord> {
        let (mut emitted, remaining) = rules.iter().fold(
            (Vec::new(), records),
            |(mut emitted, working), (rule, cfg)| {
                let (sources, rest): (Vec<_>, Vec<_>) =
                    working.into_iter().partition(|record| {
                        effective_period(record, rule).is_some()
                            && record.project_name == cfg.source_project
                    });

                let before = emitted.len();
                for source in &sources {
                    emitted.extend(self.split_record(source, &cfg.target_project_names));
                }
                debug!(
                    "Rule {} ('{}') distributed {} records from '{}' into {} records",
                    rule.id,
                    rule.name,
                    sources.len(),
                    cfg.source_project,
                    emitted.len() - before
                );

                (emitted, rest)
            },
        );

        emitted.extend(remaining);
        emitted
    }

    fn split_record(&self, source: &BillingRecord, targets: &[String]) -> Vec<BillingRecord> {
        if targets.is_empty() {
            return Vec::new();
        }

        let share = source.cost / targets.len() as f64;
        targets
            .iter()
            .map(|target| BillingRecord {
                id: format!("dist-{}-{}", source.id, target),
                project_name: target.clone(),
                project_id: self
                    .project_directory
                    .as_ref()
                    .and_then(|directory| directory.get(target).copied()),
                cost: share,
                ..source.clone()
            })
            .collect()
    }
}

/// Convenience wrapper around `RuleEngine::new().apply_rules`.
pub fn apply_rules(records: &[BillingRecord], rules: &[Rule]) -> Vec<BillingRecord> {
    RuleEngine::new().apply_rules(records, rules)
}

pub fn total_cost(records: &[BillingRecord]) -> f64 {
    records.iter().map(|r| r.cost).sum()
}

/// The record's period if the record is on the rule's platform and its
/// period resolves and falls inside the rule's window.
fn effective_period(record: &BillingRecord, rule: &Rule) -> Option<BillingPeriod> {
    if record.platform != rule.platform {
        return None;
    }
    record
        .period()
        .ok()
        .filter(|period| rule.is_effective_for(period))
}

// Renames chain: a later rule sees the name written by an earlier one.
fn rename_projects(
    records: Vec<BillingRecord>,
    rules: &[(&Rule, &RenameProjectConfig)],
) -> Vec<BillingRecord> {
    records
        .into_iter()
        .map(|record| {
            rules.iter().fold(record, |mut record, (rule, cfg)| {
                if effective_period(&record, rule).is_some()
                    && record.project_name == cfg.source_project_name
                {
                    record.project_name = cfg.new_project_name.clone();
                }
                record
            })
        })
        .collect()
}

fn move_services(
    records: Vec<BillingRecord>,
    rules: &[(&Rule, &MoveServiceConfig)],
) -> Vec<BillingRecord> {
    records
        .into_iter()
        .map(|record| {
            rules.iter().fold(record, |mut record, (rule, cfg)| {
                if effective_period(&record, rule).is_some()
                    && record.project_name == cfg.from_project
                    && cfg.services.contains(&record.service_description)
                {
                    record.project_name = cfg.to_project.clone();
                }
                record
            })
        })
        .collect()
}
