//! Contracts for the external collaborators the pipeline reads from and
//! writes to, plus in-memory implementations of each.
//!
//! All trait methods take `&self`; implementations are expected to handle
//! their own synchronisation so a single store can back concurrent callers.

use crate::calendar::BillingPeriod;
use crate::error::{CostPipelineError, Result};
use crate::rules::RuleDefinition;
use crate::schema::{Anomaly, BillingRecord, MonthlyTotal, NewAnomaly, Project, RecordFilter};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, RwLock};

pub trait RuleRepository {
    /// Active rule definitions ordered by id, optionally limited to one platform.
    fn list_active_rules(&self, platform: Option<&str>) -> Result<Vec<RuleDefinition>>;
}

pub trait BillingStore {
    fn query_records(&self, filter: &RecordFilter) -> Result<Vec<BillingRecord>>;

    /// Summed cost of one project for one period, `None` when nothing was billed.
    fn aggregate_monthly(&self, project_id: u64, period: BillingPeriod) -> Result<Option<f64>>;

    /// Up to `limit` monthly totals for a project, most recent period first.
    fn aggregate_monthly_series(&self, project_id: u64, limit: usize)
        -> Result<Vec<MonthlyTotal>>;

    /// Per-project totals for one period on one platform.
    fn project_totals(&self, period: BillingPeriod, platform: &str) -> Result<Vec<(u64, f64)>>;

    fn list_projects(&self) -> Result<Vec<Project>>;
}

pub trait AnomalyStore {
    fn exists(&self, project_id: u64, period: BillingPeriod) -> Result<bool>;

    /// Stages a new anomaly and returns its id. Visible to `exists` at once,
    /// to readers only after `commit`.
    fn insert(&self, anomaly: NewAnomaly) -> Result<u64>;

    fn commit(&self) -> Result<()>;

    /// Inserts unless a finding already exists for the same project and period.
    /// Returns whether a row was written.
    ///
    /// The default is check-then-insert and is not atomic: two concurrent
    /// callers can both pass the check. Stores with a uniqueness constraint on
    /// (project_id, year, month) should override this with an upsert.
    fn insert_if_absent(&self, anomaly: NewAnomaly) -> Result<bool> {
        if self.exists(anomaly.project_id, anomaly.period())? {
            return Ok(false);
        }
        self.insert(anomaly)?;
        Ok(true)
    }

    /// Marks an anomaly as acknowledged. Staged rows can be acknowledged
    /// before they are committed.
    fn acknowledge(&self, anomaly_id: u64) -> Result<()>;

    /// Unacknowledged, committed anomalies for a platform, newest first.
    fn list_unacknowledged(&self, platform: &str) -> Result<Vec<Anomaly>>;
}

fn poisoned(store: &str) -> CostPipelineError {
    CostPipelineError::Store(format!("{} lock poisoned", store))
}

#[derive(Debug, Default)]
pub struct InMemoryRuleRepository {
    rules: RwLock<Vec<RuleDefinition>>,
}

impl InMemoryRuleRepository {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn upsert(&self, definition: RuleDefinition) -> Result<()> {
        let mut rules = self.rules.write().map_err(|_| poisoned("rule repository"))?;
        rules.retain(|r| r.id != definition.id);
        rules.push(definition);
        Ok(())
    }
}

impl RuleRepository for InMemoryRuleRepository {
    fn list_active_rules(&self, platform: Option<&str>) -> Result<Vec<RuleDefinition>> {
        let rules = self.rules.read().map_err(|_| poisoned("rule repository"))?;
        let mut active: Vec<RuleDefinition> = rules
            .iter()
            .filter(|r| r.is_active)
            .filter(|r| platform.map_or(true, |p| r.platform == p))
            .cloned()
            .collect();
        active.sort_by_key(|r| r.id);
        Ok(active)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    projects: RwLock<Vec<Project>>,
    records: RwLock<Vec<BillingRecord>>,
}

impl InMemoryBillingStore {
    pub fn new(projects: Vec<Project>, records: Vec<BillingRecord>) -> Self {
        Self {
            projects: RwLock::new(projects),
            records: RwLock::new(records),
        }
    }

    pub fn add_records(&self, new_records: impl IntoIterator<Item = BillingRecord>) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned("billing store"))?;
        records.extend(new_records);
        Ok(())
    }

    fn monthly_totals(&self, project_id: u64) -> Result<BTreeMap<BillingPeriod, f64>> {
        let records = self.records.read().map_err(|_| poisoned("billing store"))?;
        let mut totals = BTreeMap::new();
        for record in records.iter().filter(|r| r.project_id == Some(project_id)) {
            if let Ok(period) = record.period() {
                *totals.entry(period).or_insert(0.0) += record.cost;
            }
        }
        Ok(totals)
    }
}

impl BillingStore for InMemoryBillingStore {
    fn query_records(&self, filter: &RecordFilter) -> Result<Vec<BillingRecord>> {
        let records = self.records.read().map_err(|_| poisoned("billing store"))?;
        Ok(records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }

    fn aggregate_monthly(&self, project_id: u64, period: BillingPeriod) -> Result<Option<f64>> {
        Ok(self.monthly_totals(project_id)?.get(&period).copied())
    }

    fn aggregate_monthly_series(
        &self,
        project_id: u64,
        limit: usize,
    ) -> Result<Vec<MonthlyTotal>> {
        Ok(self
            .monthly_totals(project_id)?
            .into_iter()
            .rev()
            .take(limit)
            .map(|(period, total)| MonthlyTotal { period, total })
            .collect())
    }

    fn project_totals(&self, period: BillingPeriod, platform: &str) -> Result<Vec<(u64, f64)>> {
        let records = self.records.read().map_err(|_| poisoned("billing store"))?;
        let mut totals: BTreeMap<u64, f64> = BTreeMap::new();
        for record in records.iter().filter(|r| r.platform == platform) {
            let Some(project_id) = record.project_id else {
                continue;
            };
            if record.period().ok() == Some(period) {
                *totals.entry(project_id).or_insert(0.0) += record.cost;
            }
        }
        Ok(totals.into_iter().collect())
    }

    fn list_projects(&self) -> Result<Vec<Project>> {
        let projects = self.projects.read().map_err(|_| poisoned("billing store"))?;
        Ok(projects.clone())
    }
}

#[derive(Debug, Default)]
struct AnomalyTable {
    next_id: u64,
    committed: Vec<Anomaly>,
    pending: Vec<Anomaly>,
    keys: HashMap<(u64, BillingPeriod), u64>,
}

impl AnomalyTable {
    fn stage(&mut self, anomaly: NewAnomaly) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.keys.insert((anomaly.project_id, anomaly.period()), id);
        self.pending.push(Anomaly {
            id,
            project_id: anomaly.project_id,
            billing_year: anomaly.billing_year,
            billing_month: anomaly.billing_month,
            anomalous_cost: anomaly.anomalous_cost,
            average_cost: anomaly.average_cost,
            is_acknowledged: false,
            timestamp: Utc::now(),
            platform: anomaly.platform,
        });
        id
    }
}

/// Anomaly store with a uniqueness index on (project_id, period).
#[derive(Debug, Default)]
pub struct InMemoryAnomalyStore {
    table: Mutex<AnomalyTable>,
}

impl InMemoryAnomalyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, AnomalyTable>> {
        self.table.lock().map_err(|_| poisoned("anomaly store"))
    }

    /// Every committed anomaly, acknowledged or not, in insertion order.
    pub fn all(&self) -> Result<Vec<Anomaly>> {
        Ok(self.table()?.committed.clone())
    }
}

impl AnomalyStore for InMemoryAnomalyStore {
    fn exists(&self, project_id: u64, period: BillingPeriod) -> Result<bool> {
        Ok(self.table()?.keys.contains_key(&(project_id, period)))
    }

    fn insert(&self, anomaly: NewAnomaly) -> Result<u64> {
        Ok(self.table()?.stage(anomaly))
    }

    fn commit(&self) -> Result<()> {
        let mut table = self.table()?;
        let pending = std::mem::take(&mut table.pending);
        table.committed.extend(pending);
        Ok(())
    }

    fn insert_if_absent(&self, anomaly: NewAnomaly) -> Result<bool> {
        let mut table = self.table()?;
        if table.keys.contains_key(&(anomaly.project_id, anomaly.period())) {
            return Ok(false);
        }
        table.stage(anomaly);
        Ok(true)
    }

    fn acknowledge(&self, anomaly_id: u64) -> Result<()> {
        let mut table = self.table()?;
        let AnomalyTable {
            committed, pending, ..
        } = &mut *table;
        let anomaly = committed
            .iter_mut()
            .chain(pending.iter_mut())
            .find(|a| a.id == anomaly_id)
            .ok_or(CostPipelineError::AnomalyNotFound(anomaly_id))?;
        anomaly.is_acknowledged = true;
        Ok(())
    }

    fn list_unacknowledged(&self, platform: &str) -> Result<Vec<Anomaly>> {
        let table = self.table()?;
        let mut open: Vec<Anomaly> = table
            .committed
            .iter()
            .filter(|a| !a.is_acknowledged && a.platform == platform)
            .cloned()
            .collect();
        open.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Month;

    fn record(project_id: u64, year: i32, month: &str, cost: f64) -> BillingRecord {
        BillingRecord {
            id: format!("{}-{}-{}", project_id, year, month),
            project_name: format!("project-{}", project_id),
            project_id: Some(project_id),
            billing_year: year,
            billing_month: month.to_string(),
            platform: "gcp".to_string(),
            service_description: String::new(),
            sku_description: String::new(),
            record_type: String::new(),
            cost,
        }
    }

    fn new_anomaly(project_id: u64, month: Month) -> NewAnomaly {
        NewAnomaly {
            project_id,
            billing_year: 2025,
            billing_month: month,
            anomalous_cost: 200.0,
            average_cost: 100.0,
            platform: "gcp".to_string(),
        }
    }

    #[test]
    fn test_series_is_most_recent_first_and_limited() {
        let store = InMemoryBillingStore::new(
            vec![],
            vec![
                record(1, 2024, "nov", 10.0),
                record(1, 2024, "dec", 20.0),
                record(1, 2024, "dec", 5.0),
                record(1, 2025, "jan", 30.0),
                record(1, 2025, "feb", 40.0),
                record(2, 2025, "feb", 99.0),
            ],
        );

        let series = store.aggregate_monthly_series(1, 3).unwrap();
        let periods: Vec<BillingPeriod> = series.iter().map(|t| t.period).collect();
        assert_eq!(
            periods,
            vec![
                BillingPeriod::new(2025, Month::Feb),
                BillingPeriod::new(2025, Month::Jan),
                BillingPeriod::new(2024, Month::Dec),
            ]
        );
        assert!((series[2].total - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_monthly_missing_is_none() {
        let store = InMemoryBillingStore::new(vec![], vec![record(1, 2025, "jan", 30.0)]);
        let jan = BillingPeriod::new(2025, Month::Jan);
        assert_eq!(store.aggregate_monthly(1, jan).unwrap(), Some(30.0));
        assert_eq!(store.aggregate_monthly(1, jan.next().unwrap()).unwrap(), None);
    }

    #[test]
    fn test_project_totals_filters_platform() {
        let mut aws = record(3, 2025, "jan", 7.0);
        aws.platform = "aws".to_string();
        let store = InMemoryBillingStore::new(
            vec![],
            vec![record(1, 2025, "jan", 1.0), record(1, 2025, "jan", 2.0), aws],
        );
        let totals = store
            .project_totals(BillingPeriod::new(2025, Month::Jan), "gcp")
            .unwrap();
        assert_eq!(totals, vec![(1, 3.0)]);
    }

    #[test]
    fn test_rule_repository_filters_and_orders() {
        let def = |id: u64, platform: &str, active: bool| RuleDefinition {
            id,
            name: format!("r{}", id),
            description: None,
            rule_type: "RENAME_PROJECT".to_string(),
            is_active: active,
            config: serde_json::json!({}),
            start_date: None,
            end_date: None,
            platform: platform.to_string(),
        };
        let repo = InMemoryRuleRepository::new(vec![
            def(3, "gcp", true),
            def(1, "gcp", true),
            def(2, "aws", true),
            def(4, "gcp", false),
        ]);

        let ids: Vec<u64> = repo
            .list_active_rules(Some("gcp"))
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(repo.list_active_rules(None).unwrap().len(), 3);
    }

    #[test]
    fn test_upsert_replaces_rule_by_id() {
        let repo = InMemoryRuleRepository::default();
        let mut def = RuleDefinition {
            id: 1,
            name: "r1".to_string(),
            description: None,
            rule_type: "RENAME_PROJECT".to_string(),
            is_active: true,
            config: serde_json::json!({}),
            start_date: None,
            end_date: None,
            platform: "gcp".to_string(),
        };
        repo.upsert(def.clone()).unwrap();
        def.is_active = false;
        repo.upsert(def).unwrap();
        assert!(repo.list_active_rules(None).unwrap().is_empty());
    }

    #[test]
    fn test_added_records_are_queryable() {
        let store = InMemoryBillingStore::default();
        store
            .add_records(vec![record(1, 2025, "jan", 4.0), record(2, 2025, "jan", 6.0)])
            .unwrap();
        let filter = RecordFilter {
            project_id: Some(2),
            ..Default::default()
        };
        let found = store.query_records(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].cost, 6.0);
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let store = InMemoryAnomalyStore::new();
        assert!(store.insert_if_absent(new_anomaly(1, Month::Mar)).unwrap());
        assert!(!store.insert_if_absent(new_anomaly(1, Month::Mar)).unwrap());
        assert!(store.insert_if_absent(new_anomaly(1, Month::Apr)).unwrap());
        store.commit().unwrap();
        assert_eq!(store.all().unwrap().len(), 2);
    }

    #[test]
    fn test_pending_rows_are_invisible_until_commit() {
        let store = InMemoryAnomalyStore::new();
        store.insert(new_anomaly(1, Month::Mar)).unwrap();
        assert!(store.exists(1, BillingPeriod::new(2025, Month::Mar)).unwrap());
        assert!(store.list_unacknowledged("gcp").unwrap().is_empty());
        store.commit().unwrap();
        assert_eq!(store.list_unacknowledged("gcp").unwrap().len(), 1);
    }

    #[test]
    fn test_acknowledge() {
        let store = InMemoryAnomalyStore::new();
        let id = store.insert(new_anomaly(1, Month::Mar)).unwrap();
        store.commit().unwrap();

        store.acknowledge(id).unwrap();
        assert!(store.list_unacknowledged("gcp").unwrap().is_empty());
        assert!(store.all().unwrap()[0].is_acknowledged);

        assert!(matches!(
            store.acknowledge(999),
            Err(CostPipelineError::AnomalyNotFound(999))
        ));
    }

    #[test]
    fn test_acknowledge_staged_row() {
        let store = InMemoryAnomalyStore::new();
        let id = store.insert(new_anomaly(1, Month::Mar)).unwrap();

        store.acknowledge(id).unwrap();
        store.commit().unwrap();
        assert!(store.all().unwrap()[0].is_acknowledged);
        assert!(store.list_unacknowledged("gcp").unwrap().is_empty());
    }

    /// Keeps the trait's default `insert_if_absent`.
    #[derive(Default)]
    struct CheckThenInsertStore {
        rows: Mutex<Vec<NewAnomaly>>,
        commits: Mutex<usize>,
    }

    impl AnomalyStore for CheckThenInsertStore {
        fn exists(&self, project_id: u64, period: BillingPeriod) -> Result<bool> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .any(|a| a.project_id == project_id && a.period() == period))
        }

        fn insert(&self, anomaly: NewAnomaly) -> Result<u64> {
            let mut rows = self.rows.lock().unwrap();
            rows.push(anomaly);
            Ok(rows.len() as u64)
        }

        fn commit(&self) -> Result<()> {
            *self.commits.lock().unwrap() += 1;
            Ok(())
        }

        fn acknowledge(&self, anomaly_id: u64) -> Result<()> {
            Err(CostPipelineError::AnomalyNotFound(anomaly_id))
        }

        fn list_unacknowledged(&self, _platform: &str) -> Result<Vec<Anomaly>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_default_insert_if_absent_checks_before_inserting() {
        let store = CheckThenInsertStore::default();
        assert!(store.insert_if_absent(new_anomaly(1, Month::Mar)).unwrap());
        assert!(!store.insert_if_absent(new_anomaly(1, Month::Mar)).unwrap());
        assert!(store.insert_if_absent(new_anomaly(2, Month::Mar)).unwrap());
        assert!(store.insert_if_absent(new_anomaly(1, Month::Apr)).unwrap());
        store.commit().unwrap();

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(*store.commits.lock().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_insert_if_absent_writes_one_row() {
        let store = InMemoryAnomalyStore::new();
        let inserted = Mutex::new(0usize);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        if store.insert_if_absent(new_anomaly(1, Month::Mar)).unwrap() {
                            *inserted.lock().unwrap() += 1;
                        }
                    }
                });
            }
        });
        store.commit().unwrap();

        assert_eq!(*inserted.lock().unwrap(), 1);
        let rows = store.all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].period(), BillingPeriod::new(2025, Month::Mar));
    }

    #[test]
    fn test_unacknowledged_newest_first() {
        let store = InMemoryAnomalyStore::new();
        let first = store.insert(new_anomaly(1, Month::Mar)).unwrap();
        let second = store.insert(new_anomaly(2, Month::Mar)).unwrap();
        store.commit().unwrap();

        let ids: Vec<u64> = store
            .list_unacknowledged("gcp")
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
    }
}
