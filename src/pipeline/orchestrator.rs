use std::cmp;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use crossbeam_channel::unbounded;
use log::{debug, error, info, warn};
use logging_timer::timer;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use threadpool::ThreadPool;

use super::{AggregationRecord, Pipeline, Scope, StageDef, StageKey, StageStatus};
use crate::config::AggregationConfig;
use crate::db::{ConnectionRegistry, Database};
use crate::error::AggError;
use crate::locations::{
    rebuild_location_snapshot, state_ids_from_snapshot, state_ids_from_tree, Hierarchy,
};
use crate::utils::Utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The record's run date is outside the backfill schedule; nothing was executed.
    Skipped,
    /// Every stage item is Done.
    Complete,
}

/// One row of `aggregation_stage`, for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub state_id: String,
    pub status: StageStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub updated_at: String,
}

/// A single unit of work: one stage for one state, or one all-state stage.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WorkItem {
    key: StageKey,
    /// Empty for all-state stages.
    state_id: String,
}

impl WorkItem {
    fn label(&self) -> String {
        if self.state_id.is_empty() {
            self.key.name().to_owned()
        } else {
            format!("{}[{}]", self.key.name(), self.state_id)
        }
    }
}

struct ItemResult {
    item: WorkItem,
    attempts: u32,
    error: Option<String>,
}

/// Everything a worker thread needs, shared across the pool.
struct RunContext {
    registry: Arc<ConnectionRegistry>,
    engine_id: String,
    config: AggregationConfig,
    agg_uuid: String,
    month: NaiveDate,
    state_ids: Vec<String>,
}

/// Drives aggregation runs through the stage graph.
pub struct Orchestrator {
    registry: Arc<ConnectionRegistry>,
    engine_id: String,
    config: AggregationConfig,
    pipeline: Pipeline,
}

impl Orchestrator {
    pub fn new(registry: Arc<ConnectionRegistry>, engine_id: &str, config: AggregationConfig) -> Self {
        Orchestrator {
            registry,
            engine_id: engine_id.to_owned(),
            config,
            pipeline: Pipeline::standard(),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Creates the run record, fixing its state list from the current snapshot. Falls back to
    /// the live tree when no snapshot has been built yet.
    pub fn create_run(
        &self,
        agg_uuid: Option<&str>,
        run_date: NaiveDate,
        interval: i32,
    ) -> Result<AggregationRecord, AggError> {
        let conn = self.registry.get_engine(&self.engine_id)?;
        if let Some(uuid) = agg_uuid {
            if let Some(existing) = AggregationRecord::find(&conn, uuid)? {
                return Ok(existing);
            }
        }

        let mut state_ids = state_ids_from_snapshot(&conn, self.config.hierarchy())?;
        if state_ids.is_empty() {
            debug!("Location snapshot is empty, taking states from the live tree");
            state_ids = state_ids_from_tree(&conn, &self.config.domain)?;
        }
        if state_ids.is_empty() {
            warn!(
                "No states found for domain '{}'; the run will only rebuild locations",
                self.config.domain
            );
        }
        AggregationRecord::create(&conn, agg_uuid, run_date, interval, state_ids)
    }

    /// Runs every stage of the record, wave by wave. Items already Done are left alone, so
    /// calling this again after a failure resumes the run.
    pub fn run(&self, agg_uuid: &str) -> Result<RunOutcome, AggError> {
        let _tmr = timer!(log::Level::Info; "Orchestrator::run", "{}", agg_uuid);

        for stage in self.pipeline.stages() {
            self.check_hierarchy(stage.key)?;
        }
        let record = {
            let conn = self.registry.get_engine(&self.engine_id)?;
            AggregationRecord::load(&conn, agg_uuid)?
        };
        if !record.run_aggregation_queries(&self.config) {
            info!(
                "Skipping aggregation {} for {}: run date {} is outside the backfill schedule",
                record.agg_uuid,
                Utils::format_date(record.agg_date),
                Utils::format_date(record.run_date)
            );
            return Ok(RunOutcome::Skipped);
        }

        let ctx = Arc::new(self.context(&record));
        let waves = self.pipeline.waves()?;
        for (index, wave) in waves.iter().enumerate() {
            let items = self.pending_items(&ctx, wave)?;
            info!(
                "Aggregation {}: wave {}/{} with {} item(s) to run",
                record.agg_uuid,
                index + 1,
                waves.len(),
                items.len()
            );
            let failed = Self::run_items(&ctx, items);
            if !failed.is_empty() {
                return Err(AggError::StagesFailed {
                    agg_uuid: record.agg_uuid.clone(),
                    failed,
                });
            }
        }

        info!(
            "Aggregation {} complete for {}",
            record.agg_uuid,
            Utils::format_date(record.agg_date)
        );
        Ok(RunOutcome::Complete)
    }

    /// Runs one stage for all of the record's states, regardless of the backfill schedule
    /// and of earlier results.
    pub fn run_aggregation_query(&self, query_name: &str, agg_uuid: &str) -> Result<(), AggError> {
        let key = StageKey::from_name(query_name).ok_or_else(|| {
            AggError::Error(format!("unknown aggregation query '{}'", query_name))
        })?;
        let stage = self.pipeline.stage(key).ok_or_else(|| {
            AggError::Error(format!("'{}' is not part of the pipeline", query_name))
        })?;
        self.check_hierarchy(stage.key)?;

        let record = {
            let conn = self.registry.get_engine(&self.engine_id)?;
            AggregationRecord::load(&conn, agg_uuid)?
        };
        let ctx = Arc::new(self.context(&record));
        let failed = Self::run_items(&ctx, Self::items_for(&ctx, stage));
        if failed.is_empty() {
            Ok(())
        } else {
            Err(AggError::StagesFailed {
                agg_uuid: record.agg_uuid,
                failed,
            })
        }
    }

    pub fn update_location_tables(&self, agg_uuid: &str) -> Result<(), AggError> {
        self.run_aggregation_query(StageKey::UpdateLocationTables.name(), agg_uuid)
    }

    pub fn stage_statuses(&self, agg_uuid: &str) -> Result<Vec<StageReport>, AggError> {
        let conn = self.registry.get_read_engine(&self.engine_id)?;
        AggregationRecord::load(&conn, agg_uuid)?;

        let mut stmt = conn.prepare(
            "SELECT stage, state_id, status, attempts, error, updated_at
             FROM aggregation_stage
             WHERE agg_uuid = ?
             ORDER BY updated_at, stage, state_id",
        )?;
        let rows = stmt.query_map([agg_uuid], |r| {
            Ok(StageReport {
                stage: r.get(0)?,
                state_id: r.get(1)?,
                status: StageStatus::from_i64(r.get(2)?),
                attempts: r.get(3)?,
                error: r.get(4)?,
                updated_at: r.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Rollup tables are laid out over the five ICDS levels and read `awc_location`.
    fn check_hierarchy(&self, key: StageKey) -> Result<(), AggError> {
        match key {
            StageKey::Rollup(kind) if self.config.hierarchy() != Hierarchy::Icds => {
                Err(AggError::ConfigurationError(format!(
                    "'{}' rolls up the icds hierarchy and cannot run with hierarchy '{}'",
                    kind.name(),
                    self.config.hierarchy
                )))
            }
            _ => Ok(()),
        }
    }

    fn context(&self, record: &AggregationRecord) -> RunContext {
        RunContext {
            registry: Arc::clone(&self.registry),
            engine_id: self.engine_id.clone(),
            config: self.config.clone(),
            agg_uuid: record.agg_uuid.clone(),
            month: record.agg_date,
            state_ids: record.state_ids.clone(),
        }
    }

    fn items_for(ctx: &RunContext, stage: &StageDef) -> Vec<WorkItem> {
        match stage.scope {
            Scope::AllStates => vec![WorkItem {
                key: stage.key,
                state_id: String::new(),
            }],
            Scope::PerState => ctx
                .state_ids
                .iter()
                .map(|state_id| WorkItem {
                    key: stage.key,
                    state_id: state_id.clone(),
                })
                .collect(),
        }
    }

    fn pending_items(&self, ctx: &RunContext, wave: &[&StageDef]) -> Result<Vec<WorkItem>, AggError> {
        let conn = self.registry.get_engine(&self.engine_id)?;
        let mut items = Vec::new();
        for stage in wave {
            for item in Self::items_for(ctx, stage) {
                match item_status(&conn, &ctx.agg_uuid, &item)? {
                    Some((StageStatus::Done, _)) => {
                        debug!("{} already done for {}", item.label(), ctx.agg_uuid)
                    }
                    _ => items.push(item),
                }
            }
        }
        Ok(items)
    }

    /// Fans the items out over the worker pool and waits for all of them. Returns the labels
    /// of the items that failed.
    fn run_items(ctx: &Arc<RunContext>, items: Vec<WorkItem>) -> Vec<String> {
        if items.is_empty() {
            return Vec::new();
        }

        let (sender, receiver) = unbounded::<ItemResult>();
        let num_threads = cmp::min(items.len(), ctx.config.workers);
        let pool = ThreadPool::new(num_threads.max(1));

        for item in items {
            let sender = sender.clone();
            let ctx = Arc::clone(ctx);
            pool.execute(move || {
                let result = run_with_retries(&ctx, item);
                // The receiver outlives the pool; a failed send means the run was abandoned.
                let _ = sender.send(result);
            });
        }
        drop(sender);
        pool.join();

        let mut failed = Vec::new();
        for result in receiver.iter() {
            match result.error {
                None => debug!(
                    "{} done after {} attempt(s)",
                    result.item.label(),
                    result.attempts
                ),
                Some(e) => {
                    error!(
                        "{} failed after {} attempt(s): {}",
                        result.item.label(),
                        result.attempts,
                        e
                    );
                    failed.push(result.item.label());
                }
            }
        }
        if pool.panic_count() > 0 {
            error!("{} aggregation worker(s) panicked", pool.panic_count());
            failed.push(format!("{} panicked worker(s)", pool.panic_count()));
        }
        failed.sort();
        failed
    }
}

fn run_with_retries(ctx: &RunContext, item: WorkItem) -> ItemResult {
    retry_item(ctx, item, run_once)
}

/// Calls `attempt` until it succeeds, fails with a permanent error, or runs out of attempts.
fn retry_item<F>(ctx: &RunContext, item: WorkItem, attempt: F) -> ItemResult
where
    F: Fn(&RunContext, &WorkItem) -> Result<(), AggError>,
{
    let max_attempts = ctx.config.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt(ctx, &item) {
            Ok(()) => {
                return ItemResult {
                    item,
                    attempts,
                    error: None,
                }
            }
            Err(e) if e.is_transient() && attempts < max_attempts => {
                let base = ctx.config.retry_backoff_ms.saturating_mul(attempts as u64);
                let jitter = rand::thread_rng().gen_range(0..=base / 2);
                warn!(
                    "{} attempt {} failed with a transient error, retrying in {} ms: {}",
                    item.label(),
                    attempts,
                    base + jitter,
                    e
                );
                thread::sleep(Duration::from_millis(base + jitter));
            }
            Err(e) => {
                let message = e.to_string();
                if let Ok(conn) = ctx.registry.get_engine(&ctx.engine_id) {
                    if let Err(mark_err) =
                        set_status(&conn, &ctx.agg_uuid, &item, StageStatus::Failed, Some(&message))
                    {
                        error!("Could not mark {} failed: {}", item.label(), mark_err);
                    }
                }
                return ItemResult {
                    item,
                    attempts,
                    error: Some(message),
                };
            }
        }
    }
}

fn run_once(ctx: &RunContext, item: &WorkItem) -> Result<(), AggError> {
    let _tmr = timer!(log::Level::Debug; "Stage", "{}", item.label());
    let conn = ctx.registry.get_engine(&ctx.engine_id)?;
    set_status(&conn, &ctx.agg_uuid, item, StageStatus::Running, None)?;
    info!("Aggregation {}: {} started", ctx.agg_uuid, item.label());

    let single_state;
    let state_ids: &[String] = if item.state_id.is_empty() {
        &ctx.state_ids
    } else {
        single_state = [item.state_id.clone()];
        &single_state
    };

    let result = match item.key.aggregator() {
        None => {
            rebuild_location_snapshot(&conn, &ctx.config.domain, ctx.config.hierarchy())?;
            set_status(&conn, &ctx.agg_uuid, item, StageStatus::Done, None)
        }
        Some(agg) if agg.is_atomic() => Database::immediate_transaction(&conn, |conn| {
            agg.create_table(conn, ctx.month, state_ids)?;
            agg.aggregate(conn, ctx.month, state_ids)?;
            set_status(conn, &ctx.agg_uuid, item, StageStatus::Done, None)
        }),
        Some(agg) => {
            agg.create_table(&conn, ctx.month, state_ids)?;
            agg.aggregate(&conn, ctx.month, state_ids)?;
            set_status(&conn, &ctx.agg_uuid, item, StageStatus::Done, None)
        }
    };
    if result.is_ok() {
        info!("Aggregation {}: {} finished", ctx.agg_uuid, item.label());
    }
    result
}

fn item_status(
    conn: &Connection,
    agg_uuid: &str,
    item: &WorkItem,
) -> Result<Option<(StageStatus, u32)>, AggError> {
    let row: Option<(i64, u32)> = conn
        .query_row(
            "SELECT status, attempts FROM aggregation_stage
             WHERE agg_uuid = ? AND stage = ? AND state_id = ?",
            params![agg_uuid, item.key.name(), item.state_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row.map(|(status, attempts)| (StageStatus::from_i64(status), attempts)))
}

/// Records a status change. Moving to Running counts an attempt.
fn set_status(
    conn: &Connection,
    agg_uuid: &str,
    item: &WorkItem,
    status: StageStatus,
    error: Option<&str>,
) -> Result<(), AggError> {
    let attempt = (status == StageStatus::Running) as i64;
    conn.execute(
        "INSERT INTO aggregation_stage (agg_uuid, stage, state_id, status, attempts, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (agg_uuid, stage, state_id) DO UPDATE SET
             status = excluded.status,
             attempts = aggregation_stage.attempts + ?5,
             error = excluded.error,
             updated_at = excluded.updated_at",
        params![
            agg_uuid,
            item.key.name(),
            item.state_id,
            status.as_i64(),
            attempt,
            error,
            Utils::now_timestamp(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DatabaseConfig, EngineConfig};
    use crate::forms::FormKind;
    use crate::monthly::MonthlyKind;
    use crate::rollup::RollupKind;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        registry: Arc<ConnectionRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut engines = BTreeMap::new();
            engines.insert(
                DatabaseConfig::DEFAULT_ENGINE.to_owned(),
                EngineConfig::for_path(dir.path().join("agg.db").to_string_lossy()),
            );
            let registry = Arc::new(ConnectionRegistry::new(&DatabaseConfig {
                busy_timeout_ms: 10_000,
                engines,
            }));
            Fixture {
                _dir: dir,
                registry,
            }
        }

        fn conn(&self) -> crate::db::PooledConn {
            self.registry.get_engine(DatabaseConfig::DEFAULT_ENGINE).unwrap()
        }

        fn config(&self) -> AggregationConfig {
            let mut config = Config::default().aggregation;
            config.workers = 4;
            config.max_attempts = 3;
            config.retry_backoff_ms = 1;
            config
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(Arc::clone(&self.registry), DatabaseConfig::DEFAULT_ENGINE, self.config())
        }

        fn seed(&self) {
            let conn = self.conn();
            crate::locations::tests::seed_icds_tree(&conn);
            crate::monthly::tests::add_child(&conn, "c1", "a1", "2018-06-10");
            conn.execute(
                "INSERT INTO ucr_growth_monitoring_forms
                    (doc_id, case_id, state_id, supervisor_id, awc_id, time_end, weight_child, zscore_grading_wfa)
                 VALUES ('f1', 'c1', 'st1', 's1', 'a1', '2019-01-15 09:00:00', 8, 3)",
                [],
            )
            .unwrap();
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    fn busy() -> AggError {
        AggError::DatabaseError(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn gm_item(state_id: &str) -> WorkItem {
        WorkItem {
            key: StageKey::Form(FormKind::GrowthMonitoring),
            state_id: state_id.to_owned(),
        }
    }

    #[test]
    fn test_create_run_falls_back_to_tree_and_is_idempotent() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();

        let record = orch.create_run(Some("run-1"), d(2019, 1, 20), 0).unwrap();
        assert_eq!(record.state_ids, vec!["st1"]);
        assert_eq!(record.agg_date, d(2019, 1, 1));

        crate::locations::tests::add_location(&fx.conn(), "st2", "state", None, false);
        let again = orch.create_run(Some("run-1"), d(2019, 1, 20), 0).unwrap();
        assert_eq!(again, record);
    }

    #[test]
    fn test_full_run_completes_every_stage() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();
        let record = orch.create_run(None, d(2019, 1, 20), 0).unwrap();

        assert_eq!(orch.run(&record.agg_uuid).unwrap(), RunOutcome::Complete);

        let statuses = orch.stage_statuses(&record.agg_uuid).unwrap();
        let expected_items = FormKind::specs().count() + 1 + 2 + 4;
        assert_eq!(statuses.len(), expected_items);
        assert!(statuses.iter().all(|s| s.status == StageStatus::Done));

        let conn = fx.conn();
        let chm = MonthlyKind::ChildHealth.partition(record.agg_date).unwrap();
        assert_eq!(count(&conn, &format!("SELECT COUNT(*) FROM {}", chm.quoted())), 1);
        let awc = RollupKind::Awc.spec().partition(record.agg_date, 1).unwrap();
        assert_eq!(count(&conn, &format!("SELECT SUM(num_awcs) FROM {}", awc.quoted())), 3);
        assert_eq!(
            count(&conn, &format!("SELECT SUM(num_launched_awcs) FROM {}", awc.quoted())),
            1
        );
    }

    #[test]
    fn test_rerun_skips_done_items() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();
        let record = orch.create_run(None, d(2019, 1, 20), 0).unwrap();
        orch.run(&record.agg_uuid).unwrap();
        orch.run(&record.agg_uuid).unwrap();

        let statuses = orch.stage_statuses(&record.agg_uuid).unwrap();
        assert!(statuses.iter().all(|s| s.attempts == 1), "{:?}", statuses);
    }

    #[test]
    fn test_backfill_outside_schedule_runs_nothing() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();
        // 2019-01-15 is a Tuesday
        let record = orch.create_run(None, d(2019, 1, 15), -1).unwrap();
        assert_eq!(record.agg_date, d(2018, 12, 1));

        assert_eq!(orch.run(&record.agg_uuid).unwrap(), RunOutcome::Skipped);

        let conn = fx.conn();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM aggregation_stage"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM partition_registry"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM awc_location"), 0);
    }

    #[test]
    fn test_failed_state_blocks_dependent_stages() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();
        // A state id that cannot name a partition fails every per-state stage for it
        let record = AggregationRecord::create(
            &fx.conn(),
            Some("broken"),
            d(2019, 1, 20),
            0,
            vec!["st1".into(), "bad state".into()],
        )
        .unwrap();

        let err = orch.run(&record.agg_uuid).unwrap_err();
        match err {
            AggError::StagesFailed { agg_uuid, failed } => {
                assert_eq!(agg_uuid, "broken");
                assert!(failed.contains(&"aggregate_gm_forms[bad state]".to_string()));
                assert!(!failed.iter().any(|f| f.contains("[st1]")));
            }
            other => panic!("unexpected error: {}", other),
        }

        let statuses = orch.stage_statuses("broken").unwrap();
        let status_of = |stage: &str, state: &str| {
            statuses
                .iter()
                .find(|s| s.stage == stage && s.state_id == state)
                .map(|s| s.status)
        };
        assert_eq!(status_of("aggregate_gm_forms", "st1"), Some(StageStatus::Done));
        assert_eq!(status_of("aggregate_gm_forms", "bad state"), Some(StageStatus::Failed));
        assert_eq!(status_of("child_health_monthly", ""), None);
        assert_eq!(status_of("agg_awc", ""), None);
        assert!(statuses
            .iter()
            .filter(|s| s.status == StageStatus::Failed)
            .all(|s| s.attempts == 1 && s.error.is_some()));
    }

    #[test]
    fn test_run_aggregation_query_runs_one_stage() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();
        let record = orch.create_run(None, d(2019, 1, 20), 0).unwrap();

        orch.update_location_tables(&record.agg_uuid).unwrap();
        orch.run_aggregation_query("aggregate_gm_forms", &record.agg_uuid)
            .unwrap();

        let statuses = orch.stage_statuses(&record.agg_uuid).unwrap();
        let names: Vec<(&str, &str)> = statuses
            .iter()
            .map(|s| (s.stage.as_str(), s.state_id.as_str()))
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&("update_location_tables", "")));
        assert!(names.contains(&("aggregate_gm_forms", "st1")));

        assert!(matches!(
            orch.run_aggregation_query("nope", &record.agg_uuid),
            Err(AggError::Error(_))
        ));
        assert!(matches!(
            orch.run_aggregation_query("aggregate_gm_forms", "missing"),
            Err(AggError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_busy_database_is_retried() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();
        let record = orch.create_run(None, d(2019, 1, 20), 0).unwrap();
        let ctx = orch.context(&record);

        let calls = AtomicU32::new(0);
        let result = retry_item(&ctx, gm_item("st1"), |ctx, item| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(busy())
            } else {
                run_once(ctx, item)
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.error, None);
        // The busy attempt never reached the database
        assert_eq!(
            item_status(&fx.conn(), &record.agg_uuid, &gm_item("st1")).unwrap(),
            Some((StageStatus::Done, 1))
        );
        let gm = FormKind::GrowthMonitoring.aggregator().partition("st1", record.agg_date).unwrap();
        assert_eq!(count(&fx.conn(), &format!("SELECT COUNT(*) FROM {}", gm.quoted())), 1);
    }

    #[test]
    fn test_busy_database_gives_up_after_max_attempts() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();
        let record = orch.create_run(None, d(2019, 1, 20), 0).unwrap();
        let ctx = orch.context(&record);

        let calls = AtomicU32::new(0);
        let result = retry_item(&ctx, gm_item("st1"), |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(busy())
        });

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.attempts, 3);
        assert!(result.error.is_some());
        assert_eq!(
            item_status(&fx.conn(), &record.agg_uuid, &gm_item("st1")).unwrap(),
            Some((StageStatus::Failed, 0))
        );
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let fx = Fixture::new();
        fx.seed();
        let orch = fx.orchestrator();
        let record = orch.create_run(None, d(2019, 1, 20), 0).unwrap();
        let ctx = orch.context(&record);

        let calls = AtomicU32::new(0);
        let result = retry_item(&ctx, gm_item("st1"), |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AggError::Error("bad input".into()))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error.as_deref(), Some("Error: bad input"));
        assert_eq!(
            item_status(&fx.conn(), &record.agg_uuid, &gm_item("st1")).unwrap(),
            Some((StageStatus::Failed, 0))
        );
    }

    #[test]
    fn test_failed_state_leaves_other_states_done() {
        let fx = Fixture::new();
        fx.seed();
        fx.conn()
            .execute(
                "INSERT INTO ucr_growth_monitoring_forms
                    (doc_id, case_id, state_id, supervisor_id, awc_id, time_end, weight_child, zscore_grading_wfa)
                 VALUES ('f2', 'c2', 'st2', 's9', 'a9', '2019-01-16 09:00:00', 9, 3)",
                [],
            )
            .unwrap();
        let orch = fx.orchestrator();
        let record = AggregationRecord::create(
            &fx.conn(),
            Some("partial"),
            d(2019, 1, 20),
            0,
            vec!["st1".into(), "st2".into(), "bad state".into()],
        )
        .unwrap();

        match orch.run(&record.agg_uuid).unwrap_err() {
            AggError::StagesFailed { failed, .. } => {
                assert!(failed.iter().all(|f| f.ends_with("[bad state]")), "{:?}", failed);
            }
            other => panic!("unexpected error: {}", other),
        }

        let conn = fx.conn();
        let gm = FormKind::GrowthMonitoring.aggregator();
        for state in ["st1", "st2"] {
            assert_eq!(
                item_status(&conn, "partial", &gm_item(state)).unwrap(),
                Some((StageStatus::Done, 1))
            );
            let partition = gm.partition(state, record.agg_date).unwrap();
            assert_eq!(
                count(&conn, &format!("SELECT COUNT(*) FROM {}", partition.quoted())),
                1,
                "{}",
                state
            );
        }
        assert_eq!(
            item_status(&conn, "partial", &gm_item("bad state")).unwrap().map(|(s, _)| s),
            Some(StageStatus::Failed)
        );
        // Every state's forms ran; nothing past the failed wave did
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM aggregation_stage WHERE stage = 'child_health_monthly'"),
            0
        );
    }

    #[test]
    fn test_aaa_hierarchy_rejects_rollups() {
        let fx = Fixture::new();
        fx.seed();
        let mut config = fx.config();
        config.hierarchy = "aaa".into();
        let orch = Orchestrator::new(Arc::clone(&fx.registry), DatabaseConfig::DEFAULT_ENGINE, config);
        let record = AggregationRecord::create(&fx.conn(), Some("aaa"), d(2019, 1, 20), 0, vec!["st1".into()])
            .unwrap();

        match orch.run("aaa") {
            Err(AggError::ConfigurationError(message)) => assert!(message.contains("'aaa'"), "{}", message),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(count(&fx.conn(), "SELECT COUNT(*) FROM aggregation_stage"), 0);

        assert!(matches!(
            orch.run_aggregation_query("agg_awc", &record.agg_uuid),
            Err(AggError::ConfigurationError(_))
        ));
        // Form stages do not depend on the hierarchy
        orch.run_aggregation_query("aggregate_gm_forms", &record.agg_uuid).unwrap();
        assert_eq!(count(&fx.conn(), "SELECT COUNT(*) FROM aggregation_stage"), 1);
    }
}
