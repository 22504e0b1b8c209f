use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use log::info;

use crate::config::{Config, DatabaseConfig};
use crate::db::ConnectionRegistry;
use crate::error::AggError;
use crate::pipeline::{Orchestrator, RunOutcome};
use crate::reconciliation::verify_rollup;
use crate::rollup::RollupKind;
use crate::utils::Utils;

#[derive(Parser, Debug)]
#[command(
    name = "icds-agg",
    version,
    about = "icds-agg: monthly aggregation of ICDS dashboard tables"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the local data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database engine to run against
    #[arg(long, global = true, default_value = DatabaseConfig::DEFAULT_ENGINE)]
    pub engine: String,

    /// Database file to use for the selected engine instead of the configured one
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Create the record for a run, fixing its month and state list ('-' generates an id)
    CreateAggregationRecord {
        agg_uuid: String,

        /// Date the run is made on, YYYY-MM-DD (default: today)
        #[arg(long)]
        run_date: Option<String>,

        /// Months back from the run date to aggregate (0 = current month)
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        interval: i32,
    },

    /// Run every stage of a recorded run, resuming after earlier failures
    Run { agg_uuid: String },

    /// Run a single stage for all of a run's states
    RunAggregationQuery { query_name: String, agg_uuid: String },

    /// Rebuild the location snapshot for a run
    UpdateLocationTables { agg_uuid: String },

    /// Show the per-stage status of a run
    Status { agg_uuid: String },

    /// Check that every rollup level sums its children
    VerifyRollup {
        /// agg_child_health, agg_ccs_record, agg_awc or agg_ls
        kind: String,
        /// Any date in the month, YYYY-MM-DD
        month: String,
    },

    /// Create the database schema for the selected engine
    InitDb,
}

impl Cli {
    pub fn execute(self, config: &Config) -> Result<(), AggError> {
        let registry = Arc::new(ConnectionRegistry::new(&config.database));
        let _override = match &self.db_path {
            Some(path) => Some(registry.override_engine(&self.engine, path)?),
            None => None,
        };
        registry.check_engines(&[self.engine.as_str()])?;
        let orchestrator =
            Orchestrator::new(Arc::clone(&registry), &self.engine, config.aggregation.clone());

        let result = Self::dispatch(self.command, &registry, &self.engine, &orchestrator);
        registry.dispose_all()?;
        result
    }

    fn dispatch(
        command: Command,
        registry: &ConnectionRegistry,
        engine: &str,
        orchestrator: &Orchestrator,
    ) -> Result<(), AggError> {
        match command {
            Command::CreateAggregationRecord {
                agg_uuid,
                run_date,
                interval,
            } => {
                let run_date = match run_date {
                    Some(s) => Utils::parse_date(&s)?,
                    None => Local::now().date_naive(),
                };
                let agg_uuid = if agg_uuid == "-" { None } else { Some(agg_uuid.as_str()) };
                let record = orchestrator.create_run(agg_uuid, run_date, interval)?;
                let json = serde_json::to_string_pretty(&record)
                    .map_err(|e| AggError::Error(format!("cannot print record: {}", e)))?;
                println!("{}", json);
                Ok(())
            }
            Command::Run { agg_uuid } => {
                match orchestrator.run(&agg_uuid)? {
                    RunOutcome::Skipped => println!("{}: skipped by the backfill schedule", agg_uuid),
                    RunOutcome::Complete => println!("{}: complete", agg_uuid),
                }
                Ok(())
            }
            Command::RunAggregationQuery {
                query_name,
                agg_uuid,
            } => orchestrator.run_aggregation_query(&query_name, &agg_uuid),
            Command::UpdateLocationTables { agg_uuid } => {
                orchestrator.update_location_tables(&agg_uuid)
            }
            Command::Status { agg_uuid } => {
                let statuses = orchestrator.stage_statuses(&agg_uuid)?;
                if statuses.is_empty() {
                    println!("{}: no stages have run", agg_uuid);
                }
                for s in statuses {
                    println!(
                        "{:<40} {:<12} {:<8} {:>3}  {}  {}",
                        s.stage,
                        s.state_id,
                        s.status.full_name(),
                        s.attempts,
                        s.updated_at,
                        s.error.unwrap_or_default()
                    );
                }
                Ok(())
            }
            Command::VerifyRollup { kind, month } => {
                let kind = RollupKind::from_str(&kind).map_err(|_| {
                    AggError::Error(format!("unknown rollup table '{}'", kind))
                })?;
                let month = parse_month(&month)?;
                let conn = registry.get_read_engine(engine)?;
                let mismatches = verify_rollup(&conn, kind, month)?;
                for m in &mismatches {
                    println!(
                        "level {} {} [{}] {}: parent {:?} children {:?}",
                        m.level,
                        m.location.join("/"),
                        m.dims.join(","),
                        m.column,
                        m.parent,
                        m.children
                    );
                }
                println!(
                    "{} {}: {} mismatch(es)",
                    kind.name(),
                    Utils::format_date(month),
                    mismatches.len()
                );
                Ok(())
            }
            Command::InitDb => {
                registry.get_engine(engine)?;
                info!("Schema ready for engine '{}'", engine);
                println!("Schema ready for engine '{}'", engine);
                Ok(())
            }
        }
    }
}

/// First day of the month containing a YYYY-MM-DD date.
pub fn parse_month(s: &str) -> Result<NaiveDate, AggError> {
    Ok(Utils::month_start(Utils::parse_date(s)?))
}
