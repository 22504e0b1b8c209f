//! The monthly pipeline as an explicit stage graph.
//!
//! Stages are grouped into waves: every stage in a wave depends only on stages of earlier
//! waves, so a wave is a barrier. Per-state stages fan out one work item per state of the
//! run; all-state stages are a single item.

mod orchestrator;
mod record;
mod stage_status;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use strum::IntoEnumIterator;

use crate::aggregator::Aggregator;
use crate::error::AggError;
use crate::forms::FormKind;
use crate::monthly::MonthlyKind;
use crate::rollup::RollupKind;

pub use orchestrator::{Orchestrator, RunOutcome};
pub use record::AggregationRecord;
pub use stage_status::StageStatus;

pub const UPDATE_LOCATION_TABLES: &str = "update_location_tables";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKey {
    UpdateLocationTables,
    Form(FormKind),
    Monthly(MonthlyKind),
    Rollup(RollupKind),
}

impl StageKey {
    pub fn name(&self) -> &'static str {
        match self {
            StageKey::UpdateLocationTables => UPDATE_LOCATION_TABLES,
            StageKey::Form(kind) => kind.stage_name(),
            StageKey::Monthly(kind) => kind.name(),
            StageKey::Rollup(kind) => kind.name(),
        }
    }

    /// Resolves a stage name as used on the command line and in `aggregation_stage`.
    pub fn from_name(name: &str) -> Option<Self> {
        if name == UPDATE_LOCATION_TABLES {
            return Some(StageKey::UpdateLocationTables);
        }
        if let Ok(kind) = name.parse::<FormKind>() {
            return Some(StageKey::Form(kind));
        }
        if let Ok(kind) = name.parse::<RollupKind>() {
            return Some(StageKey::Rollup(kind));
        }
        MonthlyKind::all()
            .find(|kind| kind.name() == name)
            .map(StageKey::Monthly)
    }

    /// The aggregator behind a stage. The location snapshot has none; the orchestrator
    /// rebuilds it directly.
    pub fn aggregator(&self) -> Option<Box<dyn Aggregator>> {
        match self {
            StageKey::UpdateLocationTables => None,
            StageKey::Form(kind) => Some(Box::new(kind.aggregator())),
            StageKey::Monthly(kind) => Some(Box::new(kind.builder())),
            StageKey::Rollup(kind) => Some(Box::new(kind.aggregator())),
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// One work item per state of the run, each in its own partition.
    PerState,
    /// A single work item covering every state.
    AllStates,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageDef {
    pub key: StageKey,
    pub scope: Scope,
    pub deps: Vec<StageKey>,
}

impl StageDef {
    fn new(key: StageKey, scope: Scope, deps: Vec<StageKey>) -> Self {
        StageDef { key, scope, deps }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<StageDef>,
}

impl Pipeline {
    pub fn new(stages: Vec<StageDef>) -> Self {
        Pipeline { stages }
    }

    /// Snapshot, per-state forms, monthly facts, then rollups.
    pub fn standard() -> Self {
        let mut stages = vec![StageDef::new(
            StageKey::UpdateLocationTables,
            Scope::AllStates,
            vec![],
        )];

        for kind in FormKind::iter() {
            stages.push(StageDef::new(
                StageKey::Form(kind),
                Scope::PerState,
                vec![StageKey::UpdateLocationTables],
            ));
        }

        for kind in MonthlyKind::all() {
            stages.push(StageDef::new(
                StageKey::Monthly(kind),
                Scope::AllStates,
                kind.input_forms().into_iter().map(StageKey::Form).collect(),
            ));
        }

        stages.push(StageDef::new(
            StageKey::Rollup(RollupKind::ChildHealth),
            Scope::AllStates,
            vec![
                StageKey::UpdateLocationTables,
                StageKey::Monthly(MonthlyKind::ChildHealth),
            ],
        ));
        stages.push(StageDef::new(
            StageKey::Rollup(RollupKind::CcsRecord),
            Scope::AllStates,
            vec![
                StageKey::UpdateLocationTables,
                StageKey::Monthly(MonthlyKind::CcsRecord),
            ],
        ));
        stages.push(StageDef::new(
            StageKey::Rollup(RollupKind::Awc),
            Scope::AllStates,
            vec![
                StageKey::Rollup(RollupKind::ChildHealth),
                StageKey::Rollup(RollupKind::CcsRecord),
                StageKey::Form(FormKind::ThrImages),
                StageKey::Form(FormKind::Infrastructure),
                StageKey::Form(FormKind::DailyAttendance),
                StageKey::Form(FormKind::AwcUsage),
            ],
        ));
        stages.push(StageDef::new(
            StageKey::Rollup(RollupKind::Ls),
            Scope::AllStates,
            vec![
                StageKey::UpdateLocationTables,
                StageKey::Form(FormKind::LsAwcVisit),
                StageKey::Form(FormKind::LsVhnd),
            ],
        ));

        Pipeline { stages }
    }

    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }

    pub fn stage(&self, key: StageKey) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.key == key)
    }

    /// Topological layering of the stages. Fails on unknown dependencies, duplicate stages
    /// and cycles.
    pub fn waves(&self) -> Result<Vec<Vec<&StageDef>>, AggError> {
        let mut remaining: BTreeMap<StageKey, BTreeSet<StageKey>> = BTreeMap::new();
        for stage in &self.stages {
            if remaining
                .insert(stage.key, stage.deps.iter().copied().collect())
                .is_some()
            {
                return Err(AggError::Error(format!("stage '{}' is defined twice", stage.key)));
            }
        }
        for stage in &self.stages {
            for dep in &stage.deps {
                if !remaining.contains_key(dep) {
                    return Err(AggError::Error(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        stage.key, dep
                    )));
                }
            }
        }

        let mut waves = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<StageKey> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(key, _)| *key)
                .collect();
            if ready.is_empty() {
                let stuck: Vec<&str> = remaining.keys().map(|k| k.name()).collect();
                return Err(AggError::Error(format!(
                    "stage dependencies form a cycle among: {}",
                    stuck.join(", ")
                )));
            }
            for key in &ready {
                remaining.remove(key);
            }
            for deps in remaining.values_mut() {
                for key in &ready {
                    deps.remove(key);
                }
            }
            // Keep definition order inside a wave
            let wave: Vec<&StageDef> = self
                .stages
                .iter()
                .filter(|s| ready.contains(&s.key))
                .collect();
            waves.push(wave);
        }
        Ok(waves)
    }
}
