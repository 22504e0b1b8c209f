mod aggregator;
mod specs;

use std::fmt;

use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::partitions::{ColumnDef, TableSchema};

pub use aggregator::FormAggregator;

/// How a form column is reduced over the forms a case submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fold {
    /// Last non-null value ever seen. Carried into the next month.
    Latest,
    /// Like `Latest`, with a `<column>_last_recorded` timestamp alongside.
    LatestRecorded,
    /// Last non-null value within the month. Starts empty each month.
    LatestInMonth,
    /// Maximum value ever seen. Carried into the next month.
    Ever,
    /// Running sum within the month, advanced only by forms past the watermark.
    SumInMonth,
}

impl Fold {
    pub fn is_carried(&self) -> bool {
        matches!(self, Fold::Latest | Fold::LatestRecorded | Fold::Ever)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug)]
pub struct FormColumn {
    pub name: &'static str,
    pub column_type: ColumnType,
    /// Expression over the source row, aliased `ucr`.
    pub source: &'static str,
    pub fold: Fold,
}

impl FormColumn {
    pub fn recorded_name(&self) -> Option<String> {
        match self.fold {
            Fold::LatestRecorded => Some(format!("{}_last_recorded", self.name)),
            _ => None,
        }
    }
}

/// The entity a form aggregate row is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyColumn {
    CaseId,
    AwcId,
    SupervisorId,
}

impl KeyColumn {
    pub fn name(&self) -> &'static str {
        match self {
            KeyColumn::CaseId => "case_id",
            KeyColumn::AwcId => "awc_id",
            KeyColumn::SupervisorId => "supervisor_id",
        }
    }
}

#[derive(Debug)]
pub struct FormSpec {
    pub kind: FormKind,
    pub source_table: &'static str,
    pub target_table: &'static str,
    pub key: KeyColumn,
    /// Column of the source table holding the key.
    pub key_source: &'static str,
    /// Extra predicate over `ucr` narrowing a shared source table.
    pub filter: Option<&'static str>,
    pub columns: &'static [FormColumn],
}

impl FormSpec {
    /// Whether any column survives into the next month. Forms made only of in-month folds
    /// start every month empty.
    pub fn carries_forward(&self) -> bool {
        self.columns.iter().any(|c| c.fold.is_carried())
    }

    /// Columns of the unique key, deduplicated for supervisor-keyed forms.
    pub fn unique_key(&self) -> Vec<&'static str> {
        match self.key {
            KeyColumn::SupervisorId => vec!["supervisor_id", "month"],
            key => vec!["supervisor_id", key.name(), "month"],
        }
    }

    pub fn table_schema(&self) -> TableSchema {
        let mut columns = vec![
            ColumnDef::new("state_id", "TEXT", "NOT NULL"),
            ColumnDef::new("supervisor_id", "TEXT", "NOT NULL"),
            ColumnDef::new("month", "TEXT", "NOT NULL"),
        ];
        if self.key != KeyColumn::SupervisorId {
            columns.push(ColumnDef::new(self.key.name(), "TEXT", "NOT NULL"));
        }
        columns.push(ColumnDef::new(
            "latest_time_end_processed",
            "TEXT",
            "NOT NULL",
        ));
        for col in self.columns {
            let constraint = match col.fold {
                Fold::SumInMonth => "NOT NULL DEFAULT 0",
                _ => "",
            };
            columns.push(ColumnDef::new(col.name, col.column_type.sql(), constraint));
            if let Some(recorded) = col.recorded_name() {
                columns.push(ColumnDef::owned(recorded, "TEXT", ""));
            }
        }

        TableSchema {
            parent: self.target_table,
            columns,
            unique: self.unique_key().into_iter().map(String::from).collect(),
            indexes: vec![vec![self.key.name().to_owned()]],
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumString, IntoStaticStr,
)]
pub enum FormKind {
    #[strum(serialize = "aggregate_gm_forms")]
    GrowthMonitoring,
    #[strum(serialize = "aggregate_cf_forms")]
    ComplementaryFeeding,
    #[strum(serialize = "aggregate_ccs_cf_forms")]
    CcsComplementaryFeeding,
    #[strum(serialize = "aggregate_child_health_pnc_forms")]
    ChildPostnatalCare,
    #[strum(serialize = "aggregate_ccs_record_pnc_forms")]
    CcsPostnatalCare,
    #[strum(serialize = "aggregate_child_health_thr_forms")]
    ChildThr,
    #[strum(serialize = "aggregate_ccs_record_thr_forms")]
    CcsThr,
    #[strum(serialize = "aggregate_thr_images")]
    ThrImages,
    #[strum(serialize = "aggregate_bp_forms")]
    BirthPreparedness,
    #[strum(serialize = "aggregate_delivery_forms")]
    Delivery,
    #[strum(serialize = "aggregate_df_forms")]
    DailyFeeding,
    #[strum(serialize = "aggregate_awc_infra_forms")]
    Infrastructure,
    #[strum(serialize = "aggregate_daily_attendance")]
    DailyAttendance,
    #[strum(serialize = "aggregate_awc_usage")]
    AwcUsage,
    #[strum(serialize = "aggregate_ls_awc_visits")]
    LsAwcVisit,
    #[strum(serialize = "aggregate_ls_vhnd_forms")]
    LsVhnd,
}

impl FormKind {
    pub fn spec(&self) -> &'static FormSpec {
        match self {
            FormKind::GrowthMonitoring => &specs::GROWTH_MONITORING,
            FormKind::ComplementaryFeeding => &specs::COMPLEMENTARY_FEEDING,
            FormKind::CcsComplementaryFeeding => &specs::CCS_COMPLEMENTARY_FEEDING,
            FormKind::ChildPostnatalCare => &specs::CHILD_POSTNATAL_CARE,
            FormKind::CcsPostnatalCare => &specs::CCS_POSTNATAL_CARE,
            FormKind::ChildThr => &specs::CHILD_THR,
            FormKind::CcsThr => &specs::CCS_THR,
            FormKind::ThrImages => &specs::THR_IMAGES,
            FormKind::BirthPreparedness => &specs::BIRTH_PREPAREDNESS,
            FormKind::Delivery => &specs::DELIVERY,
            FormKind::DailyFeeding => &specs::DAILY_FEEDING,
            FormKind::Infrastructure => &specs::INFRASTRUCTURE,
            FormKind::DailyAttendance => &specs::DAILY_ATTENDANCE,
            FormKind::AwcUsage => &specs::AWC_USAGE,
            FormKind::LsAwcVisit => &specs::LS_AWC_VISIT,
            FormKind::LsVhnd => &specs::LS_VHND,
        }
    }

    pub fn specs() -> impl Iterator<Item = &'static FormSpec> {
        FormKind::iter().map(|kind| kind.spec())
    }

    pub fn aggregator(&self) -> FormAggregator {
        FormAggregator::new(self.spec())
    }

    pub fn stage_name(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage_name())
    }
}
