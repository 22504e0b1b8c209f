use chrono::NaiveDate;

use super::{
    form_source, partition_or_empty, ColumnKind, LeafContext, RollupColumn, RollupKind,
    RollupSpec,
};
use crate::error::AggError;
use crate::forms::{ColumnType, FormKind};
use crate::monthly::MonthlyKind;
use crate::partitions::PartitionManager;
use crate::sql::Sql;
use crate::utils::Utils;

use ColumnKind::{Flag, Launched, LeafOnly, Sum};
use ColumnType::{Integer, Text};

const fn sum(name: &'static str, leaf: &'static str) -> RollupColumn {
    RollupColumn {
        name,
        column_type: Integer,
        kind: Sum,
        leaf,
    }
}

const fn launched(name: &'static str, level: u8) -> RollupColumn {
    RollupColumn {
        name,
        column_type: Integer,
        kind: Launched(level),
        leaf: "loc.launched",
    }
}

fn fact_leaf(ctx: &LeafContext, kind: MonthlyKind, template: &'static str) -> Result<Sql, AggError> {
    Sql::render(
        template,
        &[("facts", Sql::ident(&kind.partition(ctx.month)?))],
    )
}

// Child health: one leaf row per awc, gender and age tranche.

fn child_health_from(ctx: &LeafContext) -> Result<Sql, AggError> {
    fact_leaf(
        ctx,
        MonthlyKind::ChildHealth,
        "FROM {facts} chm
         JOIN \"awc_location\" loc ON loc.awc_id = chm.awc_id AND loc.aggregation_level = 5",
    )
}

pub static AGG_CHILD_HEALTH: RollupSpec = RollupSpec {
    kind: RollupKind::ChildHealth,
    table: "agg_child_health",
    leaf_level: 5,
    dims: &[
        ("gender", "COALESCE(chm.sex, '')"),
        ("age_tranche", "COALESCE(CAST(chm.age_tranche AS TEXT), '')"),
    ],
    columns: &[
        sum("valid_in_month", "COALESCE(SUM(chm.valid_in_month), 0)"),
        sum(
            "valid_all_registered_in_month",
            "COALESCE(SUM(chm.valid_all_registered_in_month), 0)",
        ),
        sum("wer_eligible", "COALESCE(SUM(chm.wer_eligible), 0)"),
        sum("nutrition_status_weighed", "COALESCE(SUM(chm.nutrition_status_weighed), 0)"),
        sum(
            "nutrition_status_normal",
            "SUM(CASE WHEN chm.current_month_nutrition_status = 'normal' THEN 1 ELSE 0 END)",
        ),
        sum(
            "nutrition_status_moderately_underweight",
            "SUM(CASE WHEN chm.current_month_nutrition_status = 'moderately_underweight' THEN 1 ELSE 0 END)",
        ),
        sum(
            "nutrition_status_severely_underweight",
            "SUM(CASE WHEN chm.current_month_nutrition_status = 'severely_underweight' THEN 1 ELSE 0 END)",
        ),
        sum("height_eligible", "COALESCE(SUM(chm.height_eligible), 0)"),
        sum("height_measured_in_month", "COALESCE(SUM(chm.height_measured_in_month), 0)"),
        sum(
            "weighed_and_height_measured_in_month",
            "SUM(CASE WHEN chm.nutrition_status_weighed = 1 AND chm.height_measured_in_month = 1 \
                 THEN 1 ELSE 0 END)",
        ),
        sum(
            "stunting_severe",
            "SUM(CASE WHEN chm.current_month_stunting = 'severe' THEN 1 ELSE 0 END)",
        ),
        sum(
            "stunting_moderate",
            "SUM(CASE WHEN chm.current_month_stunting = 'moderate' THEN 1 ELSE 0 END)",
        ),
        sum(
            "stunting_normal",
            "SUM(CASE WHEN chm.current_month_stunting = 'normal' THEN 1 ELSE 0 END)",
        ),
        sum(
            "wasting_severe",
            "SUM(CASE WHEN chm.current_month_wasting = 'severe' THEN 1 ELSE 0 END)",
        ),
        sum(
            "wasting_moderate",
            "SUM(CASE WHEN chm.current_month_wasting = 'moderate' THEN 1 ELSE 0 END)",
        ),
        sum(
            "wasting_normal",
            "SUM(CASE WHEN chm.current_month_wasting = 'normal' THEN 1 ELSE 0 END)",
        ),
        sum("ebf_eligible", "COALESCE(SUM(chm.ebf_eligible), 0)"),
        sum("ebf_in_month", "COALESCE(SUM(chm.ebf_in_month), 0)"),
        sum("cf_eligible", "COALESCE(SUM(chm.cf_eligible), 0)"),
        sum("cf_in_month", "COALESCE(SUM(chm.cf_in_month), 0)"),
        sum("cf_initiation_eligible", "COALESCE(SUM(chm.cf_initiation_eligible), 0)"),
        sum("cf_initiation_in_month", "COALESCE(SUM(chm.cf_initiation_in_month), 0)"),
        sum("thr_eligible", "COALESCE(SUM(chm.thr_eligible), 0)"),
        sum(
            "rations_21_plus_distributed",
            "SUM(CASE WHEN chm.num_rations_distributed >= 21 THEN 1 ELSE 0 END)",
        ),
        sum("pse_eligible", "COALESCE(SUM(chm.pse_eligible), 0)"),
        sum(
            "pse_attended_16_days",
            "SUM(CASE WHEN chm.pse_days_attended >= 16 THEN 1 ELSE 0 END)",
        ),
        sum("pnc_eligible", "COALESCE(SUM(chm.pnc_eligible), 0)"),
        sum("born_in_month", "COALESCE(SUM(chm.born_in_month), 0)"),
        sum("bf_at_birth", "COALESCE(SUM(chm.bf_at_birth_born_in_month), 0)"),
        sum("low_birth_weight_in_month", "COALESCE(SUM(chm.low_birth_weight_born_in_month), 0)"),
        sum("fully_immunized_eligible", "COALESCE(SUM(chm.fully_immunized_eligible), 0)"),
        sum("fully_immunized_on_time", "COALESCE(SUM(chm.fully_immunized_on_time), 0)"),
        sum("fully_immunized_late", "COALESCE(SUM(chm.fully_immunized_late), 0)"),
        sum("immunization_in_month", "COALESCE(SUM(chm.immunization_in_month), 0)"),
    ],
    facts: Some(MonthlyKind::ChildHealth),
    leaf_grouped: true,
    leaf_from: child_health_from,
    form_inputs: &[],
};

// Pregnant and lactating women: one leaf row per awc, status and trimester.

fn ccs_record_from(ctx: &LeafContext) -> Result<Sql, AggError> {
    fact_leaf(
        ctx,
        MonthlyKind::CcsRecord,
        "FROM {facts} crm
         JOIN \"awc_location\" loc ON loc.awc_id = crm.awc_id AND loc.aggregation_level = 5",
    )
}

pub static AGG_CCS_RECORD: RollupSpec = RollupSpec {
    kind: RollupKind::CcsRecord,
    table: "agg_ccs_record",
    leaf_level: 5,
    dims: &[
        ("ccs_status", "COALESCE(crm.ccs_status, '')"),
        ("trimester", "COALESCE(CAST(crm.trimester AS TEXT), '')"),
    ],
    columns: &[
        sum("valid_in_month", "COALESCE(SUM(crm.valid_in_month), 0)"),
        sum("pregnant", "COALESCE(SUM(crm.pregnant), 0)"),
        sum("pregnant_all", "COALESCE(SUM(crm.pregnant_all), 0)"),
        sum("lactating", "COALESCE(SUM(crm.lactating), 0)"),
        sum("lactating_all", "COALESCE(SUM(crm.lactating_all), 0)"),
        sum("thr_eligible", "COALESCE(SUM(crm.thr_eligible), 0)"),
        sum(
            "rations_21_plus_distributed",
            "SUM(CASE WHEN crm.num_rations_distributed >= 21 THEN 1 ELSE 0 END)",
        ),
        sum("delivered_in_month", "COALESCE(SUM(crm.delivered_in_month), 0)"),
        sum(
            "institutional_delivery_in_month",
            "COALESCE(SUM(crm.institutional_delivery_in_month), 0)",
        ),
        sum("bf_at_birth", "COALESCE(SUM(crm.breastfed_at_birth), 0)"),
        sum("anc_in_month", "COALESCE(SUM(crm.anc_in_month), 0)"),
        sum("bp_visited_in_month", "COALESCE(SUM(crm.bp_visited_in_month), 0)"),
        sum("pnc_visited_in_month", "COALESCE(SUM(crm.pnc_visited_in_month), 0)"),
        sum("anemic_severe", "COALESCE(SUM(crm.anemic_severe), 0)"),
        sum("anemic_moderate", "COALESCE(SUM(crm.anemic_moderate), 0)"),
        sum("anemic_normal", "COALESCE(SUM(crm.anemic_normal), 0)"),
        sum("anemic_unknown", "COALESCE(SUM(crm.anemic_unknown), 0)"),
        sum("counsel_immediate_bf", "COALESCE(SUM(crm.counsel_immediate_bf), 0)"),
        sum("counsel_fp_methods", "COALESCE(SUM(crm.counsel_fp_methods), 0)"),
        sum("ebf_in_month", "COALESCE(SUM(crm.ebf_in_month), 0)"),
    ],
    facts: Some(MonthlyKind::CcsRecord),
    leaf_grouped: true,
    leaf_from: ccs_record_from,
    form_inputs: &[],
};

// AWC: one leaf row per awc in the snapshot, whether or not it reported.

const EMPTY_CHILD_LEVEL: &str = "(SELECT NULL AS awc_id, 0 AS valid_in_month, \
     0 AS valid_all_registered_in_month, 0 AS nutrition_status_weighed, 0 AS wer_eligible, \
     0 AS thr_eligible, 0 AS rations_21_plus_distributed, 0 AS immunization_in_month WHERE 0)";

const EMPTY_CCS_LEVEL: &str = "(SELECT NULL AS awc_id, 0 AS pregnant, 0 AS lactating, \
     0 AS thr_eligible, 0 AS rations_21_plus_distributed, 0 AS anc_in_month WHERE 0)";

const EMPTY_AWC_LEVEL: &str = "(SELECT NULL AS awc_id, 0 AS num_launched_awcs WHERE 0)";

const EMPTY_THR_IMAGES: &str =
    "(SELECT NULL AS awc_id, NULL AS month, 0 AS thr_images_count WHERE 0)";

const EMPTY_INFRA: &str = "(SELECT NULL AS awc_id, NULL AS month, \
     NULL AS latest_time_end_processed, NULL AS clean_water, NULL AS functional_toilet, \
     NULL AS electricity_awc, NULL AS infantometer, NULL AS stadiometer, \
     NULL AS adult_weighing_scale, NULL AS baby_weighing_scale WHERE 0)";

const EMPTY_ATTENDANCE: &str = "(SELECT NULL AS awc_id, NULL AS month, \
     0 AS awc_days_open, 0 AS awc_days_pse_conducted WHERE 0)";

const EMPTY_USAGE: &str = "(SELECT NULL AS awc_id, NULL AS month, 0 AS usage_num_pse, \
     0 AS usage_num_gmp, 0 AS usage_num_thr, 0 AS usage_num_hh_reg, 0 AS usage_num_add_person, \
     0 AS usage_num_add_pregnancy, 0 AS usage_num_home_visit, 0 AS usage_num_bp_tri1, \
     0 AS usage_num_bp_tri2, 0 AS usage_num_bp_tri3, 0 AS usage_num_pnc, 0 AS usage_num_ebf, \
     0 AS usage_num_cf, 0 AS usage_num_delivery, 0 AS usage_num_due_list_ccs, \
     0 AS usage_num_due_list_child_health WHERE 0)";

fn level_five(ctx: &LeafContext, kind: RollupKind, month: NaiveDate, empty: &'static str) -> Result<Sql, AggError> {
    partition_or_empty(ctx.conn, &PartitionManager::level_partition(kind.spec().table, month, 5)?, empty)
}

fn awc_from(ctx: &LeafContext) -> Result<Sql, AggError> {
    Sql::render(
        "FROM (
             SELECT l.*,
                 COALESCE(ch.cases_child_health, 0) AS cases_child_health,
                 COALESCE(ch.registered_children, 0) AS registered_children,
                 COALESCE(ch.wer_weighed, 0) AS wer_weighed,
                 COALESCE(ch.wer_eligible, 0) AS wer_eligible,
                 COALESCE(ch.thr_eligible, 0) AS thr_eligible_child,
                 COALESCE(ch.thr_rations_21_plus, 0) AS thr_rations_21_plus_child,
                 COALESCE(cc.pregnant, 0) AS cases_ccs_pregnant,
                 COALESCE(cc.lactating, 0) AS cases_ccs_lactating,
                 COALESCE(cc.thr_eligible, 0) AS thr_eligible_ccs,
                 COALESCE(cc.thr_rations_21_plus, 0) AS thr_rations_21_plus_ccs,
                 COALESCE(img.thr_images_count, 0) AS thr_images_count,
                 infra.clean_water AS infra_clean_water,
                 infra.functional_toilet AS infra_functional_toilet,
                 infra.electricity_awc AS electricity_awc,
                 infra.infantometer AS infantometer,
                 infra.stadiometer AS stadiometer,
                 infra.adult_weighing_scale AS infra_adult_weighing_scale,
                 infra.baby_weighing_scale AS infra_baby_weighing_scale,
                 infra.last_update AS infra_last_update_date,
                 COALESCE(ch.immunization_in_month, 0) AS num_children_immunized,
                 COALESCE(cc.anc_in_month, 0) AS num_anc_visits,
                 COALESCE(att.awc_days_open, 0) AS awc_days_open,
                 COALESCE(att.awc_days_pse_conducted, 0) AS awc_days_pse_conducted,
                 COALESCE(u.usage_num_pse, 0) AS usage_num_pse,
                 COALESCE(u.usage_num_gmp, 0) AS usage_num_gmp,
                 COALESCE(u.usage_num_thr, 0) AS usage_num_thr,
                 COALESCE(u.usage_num_hh_reg, 0) AS usage_num_hh_reg,
                 COALESCE(u.usage_num_add_person, 0) AS usage_num_add_person,
                 COALESCE(u.usage_num_add_pregnancy, 0) AS usage_num_add_pregnancy,
                 COALESCE(u.usage_num_home_visit, 0) AS usage_num_home_visit,
                 COALESCE(u.usage_num_bp_tri1, 0) AS usage_num_bp_tri1,
                 COALESCE(u.usage_num_bp_tri2, 0) AS usage_num_bp_tri2,
                 COALESCE(u.usage_num_bp_tri3, 0) AS usage_num_bp_tri3,
                 COALESCE(u.usage_num_pnc, 0) AS usage_num_pnc,
                 COALESCE(u.usage_num_ebf, 0) AS usage_num_ebf,
                 COALESCE(u.usage_num_cf, 0) AS usage_num_cf,
                 COALESCE(u.usage_num_delivery, 0) AS usage_num_delivery,
                 COALESCE(u.usage_num_due_list_ccs, 0) AS usage_num_due_list_ccs,
                 COALESCE(u.usage_num_due_list_child_health, 0) AS usage_num_due_list_child_health,
                 COALESCE(hh.cases_household, 0) AS cases_household,
                 COALESCE(p.cases_person, 0) AS cases_person,
                 COALESCE(p.cases_person_all, 0) AS cases_person_all,
                 COALESCE(p.cases_person_adolescent_girls_11_14, 0)
                     AS cases_person_adolescent_girls_11_14,
                 COALESCE(p.cases_person_adolescent_girls_11_14_all, 0)
                     AS cases_person_adolescent_girls_11_14_all,
                 COALESCE(p.cases_person_adolescent_girls_15_18, 0)
                     AS cases_person_adolescent_girls_15_18,
                 COALESCE(p.cases_person_adolescent_girls_15_18_all, 0)
                     AS cases_person_adolescent_girls_15_18_all,
                 COALESCE(p.cases_person_referred, 0) AS cases_person_referred,
                 CASE WHEN COALESCE(ch.cases_child_health, 0) + COALESCE(cc.pregnant, 0)
                         + COALESCE(cc.lactating, 0) + COALESCE(img.thr_images_count, 0)
                         + COALESCE(u.usage_num_hh_reg, 0) > 0
                       OR infra.last_update >= :month
                       OR COALESCE(prev.num_launched_awcs, 0) > 0
                      THEN 1 ELSE 0 END AS launched
             FROM \"awc_location\" l
             LEFT JOIN (
                 SELECT awc_id,
                     SUM(valid_in_month) AS cases_child_health,
                     SUM(valid_all_registered_in_month) AS registered_children,
                     SUM(nutrition_status_weighed) AS wer_weighed,
                     SUM(wer_eligible) AS wer_eligible,
                     SUM(thr_eligible) AS thr_eligible,
                     SUM(rations_21_plus_distributed) AS thr_rations_21_plus,
                     SUM(immunization_in_month) AS immunization_in_month
                 FROM {child} GROUP BY awc_id
             ) ch ON ch.awc_id = l.awc_id
             LEFT JOIN (
                 SELECT awc_id,
                     SUM(pregnant) AS pregnant,
                     SUM(lactating) AS lactating,
                     SUM(thr_eligible) AS thr_eligible,
                     SUM(rations_21_plus_distributed) AS thr_rations_21_plus,
                     SUM(anc_in_month) AS anc_in_month
                 FROM {ccs} GROUP BY awc_id
             ) cc ON cc.awc_id = l.awc_id
             LEFT JOIN (
                 SELECT awc_id, SUM(thr_images_count) AS thr_images_count
                 FROM {thr_images} WHERE month = :month GROUP BY awc_id
             ) img ON img.awc_id = l.awc_id
             LEFT JOIN (
                 SELECT awc_id,
                     MAX(clean_water) AS clean_water,
                     MAX(functional_toilet) AS functional_toilet,
                     MAX(electricity_awc) AS electricity_awc,
                     MAX(infantometer) AS infantometer,
                     MAX(stadiometer) AS stadiometer,
                     MAX(adult_weighing_scale) AS adult_weighing_scale,
                     MAX(baby_weighing_scale) AS baby_weighing_scale,
                     date(MAX(latest_time_end_processed)) AS last_update
                 FROM {infra} WHERE month = :month GROUP BY awc_id
             ) infra ON infra.awc_id = l.awc_id
             LEFT JOIN (
                 SELECT awc_id,
                     SUM(awc_days_open) AS awc_days_open,
                     SUM(awc_days_pse_conducted) AS awc_days_pse_conducted
                 FROM {attendance} WHERE month = :month GROUP BY awc_id
             ) att ON att.awc_id = l.awc_id
             LEFT JOIN (
                 SELECT awc_id,
                     SUM(usage_num_pse) AS usage_num_pse,
                     SUM(usage_num_gmp) AS usage_num_gmp,
                     SUM(usage_num_thr) AS usage_num_thr,
                     SUM(usage_num_hh_reg) AS usage_num_hh_reg,
                     SUM(usage_num_add_person) AS usage_num_add_person,
                     SUM(usage_num_add_pregnancy) AS usage_num_add_pregnancy,
                     SUM(usage_num_home_visit) AS usage_num_home_visit,
                     SUM(usage_num_bp_tri1) AS usage_num_bp_tri1,
                     SUM(usage_num_bp_tri2) AS usage_num_bp_tri2,
                     SUM(usage_num_bp_tri3) AS usage_num_bp_tri3,
                     SUM(usage_num_pnc) AS usage_num_pnc,
                     SUM(usage_num_ebf) AS usage_num_ebf,
                     SUM(usage_num_cf) AS usage_num_cf,
                     SUM(usage_num_delivery) AS usage_num_delivery,
                     SUM(usage_num_due_list_ccs) AS usage_num_due_list_ccs,
                     SUM(usage_num_due_list_child_health) AS usage_num_due_list_child_health
                 FROM {usage} WHERE month = :month GROUP BY awc_id
             ) u ON u.awc_id = l.awc_id
             LEFT JOIN (
                 SELECT awc_id, SUM(open_count) AS cases_household
                 FROM \"ucr_household_cases\"
                 WHERE opened_on < date(:month, '+1 month')
                 GROUP BY awc_id
             ) hh ON hh.awc_id = l.awc_id
             LEFT JOIN (
                 SELECT awc_id,
                     SUM(seeking) AS cases_person,
                     COUNT(*) AS cases_person_all,
                     SUM(seeking * girl_11_14) AS cases_person_adolescent_girls_11_14,
                     SUM(girl_11_14) AS cases_person_adolescent_girls_11_14_all,
                     SUM(seeking * girl_15_18) AS cases_person_adolescent_girls_15_18,
                     SUM(girl_15_18) AS cases_person_adolescent_girls_15_18_all,
                     SUM(seeking * referred) AS cases_person_referred
                 FROM (
                     SELECT awc_id,
                         CASE WHEN registered_status IS NOT 0 AND migration_status IS NOT 1
                              THEN 1 ELSE 0 END AS seeking,
                         CASE WHEN sex = 'F'
                               AND dob < date(:month, '+1 month', '-11 years')
                               AND dob >= date(:month, '-15 years')
                              THEN 1 ELSE 0 END AS girl_11_14,
                         CASE WHEN sex = 'F'
                               AND dob < date(:month, '+1 month', '-15 years')
                               AND dob >= date(:month, '-18 years')
                              THEN 1 ELSE 0 END AS girl_15_18,
                         CASE WHEN last_referral_date >= :month
                               AND last_referral_date < date(:month, '+1 month')
                              THEN 1 ELSE 0 END AS referred
                     FROM \"ucr_person_cases\"
                     WHERE opened_on < date(:month, '+1 month')
                       AND (closed_on IS NULL OR closed_on >= :month)
                 )
                 GROUP BY awc_id
             ) p ON p.awc_id = l.awc_id
             LEFT JOIN {previous} prev ON prev.awc_id = l.awc_id
             WHERE l.aggregation_level = 5
         ) loc",
        &[
            ("child", level_five(ctx, RollupKind::ChildHealth, ctx.month, EMPTY_CHILD_LEVEL)?),
            ("ccs", level_five(ctx, RollupKind::CcsRecord, ctx.month, EMPTY_CCS_LEVEL)?),
            (
                "previous",
                level_five(ctx, RollupKind::Awc, Utils::prev_month(ctx.month)?, EMPTY_AWC_LEVEL)?,
            ),
            ("thr_images", form_source(ctx.conn, FormKind::ThrImages, EMPTY_THR_IMAGES)?),
            ("infra", form_source(ctx.conn, FormKind::Infrastructure, EMPTY_INFRA)?),
            (
                "attendance",
                form_source(ctx.conn, FormKind::DailyAttendance, EMPTY_ATTENDANCE)?,
            ),
            ("usage", form_source(ctx.conn, FormKind::AwcUsage, EMPTY_USAGE)?),
        ],
    )
}

pub static AGG_AWC: RollupSpec = RollupSpec {
    kind: RollupKind::Awc,
    table: "agg_awc",
    leaf_level: 5,
    dims: &[],
    columns: &[
        sum("num_awcs", "1"),
        RollupColumn {
            name: "is_launched",
            column_type: Integer,
            kind: Flag,
            leaf: "loc.launched",
        },
        launched("num_launched_states", 1),
        launched("num_launched_districts", 2),
        launched("num_launched_blocks", 3),
        launched("num_launched_supervisors", 4),
        launched("num_launched_awcs", 5),
        sum("cases_child_health", "loc.cases_child_health"),
        sum("registered_children", "loc.registered_children"),
        sum("wer_weighed", "loc.wer_weighed"),
        sum("wer_eligible", "loc.wer_eligible"),
        sum("thr_eligible_child", "loc.thr_eligible_child"),
        sum("thr_rations_21_plus_child", "loc.thr_rations_21_plus_child"),
        sum("cases_ccs_pregnant", "loc.cases_ccs_pregnant"),
        sum("cases_ccs_lactating", "loc.cases_ccs_lactating"),
        sum("thr_eligible_ccs", "loc.thr_eligible_ccs"),
        sum("thr_rations_21_plus_ccs", "loc.thr_rations_21_plus_ccs"),
        sum("thr_images_count", "loc.thr_images_count"),
        sum("infra_clean_water", "COALESCE(loc.infra_clean_water, 0)"),
        sum("infra_functional_toilet", "COALESCE(loc.infra_functional_toilet, 0)"),
        sum("electricity_awc", "COALESCE(loc.electricity_awc, 0)"),
        sum("infantometer", "COALESCE(loc.infantometer, 0)"),
        sum("stadiometer", "COALESCE(loc.stadiometer, 0)"),
        sum("infra_adult_weighing_scale", "COALESCE(loc.infra_adult_weighing_scale, 0)"),
        sum("infra_baby_weighing_scale", "COALESCE(loc.infra_baby_weighing_scale, 0)"),
        sum(
            "num_awc_infra_last_update",
            "CASE WHEN loc.infra_last_update_date >= date(:month, '-6 months') THEN 1 ELSE 0 END",
        ),
        RollupColumn {
            name: "infra_last_update_date",
            column_type: Text,
            kind: LeafOnly,
            leaf: "loc.infra_last_update_date",
        },
        sum("awc_days_open", "loc.awc_days_open"),
        sum("awc_num_open", "CASE WHEN loc.awc_days_open > 0 THEN 1 ELSE 0 END"),
        sum("awc_days_pse_conducted", "loc.awc_days_pse_conducted"),
        sum("usage_num_pse", "loc.usage_num_pse"),
        sum("usage_num_gmp", "loc.usage_num_gmp"),
        sum("usage_num_thr", "loc.usage_num_thr"),
        sum("usage_num_hh_reg", "loc.usage_num_hh_reg"),
        sum("usage_num_add_person", "loc.usage_num_add_person"),
        sum("usage_num_add_pregnancy", "loc.usage_num_add_pregnancy"),
        sum("usage_num_home_visit", "loc.usage_num_home_visit"),
        sum("usage_num_bp_tri1", "loc.usage_num_bp_tri1"),
        sum("usage_num_bp_tri2", "loc.usage_num_bp_tri2"),
        sum("usage_num_bp_tri3", "loc.usage_num_bp_tri3"),
        sum("usage_num_pnc", "loc.usage_num_pnc"),
        sum("usage_num_ebf", "loc.usage_num_ebf"),
        sum("usage_num_cf", "loc.usage_num_cf"),
        sum("usage_num_delivery", "loc.usage_num_delivery"),
        sum("usage_num_due_list_ccs", "loc.usage_num_due_list_ccs"),
        sum("usage_num_due_list_child_health", "loc.usage_num_due_list_child_health"),
        sum(
            "usage_awc_num_active",
            "CASE WHEN loc.usage_num_due_list_ccs + loc.usage_num_due_list_child_health \
                 + loc.usage_num_pse + loc.usage_num_gmp + loc.usage_num_thr \
                 + loc.usage_num_home_visit + loc.usage_num_add_pregnancy \
                 + loc.usage_num_hh_reg >= 15 THEN 1 ELSE 0 END",
        ),
        sum("cases_household", "loc.cases_household"),
        sum("cases_person", "loc.cases_person"),
        sum("cases_person_all", "loc.cases_person_all"),
        sum("cases_person_adolescent_girls_11_14", "loc.cases_person_adolescent_girls_11_14"),
        sum(
            "cases_person_adolescent_girls_11_14_all",
            "loc.cases_person_adolescent_girls_11_14_all",
        ),
        sum("cases_person_adolescent_girls_15_18", "loc.cases_person_adolescent_girls_15_18"),
        sum(
            "cases_person_adolescent_girls_15_18_all",
            "loc.cases_person_adolescent_girls_15_18_all",
        ),
        sum("cases_person_referred", "loc.cases_person_referred"),
        sum(
            "cases_person_beneficiary_v2",
            "loc.cases_child_health + loc.cases_ccs_pregnant + loc.cases_ccs_lactating",
        ),
        sum("num_children_immunized", "loc.num_children_immunized"),
        sum("num_anc_visits", "loc.num_anc_visits"),
    ],
    facts: None,
    leaf_grouped: false,
    leaf_from: awc_from,
    form_inputs: &[
        FormKind::ThrImages,
        FormKind::Infrastructure,
        FormKind::DailyAttendance,
        FormKind::AwcUsage,
    ],
};

// Lady supervisors: one leaf row per supervisor.

const EMPTY_LS_VISITS: &str = "(SELECT NULL AS supervisor_id, NULL AS month, \
     0 AS awc_visits, 0 AS awc_visits_unscheduled WHERE 0)";

const EMPTY_LS_VHND: &str =
    "(SELECT NULL AS supervisor_id, NULL AS month, 0 AS vhnd_observed WHERE 0)";

fn ls_from(ctx: &LeafContext) -> Result<Sql, AggError> {
    Sql::render(
        "FROM (
             SELECT l.*,
                 COALESCE(v.awc_visits, 0) AS awc_visits,
                 COALESCE(v.awc_visits_unscheduled, 0) AS awc_visits_unscheduled,
                 COALESCE(h.vhnd_observed, 0) AS vhnd_observed,
                 CASE WHEN COALESCE(v.awc_visits, 0) + COALESCE(h.vhnd_observed, 0) > 0
                      THEN 1 ELSE 0 END AS launched
             FROM \"awc_location\" l
             LEFT JOIN (
                 SELECT supervisor_id,
                     SUM(awc_visits) AS awc_visits,
                     SUM(awc_visits_unscheduled) AS awc_visits_unscheduled
                 FROM {visits} WHERE month = :month GROUP BY supervisor_id
             ) v ON v.supervisor_id = l.supervisor_id
             LEFT JOIN (
                 SELECT supervisor_id, SUM(vhnd_observed) AS vhnd_observed
                 FROM {vhnd} WHERE month = :month GROUP BY supervisor_id
             ) h ON h.supervisor_id = l.supervisor_id
             WHERE l.aggregation_level = 4
         ) loc",
        &[
            ("visits", form_source(ctx.conn, FormKind::LsAwcVisit, EMPTY_LS_VISITS)?),
            ("vhnd", form_source(ctx.conn, FormKind::LsVhnd, EMPTY_LS_VHND)?),
        ],
    )
}

pub static AGG_LS: RollupSpec = RollupSpec {
    kind: RollupKind::Ls,
    table: "agg_ls",
    leaf_level: 4,
    dims: &[],
    columns: &[
        sum("num_supervisors", "1"),
        launched("num_launched_states", 1),
        launched("num_launched_districts", 2),
        launched("num_launched_blocks", 3),
        launched("num_launched_supervisors", 4),
        sum("awc_visits", "loc.awc_visits"),
        sum("awc_visits_unscheduled", "loc.awc_visits_unscheduled"),
        sum("vhnd_observed", "loc.vhnd_observed"),
    ],
    facts: None,
    leaf_grouped: false,
    leaf_from: ls_from,
    form_inputs: &[FormKind::LsAwcVisit, FormKind::LsVhnd],
};
