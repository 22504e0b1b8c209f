use super::{fact, FactDefinition, MonthlyColumn};
use crate::forms::{ColumnType::*, FormKind};
use crate::sql::Sql;

pub(super) static DEFINITION: FactDefinition = FactDefinition {
    parent: "child_health_monthly",
    case_table: "ucr_child_health_cases",
    case_alias: "ch",
    inputs: &[
        (FormKind::GrowthMonitoring, "gm"),
        (FormKind::ComplementaryFeeding, "cf"),
        (FormKind::ChildPostnatalCare, "pnc"),
        (FormKind::ChildThr, "thr"),
        (FormKind::DailyFeeding, "df"),
    ],
    columns: COLUMNS,
    fragments,
};

/// Ages are in months of 30.4 days, measured at the start and at the end of the month.
fn fragments(with_previous: bool) -> Vec<(&'static str, Sql)> {
    let carried = |col: &str| {
        if with_previous {
            format!("COALESCE(ch.{col}, prev.{col})")
        } else {
            format!("ch.{col}")
        }
    };
    let dob = carried("dob");
    let supervisor_id = if with_previous {
        "COALESCE(ch.supervisor_id, prev.supervisor_id, '')".to_owned()
    } else {
        "COALESCE(ch.supervisor_id, '')".to_owned()
    };

    let age_in_days = format!("(julianday(:month_end) - julianday({dob}))");
    let age_in_months = format!("((julianday(:month) - julianday({dob})) / 30.4)");
    let age_in_months_end = format!("({age_in_days} / 30.4)");

    let open_in_month = "COALESCE((julianday(:month_end) - julianday(ch.opened_on) >= 0 \
         AND (ch.closed = 0 OR julianday(ch.closed_on) - julianday(:month) > 0)), 0)"
        .to_owned();
    let alive_in_month =
        "COALESCE((ch.date_death IS NULL OR julianday(ch.date_death) - julianday(:month) >= 0), 0)"
            .to_owned();
    let seeking_services = "(ch.is_availing = 1 AND ch.is_migrated = 0)".to_owned();
    let born_in_month =
        format!("COALESCE(({seeking_services} AND {dob} BETWEEN :month AND :month_end), 0)");
    let valid_in_month = format!(
        "COALESCE(({open_in_month} AND {alive_in_month} AND {seeking_services} AND {age_in_months} <= 72), 0)"
    );
    let valid_all_registered = format!(
        "COALESCE(({open_in_month} AND {alive_in_month} AND {age_in_months} <= 72 AND ch.is_migrated = 0), 0)"
    );
    let eligible = |rule: String| format!("COALESCE(({valid_in_month} AND {rule}), 0)");
    let pse_eligible = eligible(format!("{age_in_months_end} > 36"));
    let ebf_eligible = eligible(format!("{age_in_months} <= 6"));
    let wer_eligible = eligible(format!("{age_in_months} <= 60"));
    let cf_eligible = eligible(format!("{age_in_months_end} > 6 AND {age_in_months} <= 24"));
    let cf_initiation_eligible =
        eligible(format!("{age_in_months_end} > 6 AND {age_in_months} <= 8"));
    let thr_eligible = eligible(format!("{age_in_months_end} > 6 AND {age_in_months} <= 36"));
    let pnc_eligible = eligible(format!(
        "julianday(:month_end) - julianday({dob}) > 0 AND julianday(:month) - julianday({dob}) <= 20"
    ));
    let height_eligible = eligible(format!("{age_in_months_end} > 6 AND {age_in_months} <= 60"));
    let fully_immunized_eligible = eligible(format!("{age_in_months_end} > 12"));
    let immunized_age_in_days = format!("(julianday(ch.immun_one_year_date) - julianday({dob}))");

    vec![
        ("sex", Sql::composed(carried("sex"))),
        ("dob", Sql::composed(dob.clone())),
        ("person_name", Sql::composed(carried("person_name"))),
        ("mother_name", Sql::composed(carried("mother_name"))),
        ("supervisor_id", Sql::composed(supervisor_id)),
        ("age_in_days", Sql::composed(age_in_days)),
        ("age_in_months", Sql::composed(age_in_months)),
        ("age_in_months_end", Sql::composed(age_in_months_end)),
        ("open_in_month", Sql::composed(open_in_month)),
        ("alive_in_month", Sql::composed(alive_in_month)),
        ("born_in_month", Sql::composed(born_in_month)),
        ("valid_in_month", Sql::composed(valid_in_month)),
        ("valid_all_registered", Sql::composed(valid_all_registered)),
        ("pse_eligible", Sql::composed(pse_eligible)),
        ("ebf_eligible", Sql::composed(ebf_eligible)),
        ("wer_eligible", Sql::composed(wer_eligible)),
        ("cf_eligible", Sql::composed(cf_eligible)),
        ("cf_initiation_eligible", Sql::composed(cf_initiation_eligible)),
        ("thr_eligible", Sql::composed(thr_eligible)),
        ("pnc_eligible", Sql::composed(pnc_eligible)),
        ("height_eligible", Sql::composed(height_eligible)),
        ("fully_immunized_eligible", Sql::composed(fully_immunized_eligible)),
        ("immunized_age_in_days", Sql::composed(immunized_age_in_days)),
    ]
}

static COLUMNS: &[MonthlyColumn] = &[
    fact("sex", Text, "{sex}"),
    fact("dob", Text, "{dob}"),
    fact("person_name", Text, "{person_name}"),
    fact("mother_name", Text, "{mother_name}"),
    fact("age_in_months", Integer, "CAST({age_in_months_end} AS INTEGER)"),
    fact(
        "age_tranche",
        Integer,
        "CASE WHEN {age_in_days} <= 28 THEN 0 \
              WHEN {age_in_months} <= 6 THEN 6 \
              WHEN {age_in_months} <= 12 THEN 12 \
              WHEN {age_in_months} <= 24 THEN 24 \
              WHEN {age_in_months} <= 36 THEN 36 \
              WHEN {age_in_months} <= 48 THEN 48 \
              WHEN {age_in_months} <= 60 THEN 60 \
              WHEN {age_in_months} <= 72 THEN 72 \
         ELSE NULL END",
    ),
    fact("open_in_month", Integer, "CASE WHEN {open_in_month} THEN 1 ELSE 0 END"),
    fact("alive_in_month", Integer, "CASE WHEN {alive_in_month} THEN 1 ELSE 0 END"),
    fact("born_in_month", Integer, "CASE WHEN {born_in_month} THEN 1 ELSE 0 END"),
    fact(
        "bf_at_birth_born_in_month",
        Integer,
        "CASE WHEN {born_in_month} AND ch.bf_at_birth = 'yes' THEN 1 ELSE 0 END",
    ),
    fact(
        "low_birth_weight_born_in_month",
        Integer,
        "CASE WHEN {born_in_month} AND ch.lbw_open_count = 1 THEN 1 ELSE 0 END",
    ),
    fact("valid_in_month", Integer, "CASE WHEN {valid_in_month} THEN 1 ELSE 0 END"),
    fact(
        "valid_all_registered_in_month",
        Integer,
        "CASE WHEN {valid_all_registered} THEN 1 ELSE 0 END",
    ),
    fact(
        "fully_immunized_eligible",
        Integer,
        "CASE WHEN {fully_immunized_eligible} THEN 1 ELSE 0 END",
    ),
    fact(
        "fully_immunized_on_time",
        Integer,
        "CASE WHEN {fully_immunized_eligible} AND {immunized_age_in_days} <= 365 \
              AND ch.immun_one_year_date < :month_end THEN 1 ELSE 0 END",
    ),
    fact(
        "fully_immunized_late",
        Integer,
        "CASE WHEN {fully_immunized_eligible} AND {immunized_age_in_days} > 365 \
              AND ch.immun_one_year_date < :month_end THEN 1 ELSE 0 END",
    ),
    fact(
        "immunization_in_month",
        Integer,
        "CASE WHEN {valid_in_month} AND ch.immun_one_year_date BETWEEN :month AND :month_end \
         THEN 1 ELSE 0 END",
    ),
    // Preschool education and daily feeding
    fact("pse_eligible", Integer, "CASE WHEN {pse_eligible} THEN 1 ELSE 0 END"),
    fact(
        "pse_days_attended",
        Integer,
        "CASE WHEN {pse_eligible} THEN COALESCE(df.sum_attended_child_ids, 0) ELSE NULL END",
    ),
    fact(
        "lunch_count",
        Integer,
        "CASE WHEN {pse_eligible} THEN COALESCE(df.lunch_count, 0) ELSE NULL END",
    ),
    // Exclusive breastfeeding
    fact("ebf_eligible", Integer, "CASE WHEN {ebf_eligible} THEN 1 ELSE 0 END"),
    fact(
        "ebf_in_month",
        Integer,
        "CASE WHEN {ebf_eligible} THEN COALESCE(pnc.is_ebf, 0) ELSE 0 END",
    ),
    fact(
        "ebf_not_breastfeeding_reason",
        Text,
        "CASE WHEN {ebf_eligible} THEN pnc.not_breastfeeding ELSE NULL END",
    ),
    fact(
        "ebf_drinking_liquid",
        Integer,
        "CASE WHEN {ebf_eligible} THEN MAX(COALESCE(pnc.water_or_milk, 0), \
              COALESCE(pnc.other_milk_to_child, 0), COALESCE(pnc.tea_other, 0)) ELSE 0 END",
    ),
    fact(
        "ebf_eating",
        Integer,
        "CASE WHEN {ebf_eligible} THEN COALESCE(pnc.eating, 0) ELSE 0 END",
    ),
    fact(
        "counsel_adequate_bf",
        Integer,
        "CASE WHEN {ebf_eligible} THEN COALESCE(pnc.counsel_adequate_bf, 0) ELSE 0 END",
    ),
    fact(
        "ebf_no_info_recorded",
        Integer,
        "CASE WHEN {ebf_eligible} AND date(pnc.latest_time_end_processed, 'start of month') = :month THEN 0 \
              WHEN {ebf_eligible} THEN 1 ELSE 0 END",
    ),
    fact(
        "counsel_ebf",
        Integer,
        "CASE WHEN {ebf_eligible} THEN MAX(COALESCE(pnc.counsel_exclusive_bf, 0), \
              COALESCE(pnc.counsel_only_milk, 0)) ELSE 0 END",
    ),
    // Postnatal care
    fact("pnc_eligible", Integer, "CASE WHEN {pnc_eligible} THEN 1 ELSE 0 END"),
    fact(
        "counsel_increase_food_bf",
        Integer,
        "CASE WHEN {pnc_eligible} THEN COALESCE(pnc.counsel_increase_food_bf, 0) ELSE 0 END",
    ),
    fact(
        "counsel_manage_breast_problems",
        Integer,
        "CASE WHEN {pnc_eligible} THEN COALESCE(pnc.counsel_breast, 0) ELSE 0 END",
    ),
    fact(
        "counsel_skin_to_skin",
        Integer,
        "CASE WHEN {pnc_eligible} THEN COALESCE(pnc.skin_to_skin, 0) ELSE 0 END",
    ),
    // Growth monitoring
    fact("wer_eligible", Integer, "CASE WHEN {wer_eligible} THEN 1 ELSE 0 END"),
    fact(
        "nutrition_status_last_recorded",
        Text,
        "CASE WHEN NOT {wer_eligible} THEN NULL \
              WHEN gm.zscore_grading_wfa = 1 THEN 'severely_underweight' \
              WHEN gm.zscore_grading_wfa = 2 THEN 'moderately_underweight' \
              WHEN gm.zscore_grading_wfa IN (3, 4) THEN 'normal' \
         ELSE 'unknown' END",
    ),
    fact(
        "current_month_nutrition_status",
        Text,
        "CASE WHEN NOT {wer_eligible} THEN NULL \
              WHEN date(gm.zscore_grading_wfa_last_recorded, 'start of month') != :month THEN 'unweighed' \
              WHEN gm.zscore_grading_wfa = 1 THEN 'severely_underweight' \
              WHEN gm.zscore_grading_wfa = 2 THEN 'moderately_underweight' \
              WHEN gm.zscore_grading_wfa IN (3, 4) THEN 'normal' \
         ELSE 'unweighed' END",
    ),
    fact(
        "nutrition_status_weighed",
        Integer,
        "CASE WHEN {wer_eligible} \
              AND date(gm.zscore_grading_wfa_last_recorded, 'start of month') = :month THEN 1 \
         ELSE 0 END",
    ),
    fact(
        "recorded_weight",
        Real,
        "CASE WHEN NOT {wer_eligible} THEN NULL \
              WHEN date(gm.weight_child_last_recorded, 'start of month') = :month THEN gm.weight_child \
         ELSE NULL END",
    ),
    fact(
        "recorded_height",
        Real,
        "CASE WHEN date(gm.height_child_last_recorded, 'start of month') = :month THEN gm.height_child \
         ELSE NULL END",
    ),
    fact("height_eligible", Integer, "CASE WHEN {height_eligible} THEN 1 ELSE 0 END"),
    fact(
        "height_measured_in_month",
        Integer,
        "CASE WHEN date(gm.height_child_last_recorded, 'start of month') = :month \
              AND {height_eligible} THEN 1 ELSE 0 END",
    ),
    fact(
        "current_month_stunting",
        Text,
        "CASE WHEN NOT {height_eligible} THEN NULL \
              WHEN date(gm.zscore_grading_hfa_last_recorded, 'start of month') != :month THEN 'unmeasured' \
              WHEN gm.zscore_grading_hfa = 1 THEN 'severe' \
              WHEN gm.zscore_grading_hfa = 2 THEN 'moderate' \
              WHEN gm.zscore_grading_hfa = 3 THEN 'normal' \
         ELSE 'unmeasured' END",
    ),
    fact(
        "stunting_last_recorded",
        Text,
        "CASE WHEN NOT {height_eligible} THEN NULL \
              WHEN gm.zscore_grading_hfa = 1 THEN 'severe' \
              WHEN gm.zscore_grading_hfa = 2 THEN 'moderate' \
              WHEN gm.zscore_grading_hfa = 3 THEN 'normal' \
         ELSE 'unknown' END",
    ),
    fact(
        "wasting_last_recorded",
        Text,
        "CASE WHEN NOT {height_eligible} THEN NULL \
              WHEN gm.zscore_grading_wfh = 1 THEN 'severe' \
              WHEN gm.zscore_grading_wfh = 2 THEN 'moderate' \
              WHEN gm.zscore_grading_wfh = 3 THEN 'normal' \
         ELSE 'unknown' END",
    ),
    fact(
        "current_month_wasting",
        Text,
        "CASE WHEN NOT {height_eligible} THEN NULL \
              WHEN date(gm.zscore_grading_wfh_last_recorded, 'start of month') != :month THEN 'unmeasured' \
              WHEN gm.zscore_grading_wfh = 1 THEN 'severe' \
              WHEN gm.zscore_grading_wfh = 2 THEN 'moderate' \
              WHEN gm.zscore_grading_wfh = 3 THEN 'normal' \
         ELSE 'unmeasured' END",
    ),
    fact("zscore_grading_hfa", Integer, "gm.zscore_grading_hfa"),
    fact(
        "zscore_grading_hfa_recorded_in_month",
        Integer,
        "CASE WHEN date(gm.zscore_grading_hfa_last_recorded, 'start of month') = :month THEN 1 ELSE 0 END",
    ),
    fact("zscore_grading_wfh", Integer, "gm.zscore_grading_wfh"),
    fact(
        "zscore_grading_wfh_recorded_in_month",
        Integer,
        "CASE WHEN date(gm.zscore_grading_wfh_last_recorded, 'start of month') = :month THEN 1 ELSE 0 END",
    ),
    fact("muac_grading", Integer, "gm.muac_grading"),
    fact(
        "muac_grading_recorded_in_month",
        Integer,
        "CASE WHEN date(gm.muac_grading_last_recorded, 'start of month') = :month THEN 1 ELSE 0 END",
    ),
    // Complementary feeding
    fact("cf_eligible", Integer, "CASE WHEN {cf_eligible} THEN 1 ELSE 0 END"),
    fact(
        "cf_initiation_eligible",
        Integer,
        "CASE WHEN {cf_initiation_eligible} THEN 1 ELSE 0 END",
    ),
    fact(
        "cf_in_month",
        Integer,
        "CASE WHEN {cf_eligible} THEN COALESCE(cf.comp_feeding_latest, 0) ELSE 0 END",
    ),
    fact(
        "cf_diet_diversity",
        Integer,
        "CASE WHEN {cf_eligible} THEN COALESCE(cf.diet_diversity, 0) ELSE 0 END",
    ),
    fact(
        "cf_diet_quantity",
        Integer,
        "CASE WHEN {cf_eligible} THEN COALESCE(cf.diet_quantity, 0) ELSE 0 END",
    ),
    fact(
        "cf_handwashing",
        Integer,
        "CASE WHEN {cf_eligible} THEN COALESCE(cf.hand_wash, 0) ELSE 0 END",
    ),
    fact(
        "cf_demo",
        Integer,
        "CASE WHEN {cf_eligible} THEN COALESCE(cf.demo_comp_feeding, 0) ELSE 0 END",
    ),
    fact(
        "counsel_pediatric_ifa",
        Integer,
        "CASE WHEN {cf_eligible} THEN COALESCE(cf.counselled_pediatric_ifa, 0) ELSE 0 END",
    ),
    fact(
        "counsel_comp_feeding_vid",
        Integer,
        "CASE WHEN {cf_eligible} THEN COALESCE(cf.play_comp_feeding_vid, 0) ELSE 0 END",
    ),
    fact(
        "cf_initiation_in_month",
        Integer,
        "CASE WHEN {cf_initiation_eligible} THEN COALESCE(cf.comp_feeding_ever, 0) ELSE 0 END",
    ),
    // Take-home rations
    fact("thr_eligible", Integer, "CASE WHEN {thr_eligible} THEN 1 ELSE 0 END"),
    fact(
        "num_rations_distributed",
        Integer,
        "CASE WHEN {thr_eligible} THEN COALESCE(thr.days_ration_given_child, 0) ELSE NULL END",
    ),
    fact("days_ration_given_child", Integer, "thr.days_ration_given_child"),
];
