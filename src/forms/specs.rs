use super::{ColumnType::*, Fold::*, FormColumn, FormKind, FormSpec, KeyColumn};

const fn col(
    name: &'static str,
    column_type: super::ColumnType,
    source: &'static str,
    fold: super::Fold,
) -> FormColumn {
    FormColumn {
        name,
        column_type,
        source,
        fold,
    }
}

pub static GROWTH_MONITORING: FormSpec = FormSpec {
    kind: FormKind::GrowthMonitoring,
    source_table: "ucr_growth_monitoring_forms",
    target_table: "icds_dashboard_growth_monitoring_forms",
    key: KeyColumn::CaseId,
    key_source: "case_id",
    filter: None,
    columns: &[
        col("weight_child", Real, "ucr.weight_child", LatestRecorded),
        col("height_child", Real, "ucr.height_child", LatestRecorded),
        col("zscore_grading_wfa", Integer, "NULLIF(ucr.zscore_grading_wfa, 0)", LatestRecorded),
        col("zscore_grading_hfa", Integer, "NULLIF(ucr.zscore_grading_hfa, 0)", LatestRecorded),
        col("zscore_grading_wfh", Integer, "NULLIF(ucr.zscore_grading_wfh, 0)", LatestRecorded),
        col("muac_grading", Integer, "NULLIF(ucr.muac_grading, 0)", LatestRecorded),
    ],
};

pub static COMPLEMENTARY_FEEDING: FormSpec = FormSpec {
    kind: FormKind::ComplementaryFeeding,
    source_table: "ucr_complementary_feeding_forms",
    target_table: "icds_dashboard_comp_feed_form",
    key: KeyColumn::CaseId,
    key_source: "case_id",
    filter: None,
    columns: &[
        col("comp_feeding_ever", Integer, "ucr.comp_feeding", Ever),
        col("comp_feeding_latest", Integer, "ucr.comp_feeding", Latest),
        col("demo_comp_feeding", Integer, "ucr.demo_comp_feeding", LatestInMonth),
        col("counselled_pediatric_ifa", Integer, "ucr.counselled_pediatric_ifa", LatestInMonth),
        col("play_comp_feeding_vid", Integer, "ucr.play_comp_feeding_vid", LatestInMonth),
        col("diet_diversity", Integer, "ucr.diet_diversity", LatestInMonth),
        col("diet_quantity", Integer, "ucr.diet_quantity", LatestInMonth),
        col("hand_wash", Integer, "ucr.hand_wash", LatestInMonth),
    ],
};

pub static CCS_COMPLEMENTARY_FEEDING: FormSpec = FormSpec {
    kind: FormKind::CcsComplementaryFeeding,
    source_table: "ucr_ccs_complementary_feeding_forms",
    target_table: "icds_dashboard_ccs_record_cf_forms",
    key: KeyColumn::CaseId,
    key_source: "ccs_record_case_id",
    filter: None,
    columns: &[
        col("play_comp_feeding_vid", Integer, "ucr.play_comp_feeding_vid", Latest),
        col("comp_feeding", Integer, "ucr.comp_feeding", Latest),
        col("hand_wash", Integer, "ucr.hand_wash", LatestInMonth),
        col("valid_visits", Integer, "1", SumInMonth),
    ],
};

pub static CHILD_POSTNATAL_CARE: FormSpec = FormSpec {
    kind: FormKind::ChildPostnatalCare,
    source_table: "ucr_child_postnatal_forms",
    target_table: "icds_dashboard_child_health_postnatal_forms",
    key: KeyColumn::CaseId,
    key_source: "case_id",
    filter: None,
    columns: &[
        col("counsel_increase_food_bf", Integer, "ucr.counsel_increase_food_bf", Ever),
        col("counsel_breast", Integer, "ucr.counsel_breast", Ever),
        col("skin_to_skin", Integer, "ucr.skin_to_skin", Ever),
        col("counsel_exclusive_bf", Integer, "ucr.counsel_exclusive_bf", Ever),
        col("counsel_only_milk", Integer, "ucr.counsel_only_milk", Ever),
        col("counsel_adequate_bf", Integer, "ucr.counsel_adequate_bf", Ever),
        col("is_ebf", Integer, "ucr.is_ebf", LatestInMonth),
        col("water_or_milk", Integer, "ucr.water_or_milk", LatestInMonth),
        col("other_milk_to_child", Integer, "ucr.other_milk_to_child", LatestInMonth),
        col("tea_other", Integer, "ucr.tea_other", LatestInMonth),
        col("eating", Integer, "ucr.eating", LatestInMonth),
        col("not_breastfeeding", Text, "ucr.not_breastfeeding", LatestInMonth),
        col("valid_visits", Integer, "1", SumInMonth),
    ],
};

pub static CCS_POSTNATAL_CARE: FormSpec = FormSpec {
    kind: FormKind::CcsPostnatalCare,
    source_table: "ucr_ccs_postnatal_forms",
    target_table: "icds_dashboard_ccs_record_postnatal_forms",
    key: KeyColumn::CaseId,
    key_source: "ccs_record_case_id",
    filter: None,
    columns: &[
        col("counsel_methods", Integer, "ucr.counsel_methods", Ever),
        col("is_ebf", Integer, "ucr.is_ebf", LatestInMonth),
        col("valid_visits", Integer, "1", SumInMonth),
    ],
};

pub static CHILD_THR: FormSpec = FormSpec {
    kind: FormKind::ChildThr,
    source_table: "ucr_thr_forms",
    target_table: "icds_dashboard_child_health_thr_forms",
    key: KeyColumn::CaseId,
    key_source: "case_id",
    filter: Some("ucr.beneficiary_type = 'child'"),
    columns: &[col(
        "days_ration_given_child",
        Integer,
        "COALESCE(ucr.days_ration_given, 0)",
        SumInMonth,
    )],
};

pub static CCS_THR: FormSpec = FormSpec {
    kind: FormKind::CcsThr,
    source_table: "ucr_thr_forms",
    target_table: "icds_dashboard_ccs_record_thr_forms",
    key: KeyColumn::CaseId,
    key_source: "case_id",
    filter: Some("ucr.beneficiary_type = 'ccs'"),
    columns: &[col(
        "days_ration_given_mother",
        Integer,
        "COALESCE(ucr.days_ration_given, 0)",
        SumInMonth,
    )],
};

pub static THR_IMAGES: FormSpec = FormSpec {
    kind: FormKind::ThrImages,
    source_table: "ucr_thr_forms",
    target_table: "icds_dashboard_thr_images",
    key: KeyColumn::AwcId,
    key_source: "awc_id",
    filter: None,
    columns: &[col(
        "thr_images_count",
        Integer,
        "CASE WHEN ucr.photo_thr IS NOT NULL AND ucr.photo_thr != '' THEN 1 ELSE 0 END",
        SumInMonth,
    )],
};

pub static BIRTH_PREPAREDNESS: FormSpec = FormSpec {
    kind: FormKind::BirthPreparedness,
    source_table: "ucr_birth_preparedness_forms",
    target_table: "icds_dashboard_ccs_record_bp_forms",
    key: KeyColumn::CaseId,
    key_source: "ccs_record_case_id",
    filter: None,
    columns: &[
        col("immediate_breastfeeding", Integer, "ucr.immediate_breastfeeding", Latest),
        col("anemia", Integer, "NULLIF(ucr.anemia, 0)", LatestRecorded),
        col("eating_extra", Integer, "ucr.eating_extra", LatestInMonth),
        col("resting", Integer, "ucr.resting", LatestInMonth),
        col("anc_weight", Integer, "ucr.anc_weight", LatestInMonth),
        col("anc_blood_pressure", Integer, "ucr.anc_blood_pressure", LatestInMonth),
        col("bp_sys", Integer, "ucr.bp_sys", LatestInMonth),
        col("bp_dia", Integer, "ucr.bp_dia", LatestInMonth),
        col("anc_hemoglobin", Real, "ucr.anc_hemoglobin", LatestInMonth),
        col("bleeding", Integer, "ucr.bleeding", LatestInMonth),
        col("swelling", Integer, "ucr.swelling", LatestInMonth),
        col("blurred_vision", Integer, "ucr.blurred_vision", LatestInMonth),
        col("convulsions", Integer, "ucr.convulsions", LatestInMonth),
        col("rupture", Integer, "ucr.rupture", LatestInMonth),
        col("anc_abnormalities", Integer, "ucr.anc_abnormalities", LatestInMonth),
        col("using_ifa", Integer, "ucr.using_ifa", LatestInMonth),
        col("ifa_last_seven_days", Integer, "ucr.ifa_last_seven_days", LatestInMonth),
        col("play_birth_preparedness_vid", Integer, "ucr.play_birth_preparedness_vid", Ever),
        col("counsel_preparation", Integer, "ucr.counsel_preparation", Ever),
        col("play_family_planning_vid", Integer, "ucr.play_family_planning_vid", Ever),
        col("conceive", Integer, "ucr.conceive", Latest),
        col("counsel_accessible_ppfp", Integer, "ucr.counsel_accessible_ppfp", Ever),
        col("valid_visits", Integer, "1", SumInMonth),
    ],
};

pub static DELIVERY: FormSpec = FormSpec {
    kind: FormKind::Delivery,
    source_table: "ucr_delivery_forms",
    target_table: "icds_dashboard_ccs_record_delivery_forms",
    key: KeyColumn::CaseId,
    key_source: "ccs_record_case_id",
    filter: None,
    columns: &[
        col("breastfed_at_birth", Integer, "ucr.breastfed_at_birth", Latest),
        // 1 = home, 2 = institution
        col("where_born", Integer, "NULLIF(ucr.where_born, 0)", Latest),
        col("valid_visits", Integer, "1", SumInMonth),
    ],
};

pub static DAILY_FEEDING: FormSpec = FormSpec {
    kind: FormKind::DailyFeeding,
    source_table: "ucr_daily_feeding_forms",
    target_table: "icds_dashboard_daily_feeding_forms",
    key: KeyColumn::CaseId,
    key_source: "case_id",
    filter: None,
    columns: &[
        col("sum_attended_child_ids", Integer, "COALESCE(ucr.attended_child, 0)", SumInMonth),
        col("lunch_count", Integer, "COALESCE(ucr.eligible_lunch, 0)", SumInMonth),
    ],
};

pub static INFRASTRUCTURE: FormSpec = FormSpec {
    kind: FormKind::Infrastructure,
    source_table: "ucr_infrastructure_forms",
    target_table: "icds_dashboard_infrastructure_forms",
    key: KeyColumn::AwcId,
    key_source: "awc_id",
    filter: None,
    columns: &[
        col("clean_water", Integer, "ucr.clean_water", Latest),
        col("functional_toilet", Integer, "ucr.functional_toilet", Latest),
        col("electricity_awc", Integer, "ucr.electricity_awc", Latest),
        col("infantometer", Integer, "ucr.infantometer", Latest),
        col("stadiometer", Integer, "ucr.stadiometer", Latest),
        col("adult_weighing_scale", Integer, "ucr.adult_weighing_scale", Latest),
        col("baby_weighing_scale", Integer, "ucr.baby_weighing_scale", Latest),
    ],
};

pub static DAILY_ATTENDANCE: FormSpec = FormSpec {
    kind: FormKind::DailyAttendance,
    source_table: "ucr_daily_attendance_forms",
    target_table: "icds_dashboard_daily_attendance",
    key: KeyColumn::AwcId,
    key_source: "awc_id",
    filter: None,
    columns: &[
        col("awc_days_open", Integer, "COALESCE(ucr.awc_open_count, 0)", SumInMonth),
        col("awc_days_pse_conducted", Integer, "COALESCE(ucr.pse_conducted, 0)", SumInMonth),
    ],
};

pub static AWC_USAGE: FormSpec = FormSpec {
    kind: FormKind::AwcUsage,
    source_table: "ucr_awc_usage_forms",
    target_table: "icds_dashboard_awc_usage",
    key: KeyColumn::AwcId,
    key_source: "awc_id",
    filter: None,
    columns: &[
        col("usage_num_pse", Integer, "COALESCE(ucr.pse, 0)", SumInMonth),
        col("usage_num_gmp", Integer, "COALESCE(ucr.gmp, 0)", SumInMonth),
        col("usage_num_thr", Integer, "COALESCE(ucr.thr, 0)", SumInMonth),
        col("usage_num_hh_reg", Integer, "COALESCE(ucr.add_household, 0)", SumInMonth),
        col("usage_num_add_person", Integer, "COALESCE(ucr.add_person, 0)", SumInMonth),
        col("usage_num_add_pregnancy", Integer, "COALESCE(ucr.add_pregnancy, 0)", SumInMonth),
        col("usage_num_home_visit", Integer, "COALESCE(ucr.home_visit, 0)", SumInMonth),
        col("usage_num_bp_tri1", Integer, "COALESCE(ucr.bp_tri1, 0)", SumInMonth),
        col("usage_num_bp_tri2", Integer, "COALESCE(ucr.bp_tri2, 0)", SumInMonth),
        col("usage_num_bp_tri3", Integer, "COALESCE(ucr.bp_tri3, 0)", SumInMonth),
        col("usage_num_pnc", Integer, "COALESCE(ucr.pnc, 0)", SumInMonth),
        col("usage_num_ebf", Integer, "COALESCE(ucr.ebf, 0)", SumInMonth),
        col("usage_num_cf", Integer, "COALESCE(ucr.cf, 0)", SumInMonth),
        col("usage_num_delivery", Integer, "COALESCE(ucr.delivery, 0)", SumInMonth),
        col("usage_num_due_list_ccs", Integer, "COALESCE(ucr.due_list_ccs, 0)", SumInMonth),
        col(
            "usage_num_due_list_child_health",
            Integer,
            "COALESCE(ucr.due_list_child, 0)",
            SumInMonth,
        ),
    ],
};

pub static LS_AWC_VISIT: FormSpec = FormSpec {
    kind: FormKind::LsAwcVisit,
    source_table: "ucr_ls_awc_visit_forms",
    target_table: "icds_dashboard_ls_awc_visits",
    key: KeyColumn::SupervisorId,
    key_source: "supervisor_id",
    filter: None,
    columns: &[
        col("awc_visits", Integer, "1", SumInMonth),
        col(
            "awc_visits_unscheduled",
            Integer,
            "CASE WHEN ucr.visit_type = 'unscheduled' THEN 1 ELSE 0 END",
            SumInMonth,
        ),
    ],
};

pub static LS_VHND: FormSpec = FormSpec {
    kind: FormKind::LsVhnd,
    source_table: "ucr_ls_vhnd_forms",
    target_table: "icds_dashboard_ls_vhnd",
    key: KeyColumn::SupervisorId,
    key_source: "supervisor_id",
    filter: None,
    columns: &[col("vhnd_observed", Integer, "1", SumInMonth)],
};
