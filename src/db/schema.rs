pub const SCHEMA_VERSION: &str = "1";

pub const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1');

-- Control plane: one row per orchestration run
CREATE TABLE IF NOT EXISTS aggregation_record (
    agg_uuid TEXT PRIMARY KEY,
    agg_date TEXT NOT NULL,            -- first day of the month being processed
    run_date TEXT NOT NULL,
    state_ids TEXT NOT NULL,           -- JSON array, fixed at creation
    interval INTEGER NOT NULL,         -- 0 = current month, negative = backfill
    created_at TEXT NOT NULL
);

-- Per (stage, state) progress of a run. state_id is '' for all-state stages.
CREATE TABLE IF NOT EXISTS aggregation_stage (
    agg_uuid TEXT NOT NULL,
    stage TEXT NOT NULL,
    state_id TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL,           -- 0 = Pending, 1 = Running, 2 = Done, 3 = Failed
    attempts INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (agg_uuid, stage, state_id),
    FOREIGN KEY (agg_uuid) REFERENCES aggregation_record(agg_uuid)
);

CREATE TABLE IF NOT EXISTS partition_registry (
    partition_name TEXT PRIMARY KEY,
    parent_table TEXT NOT NULL,
    month TEXT NOT NULL,
    state_id TEXT,
    level INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_partition_registry_parent ON partition_registry (parent_table, month);

CREATE TABLE IF NOT EXISTS ucr_reconciliation_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    db_alias TEXT NOT NULL,
    day TEXT NOT NULL,
    table_id TEXT NOT NULL,
    doc_type_filter TEXT NOT NULL,
    documents_missing INTEGER,
    last_processed_date TEXT,
    verified_date TEXT,
    UNIQUE (db_alias, day, table_id, doc_type_filter)
);

-- Live location tree
CREATE TABLE IF NOT EXISTS locations (
    location_id TEXT PRIMARY KEY,
    domain TEXT NOT NULL,
    name TEXT NOT NULL,
    site_code TEXT NOT NULL DEFAULT '',
    location_type TEXT NOT NULL,
    parent_id TEXT,
    is_test INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_locations_domain_type ON locations (domain, location_type);

-- ICDS snapshot: state > district > block > supervisor > awc
CREATE TABLE IF NOT EXISTS awc_location (
    state_id TEXT NOT NULL,
    state_name TEXT,
    state_site_code TEXT,
    state_is_test INTEGER NOT NULL DEFAULT 0,
    district_id TEXT NOT NULL,
    district_name TEXT,
    district_site_code TEXT,
    district_is_test INTEGER NOT NULL DEFAULT 0,
    block_id TEXT NOT NULL,
    block_name TEXT,
    block_site_code TEXT,
    block_is_test INTEGER NOT NULL DEFAULT 0,
    supervisor_id TEXT NOT NULL,
    supervisor_name TEXT,
    supervisor_site_code TEXT,
    supervisor_is_test INTEGER NOT NULL DEFAULT 0,
    awc_id TEXT NOT NULL,
    awc_name TEXT,
    awc_site_code TEXT,
    awc_is_test INTEGER NOT NULL DEFAULT 0,
    aggregation_level INTEGER NOT NULL,
    UNIQUE (state_id, district_id, block_id, supervisor_id, awc_id)
);

CREATE INDEX IF NOT EXISTS idx_awc_location_awc ON awc_location (awc_id, aggregation_level);

-- AAA snapshot: state > district > taluka > phc > sc > village
CREATE TABLE IF NOT EXISTS village_location (
    state_id TEXT NOT NULL,
    state_name TEXT,
    state_site_code TEXT,
    state_is_test INTEGER NOT NULL DEFAULT 0,
    district_id TEXT NOT NULL,
    district_name TEXT,
    district_site_code TEXT,
    district_is_test INTEGER NOT NULL DEFAULT 0,
    taluka_id TEXT NOT NULL,
    taluka_name TEXT,
    taluka_site_code TEXT,
    taluka_is_test INTEGER NOT NULL DEFAULT 0,
    phc_id TEXT NOT NULL,
    phc_name TEXT,
    phc_site_code TEXT,
    phc_is_test INTEGER NOT NULL DEFAULT 0,
    sc_id TEXT NOT NULL,
    sc_name TEXT,
    sc_site_code TEXT,
    sc_is_test INTEGER NOT NULL DEFAULT 0,
    village_id TEXT NOT NULL,
    village_name TEXT,
    village_site_code TEXT,
    village_is_test INTEGER NOT NULL DEFAULT 0,
    aggregation_level INTEGER NOT NULL,
    UNIQUE (state_id, district_id, taluka_id, phc_id, sc_id, village_id)
);

-- Case snapshots produced by the UCR framework
CREATE TABLE IF NOT EXISTS ucr_child_health_cases (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    person_name TEXT,
    mother_name TEXT,
    sex TEXT,
    dob TEXT,
    opened_on TEXT,
    closed INTEGER NOT NULL DEFAULT 0,
    closed_on TEXT,
    date_death TEXT,
    is_availing INTEGER NOT NULL DEFAULT 1,
    is_migrated INTEGER NOT NULL DEFAULT 0,
    bf_at_birth TEXT,
    lbw_open_count INTEGER NOT NULL DEFAULT 0,
    immun_one_year_date TEXT
);

CREATE TABLE IF NOT EXISTS ucr_ccs_record_cases (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    person_name TEXT,
    dob TEXT,
    edd TEXT,
    delivery_date TEXT,
    opened_on TEXT,
    closed INTEGER NOT NULL DEFAULT 0,
    closed_on TEXT,
    date_death TEXT,
    is_availing INTEGER NOT NULL DEFAULT 1,
    is_migrated INTEGER NOT NULL DEFAULT 0
);

-- Form tables produced by the UCR framework. time_end is 'YYYY-MM-DD HH:MM:SS'.
CREATE TABLE IF NOT EXISTS ucr_growth_monitoring_forms (
    doc_id TEXT PRIMARY KEY,
    case_id TEXT,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    weight_child REAL,
    height_child REAL,
    zscore_grading_wfa INTEGER,
    zscore_grading_hfa INTEGER,
    zscore_grading_wfh INTEGER,
    muac_grading INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_complementary_feeding_forms (
    doc_id TEXT PRIMARY KEY,
    case_id TEXT,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    comp_feeding INTEGER,
    demo_comp_feeding INTEGER,
    counselled_pediatric_ifa INTEGER,
    play_comp_feeding_vid INTEGER,
    diet_diversity INTEGER,
    diet_quantity INTEGER,
    hand_wash INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_ccs_complementary_feeding_forms (
    doc_id TEXT PRIMARY KEY,
    ccs_record_case_id TEXT,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    play_comp_feeding_vid INTEGER,
    comp_feeding INTEGER,
    hand_wash INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_child_postnatal_forms (
    doc_id TEXT PRIMARY KEY,
    case_id TEXT,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    counsel_increase_food_bf INTEGER,
    counsel_breast INTEGER,
    skin_to_skin INTEGER,
    counsel_exclusive_bf INTEGER,
    counsel_only_milk INTEGER,
    counsel_adequate_bf INTEGER,
    is_ebf INTEGER,
    water_or_milk INTEGER,
    other_milk_to_child INTEGER,
    tea_other INTEGER,
    eating INTEGER,
    not_breastfeeding TEXT
);

CREATE TABLE IF NOT EXISTS ucr_ccs_postnatal_forms (
    doc_id TEXT PRIMARY KEY,
    ccs_record_case_id TEXT,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    counsel_methods INTEGER,
    is_ebf INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_thr_forms (
    doc_id TEXT PRIMARY KEY,
    case_id TEXT,
    beneficiary_type TEXT NOT NULL,     -- 'child' or 'ccs'
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    days_ration_given INTEGER,
    photo_thr TEXT
);

CREATE TABLE IF NOT EXISTS ucr_birth_preparedness_forms (
    doc_id TEXT PRIMARY KEY,
    ccs_record_case_id TEXT,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    immediate_breastfeeding INTEGER,
    anemia INTEGER,                     -- 1 = severe, 2 = moderate, 3 = normal
    eating_extra INTEGER,
    resting INTEGER,
    anc_weight INTEGER,
    anc_blood_pressure INTEGER,
    bp_sys INTEGER,
    bp_dia INTEGER,
    anc_hemoglobin REAL,
    bleeding INTEGER,
    swelling INTEGER,
    blurred_vision INTEGER,
    convulsions INTEGER,
    rupture INTEGER,
    anc_abnormalities INTEGER,
    using_ifa INTEGER,
    ifa_last_seven_days INTEGER,
    play_birth_preparedness_vid INTEGER,
    counsel_preparation INTEGER,
    play_family_planning_vid INTEGER,
    conceive INTEGER,
    counsel_accessible_ppfp INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_delivery_forms (
    doc_id TEXT PRIMARY KEY,
    ccs_record_case_id TEXT,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    breastfed_at_birth INTEGER,
    where_born INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_daily_feeding_forms (
    doc_id TEXT PRIMARY KEY,
    case_id TEXT,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    attended_child INTEGER,
    eligible_lunch INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_infrastructure_forms (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    clean_water INTEGER,
    functional_toilet INTEGER,
    electricity_awc INTEGER,
    infantometer INTEGER,
    stadiometer INTEGER,
    adult_weighing_scale INTEGER,
    baby_weighing_scale INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_ls_awc_visit_forms (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    visit_type TEXT
);

CREATE TABLE IF NOT EXISTS ucr_ls_vhnd_forms (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL
);

-- One form per awc per day the centre reports on
CREATE TABLE IF NOT EXISTS ucr_daily_attendance_forms (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    awc_open_count INTEGER,
    pse_conducted INTEGER
);

-- Per-form app usage flags; each column is 0 or 1
CREATE TABLE IF NOT EXISTS ucr_awc_usage_forms (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    time_end TEXT NOT NULL,
    pse INTEGER,
    gmp INTEGER,
    thr INTEGER,
    add_household INTEGER,
    add_person INTEGER,
    add_pregnancy INTEGER,
    home_visit INTEGER,
    bp_tri1 INTEGER,
    bp_tri2 INTEGER,
    bp_tri3 INTEGER,
    pnc INTEGER,
    ebf INTEGER,
    cf INTEGER,
    delivery INTEGER,
    due_list_ccs INTEGER,
    due_list_child INTEGER
);

CREATE TABLE IF NOT EXISTS ucr_household_cases (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    awc_id TEXT,
    opened_on TEXT,
    open_count INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_ucr_household_cases_awc ON ucr_household_cases (awc_id);

CREATE TABLE IF NOT EXISTS ucr_person_cases (
    doc_id TEXT PRIMARY KEY,
    state_id TEXT NOT NULL,
    supervisor_id TEXT,
    awc_id TEXT,
    sex TEXT,
    dob TEXT,
    opened_on TEXT,
    closed_on TEXT,
    registered_status INTEGER,          -- 0 = not registered
    migration_status INTEGER,           -- 1 = migrated
    last_referral_date TEXT
);

CREATE INDEX IF NOT EXISTS idx_ucr_person_cases_awc ON ucr_person_cases (awc_id);
"#;
