use super::{fact, FactDefinition, MonthlyColumn};
use crate::forms::{ColumnType::*, FormKind};
use crate::sql::Sql;

pub(super) static DEFINITION: FactDefinition = FactDefinition {
    parent: "ccs_record_monthly",
    case_table: "ucr_ccs_record_cases",
    case_alias: "ccs",
    inputs: &[
        (FormKind::BirthPreparedness, "bp"),
        (FormKind::Delivery, "del"),
        (FormKind::CcsPostnatalCare, "pnc"),
        (FormKind::CcsThr, "thr"),
        (FormKind::CcsComplementaryFeeding, "cf"),
    ],
    columns: COLUMNS,
    fragments,
};

/// A mother is lactating for 183 days after delivery.
fn fragments(with_previous: bool) -> Vec<(&'static str, Sql)> {
    let carried = |col: &str| {
        if with_previous {
            format!("COALESCE(ccs.{col}, prev.{col})")
        } else {
            format!("ccs.{col}")
        }
    };
    let supervisor_id = if with_previous {
        "COALESCE(ccs.supervisor_id, prev.supervisor_id, '')".to_owned()
    } else {
        "COALESCE(ccs.supervisor_id, '')".to_owned()
    };
    let edd = carried("edd");
    let delivery_date = "ccs.delivery_date".to_owned();

    let open_in_month = "COALESCE((julianday(:month_end) - julianday(ccs.opened_on) >= 0 \
         AND (ccs.closed = 0 OR julianday(ccs.closed_on) - julianday(:month) > 0)), 0)"
        .to_owned();
    let alive_in_month =
        "COALESCE((ccs.date_death IS NULL OR julianday(ccs.date_death) - julianday(:month) >= 0), 0)"
            .to_owned();
    let seeking_services = "(ccs.is_availing = 1 AND ccs.is_migrated = 0)".to_owned();
    let pregnant_all = format!(
        "COALESCE(({open_in_month} AND {alive_in_month} AND {edd} IS NOT NULL \
         AND ({delivery_date} IS NULL OR {delivery_date} > :month_end)), 0)"
    );
    let lactating_all = format!(
        "COALESCE(({open_in_month} AND {alive_in_month} AND {delivery_date} <= :month_end \
         AND julianday(:month) - julianday({delivery_date}) <= 183), 0)"
    );
    let pregnant = format!("COALESCE(({pregnant_all} AND {seeking_services}), 0)");
    let lactating = format!("COALESCE(({lactating_all} AND {seeking_services}), 0)");
    let valid_in_month = format!("({pregnant} OR {lactating})");
    let delivered_in_month = format!(
        "COALESCE(({seeking_services} AND {delivery_date} BETWEEN :month AND :month_end), 0)"
    );
    let weeks_pregnant = format!("((280 - (julianday({edd}) - julianday(:month_end))) / 7)");

    vec![
        ("person_name", Sql::composed(carried("person_name"))),
        ("dob", Sql::composed(carried("dob"))),
        ("edd", Sql::composed(edd)),
        ("supervisor_id", Sql::composed(supervisor_id)),
        ("open_in_month", Sql::composed(open_in_month)),
        ("alive_in_month", Sql::composed(alive_in_month)),
        ("pregnant_all", Sql::composed(pregnant_all)),
        ("lactating_all", Sql::composed(lactating_all)),
        ("pregnant", Sql::composed(pregnant)),
        ("lactating", Sql::composed(lactating)),
        ("valid_in_month", Sql::composed(valid_in_month)),
        ("delivered_in_month", Sql::composed(delivered_in_month)),
        ("weeks_pregnant", Sql::composed(weeks_pregnant)),
    ]
}

static COLUMNS: &[MonthlyColumn] = &[
    fact("person_name", Text, "{person_name}"),
    fact("dob", Text, "{dob}"),
    fact("edd", Text, "{edd}"),
    fact("delivery_date", Text, "ccs.delivery_date"),
    fact("open_in_month", Integer, "CASE WHEN {open_in_month} THEN 1 ELSE 0 END"),
    fact("alive_in_month", Integer, "CASE WHEN {alive_in_month} THEN 1 ELSE 0 END"),
    fact("pregnant", Integer, "CASE WHEN {pregnant} THEN 1 ELSE 0 END"),
    fact("pregnant_all", Integer, "CASE WHEN {pregnant_all} THEN 1 ELSE 0 END"),
    fact("lactating", Integer, "CASE WHEN {lactating} THEN 1 ELSE 0 END"),
    fact("lactating_all", Integer, "CASE WHEN {lactating_all} THEN 1 ELSE 0 END"),
    fact("valid_in_month", Integer, "CASE WHEN {valid_in_month} THEN 1 ELSE 0 END"),
    fact(
        "ccs_status",
        Text,
        "CASE WHEN {pregnant} THEN 'pregnant' WHEN {lactating} THEN 'lactating' ELSE 'other' END",
    ),
    fact(
        "trimester",
        Integer,
        "CASE WHEN NOT {pregnant} THEN NULL \
              WHEN {weeks_pregnant} <= 12 THEN 1 \
              WHEN {weeks_pregnant} <= 27 THEN 2 \
         ELSE 3 END",
    ),
    // Take-home rations
    fact("thr_eligible", Integer, "CASE WHEN {valid_in_month} THEN 1 ELSE 0 END"),
    fact(
        "num_rations_distributed",
        Integer,
        "CASE WHEN {valid_in_month} THEN COALESCE(thr.days_ration_given_mother, 0) ELSE NULL END",
    ),
    // Delivery
    fact(
        "delivered_in_month",
        Integer,
        "CASE WHEN {delivered_in_month} THEN 1 ELSE 0 END",
    ),
    fact(
        "institutional_delivery_in_month",
        Integer,
        "CASE WHEN {delivered_in_month} AND del.where_born = 2 THEN 1 ELSE 0 END",
    ),
    fact(
        "breastfed_at_birth",
        Integer,
        "CASE WHEN {delivered_in_month} THEN COALESCE(del.breastfed_at_birth, 0) ELSE 0 END",
    ),
    // Antenatal care
    fact(
        "anc_in_month",
        Integer,
        "CASE WHEN {pregnant} THEN COALESCE(bp.valid_visits, 0) ELSE 0 END",
    ),
    fact(
        "bp_visited_in_month",
        Integer,
        "CASE WHEN {pregnant} AND COALESCE(bp.valid_visits, 0) > 0 THEN 1 ELSE 0 END",
    ),
    fact(
        "anemic_severe",
        Integer,
        "CASE WHEN {pregnant} AND bp.anemia = 1 THEN 1 ELSE 0 END",
    ),
    fact(
        "anemic_moderate",
        Integer,
        "CASE WHEN {pregnant} AND bp.anemia = 2 THEN 1 ELSE 0 END",
    ),
    fact(
        "anemic_normal",
        Integer,
        "CASE WHEN {pregnant} AND bp.anemia = 3 THEN 1 ELSE 0 END",
    ),
    fact(
        "anemic_unknown",
        Integer,
        "CASE WHEN {pregnant} AND (bp.anemia IS NULL OR bp.anemia NOT IN (1, 2, 3)) THEN 1 ELSE 0 END",
    ),
    fact(
        "eating_extra",
        Integer,
        "CASE WHEN {pregnant} THEN COALESCE(bp.eating_extra, 0) ELSE 0 END",
    ),
    fact(
        "resting",
        Integer,
        "CASE WHEN {pregnant} THEN COALESCE(bp.resting, 0) ELSE 0 END",
    ),
    fact(
        "using_ifa",
        Integer,
        "CASE WHEN {pregnant} THEN COALESCE(bp.using_ifa, 0) ELSE 0 END",
    ),
    fact(
        "counsel_immediate_bf",
        Integer,
        "CASE WHEN {pregnant} THEN COALESCE(bp.immediate_breastfeeding, 0) ELSE 0 END",
    ),
    fact(
        "counsel_bp_vid",
        Integer,
        "CASE WHEN {pregnant} THEN COALESCE(bp.play_birth_preparedness_vid, 0) ELSE 0 END",
    ),
    fact(
        "counsel_preparation",
        Integer,
        "CASE WHEN {pregnant} THEN COALESCE(bp.counsel_preparation, 0) ELSE 0 END",
    ),
    fact(
        "counsel_fp_vid",
        Integer,
        "CASE WHEN {pregnant} THEN COALESCE(bp.play_family_planning_vid, 0) ELSE 0 END",
    ),
    // Postnatal care
    fact(
        "pnc_visited_in_month",
        Integer,
        "CASE WHEN {lactating} AND COALESCE(pnc.valid_visits, 0) > 0 THEN 1 ELSE 0 END",
    ),
    fact(
        "counsel_fp_methods",
        Integer,
        "CASE WHEN {lactating} THEN COALESCE(pnc.counsel_methods, 0) ELSE 0 END",
    ),
    fact(
        "ebf_in_month",
        Integer,
        "CASE WHEN {lactating} THEN COALESCE(pnc.is_ebf, 0) ELSE 0 END",
    ),
    fact(
        "cf_visited_in_month",
        Integer,
        "CASE WHEN {lactating} AND COALESCE(cf.valid_visits, 0) > 0 THEN 1 ELSE 0 END",
    ),
    fact(
        "counsel_comp_feeding_vid",
        Integer,
        "CASE WHEN {lactating} THEN COALESCE(cf.play_comp_feeding_vid, 0) ELSE 0 END",
    ),
];

#[cfg(test)]
mod tests {
    use super::super::tests::{build, month};
    use super::super::MonthlyKind;
    use crate::aggregator::Aggregator;
    use crate::db::Database;
    use rusqlite::{params, Connection};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Database::ensure_schema(&conn).unwrap();
        conn
    }

    fn states() -> Vec<String> {
        vec!["st1".to_string()]
    }

    fn add_mother(conn: &Connection, doc_id: &str, edd: &str, delivery_date: Option<&str>) {
        conn.execute(
            "INSERT INTO ucr_ccs_record_cases
                (doc_id, state_id, supervisor_id, awc_id, person_name, edd, delivery_date, opened_on)
             VALUES (?, 'st1', 's1', 'a1', 'Mother', ?, ?, '2016-10-01')",
            params![doc_id, edd, delivery_date],
        )
        .unwrap();
    }

    fn run(conn: &Connection, m: chrono::NaiveDate) {
        for kind in MonthlyKind::CcsRecord.input_forms() {
            let agg = kind.aggregator();
            agg.create_table(conn, m, &states()).unwrap();
            agg.aggregate(conn, m, &states()).unwrap();
        }
        build(conn, MonthlyKind::CcsRecord, m, &states());
    }

    fn row(conn: &Connection, m: chrono::NaiveDate, case_id: &str) -> (i64, i64, Option<i64>, String) {
        let table = MonthlyKind::CcsRecord.partition(m).unwrap();
        conn.query_row(
            &format!(
                "SELECT pregnant, lactating, trimester, ccs_status FROM {} WHERE case_id = ?",
                table.quoted()
            ),
            [case_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .unwrap()
    }

    #[test]
    fn test_pregnancy_and_lactation_status() {
        let conn = conn();
        add_mother(&conn, "p1", "2017-09-01", None);
        add_mother(&conn, "l1", "2017-03-20", Some("2017-03-18"));
        add_mother(&conn, "o1", "2016-06-01", Some("2016-06-01"));
        run(&conn, month(2017, 4));

        let april = month(2017, 4);
        assert_eq!(row(&conn, april, "p1"), (1, 0, Some(2), "pregnant".to_string()));
        assert_eq!(row(&conn, april, "l1"), (0, 1, None, "lactating".to_string()));
        assert_eq!(row(&conn, april, "o1"), (0, 0, None, "other".to_string()));
    }

    #[test]
    fn test_institutional_delivery_in_month() {
        let conn = conn();
        add_mother(&conn, "m1", "2017-04-20", Some("2017-04-12"));
        conn.execute(
            "INSERT INTO ucr_delivery_forms
                (doc_id, ccs_record_case_id, state_id, supervisor_id, awc_id, time_end, breastfed_at_birth, where_born)
             VALUES ('d1', 'm1', 'st1', 's1', 'a1', '2017-04-13 09:00:00', 1, 2)",
            [],
        )
        .unwrap();
        run(&conn, month(2017, 4));

        let table = MonthlyKind::CcsRecord.partition(month(2017, 4)).unwrap();
        let (delivered, institutional, bf): (i64, i64, i64) = conn
            .query_row(
                &format!(
                    "SELECT delivered_in_month, institutional_delivery_in_month, breastfed_at_birth
                     FROM {} WHERE case_id = 'm1'",
                    table.quoted()
                ),
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!((delivered, institutional, bf), (1, 1, 1));
    }
}
