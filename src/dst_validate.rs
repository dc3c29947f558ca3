use rusqlite::Connection;
use tracing::info;

use crate::audit;
use crate::db::latest_snapshot_version;
use crate::error::{EtlError, Result};
use crate::marts::Mart;
use crate::models::{CheckResult, Severity, ValidationRun};

const STAGE: &str = "DST";
const TABLE: &str = "dst_marts";

/// Per-mart figures for the validated snapshot version.
#[derive(Debug, Clone)]
pub struct MartFigures {
    pub mart: Mart,
    pub total: f64,
    pub transactions: i64,
    pub records: i64,
}

pub struct MartValidation {
    pub run: ValidationRun,
    pub snapshot_version: i64,
    pub snapshot_total: f64,
    pub snapshot_count: i64,
    pub marts: Vec<MartFigures>,
}

fn amount_column(mart: Mart) -> &'static str {
    match mart {
        Mart::Payment => "total_amount",
        _ => "total_spending",
    }
}

fn figures(conn: &Connection, mart: Mart, version: i64) -> Result<MartFigures> {
    let (total, transactions, records) = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM({}), 0), COALESCE(SUM(transaction_count), 0), count(*)
             FROM {} WHERE snapshot_version_source = ?1",
            amount_column(mart),
            mart.table()
        ),
        [version],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    Ok(MartFigures {
        mart,
        total,
        transactions,
        records,
    })
}

fn count_where(conn: &Connection, sql: &str, version: i64) -> Result<i64> {
    Ok(conn.query_row(sql, [version], |r| r.get(0))?)
}

/// Reconcile the four marts against the latest snapshot.
pub fn validate_marts(conn: &Connection, tolerance: f64) -> Result<MartValidation> {
    let version = latest_snapshot_version(conn)?
        .ok_or_else(|| EtlError::empty("curated_spending_snapshots", "Run `spendflow curated snapshot` first."))?;
    let (snapshot_total, snapshot_count): (f64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(amount_cleaned), 0), count(*) FROM curated_spending_snapshots
         WHERE snapshot_version = ?1 AND is_latest = 1",
        [version],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let marts = Mart::ALL
        .into_iter()
        .map(|m| figures(conn, m, version))
        .collect::<Result<Vec<_>>>()?;
    if marts.iter().all(|m| m.records == 0) {
        return Err(EtlError::empty("dst marts", "Run `spendflow dst populate` first."));
    }

    let mut run = ValidationRun::new(STAGE, audit::new_run_id("VAL_DST"));

    // 1. totals
    for m in &marts {
        let gap = (snapshot_total - m.total).abs();
        let mut check = CheckResult::new(
            &format!("{}_total_reconciles", m.mart.key()),
            Severity::Error,
            1,
            (gap > tolerance) as i64,
        );
        if !check.passed {
            check = check.with_message(format!(
                "{} total {:.2} differs from snapshot total {:.2} by {gap:.2}",
                m.mart.table(),
                m.total,
                snapshot_total
            ));
        }
        run.checks.push(check);
    }

    // 2. transaction counts
    let mismatched: Vec<String> = marts
        .iter()
        .filter(|m| m.transactions != snapshot_count)
        .map(|m| format!("{}={}", m.mart.key(), m.transactions))
        .collect();
    let mut counts = CheckResult::new(
        "transaction_counts_match",
        Severity::Error,
        marts.len() as i64,
        mismatched.len() as i64,
    );
    if !counts.passed {
        counts = counts.with_message(format!("snapshot has {snapshot_count}; {}", mismatched.join(", ")));
    }
    run.checks.push(counts);

    // 3. record counts
    let summary = marts
        .iter()
        .map(|m| format!("{}={}", m.mart.key(), m.records))
        .collect::<Vec<_>>()
        .join(", ");
    run.checks.push(
        CheckResult::new("mart_record_counts", Severity::Info, marts.len() as i64, 0).with_message(summary),
    );

    // 4. person group breakdown
    let (groups, person_total): (f64, f64) = conn.query_row(
        "SELECT COALESCE(SUM(essential_spending + discretionary_spending + transport_spending
                             + healthcare_spending + education_spending + other_spending), 0),
                COALESCE(SUM(total_spending), 0)
         FROM dst_person_analytics WHERE snapshot_version_source = ?1",
        [version],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let unbalanced = count_where(
        conn,
        "SELECT count(*) FROM dst_person_analytics
         WHERE snapshot_version_source = ?1
           AND abs(essential_spending + discretionary_spending + transport_spending
                   + healthcare_spending + education_spending + other_spending - total_spending) > 0.01",
        version,
    )?;
    let person_records = marts.iter().find(|m| m.mart == Mart::Person).map_or(0, |m| m.records);
    let gap = (groups - person_total).abs();
    let mut breakdown = CheckResult::new(
        "person_group_breakdown",
        Severity::Error,
        person_records,
        if gap > tolerance { unbalanced.max(1) } else { 0 },
    );
    if !breakdown.passed {
        breakdown = breakdown.with_message(format!(
            "group spending sums to {groups:.2} but person totals are {person_total:.2}"
        ));
    }
    run.checks.push(breakdown);

    // 5. key names
    let mut nulls = Vec::new();
    let mut null_total = 0;
    for (table, column) in [
        ("dst_monthly_spending_summary", "person_name"),
        ("dst_monthly_spending_summary", "category_name"),
        ("dst_category_trends", "category_name"),
        ("dst_person_analytics", "person_name"),
        ("dst_payment_method_summary", "payment_method_name"),
    ] {
        let n = count_where(
            conn,
            &format!("SELECT count(*) FROM {table} WHERE {column} IS NULL AND snapshot_version_source = ?1"),
            version,
        )?;
        if n > 0 {
            nulls.push(format!("{table}.{column}: {n}"));
            null_total += n;
        }
    }
    let mut keys = CheckResult::new(
        "key_names_present",
        Severity::Error,
        marts.iter().map(|m| m.records).sum(),
        null_total,
    );
    if !keys.passed {
        keys = keys.with_message(nulls.join("; "));
    }
    run.checks.push(keys);

    // 6. person counts
    let snapshot_persons = count_where(
        conn,
        "SELECT count(DISTINCT person_name) FROM curated_spending_snapshots WHERE snapshot_version = ?1 AND is_latest = 1",
        version,
    )?;
    let monthly_persons = count_where(
        conn,
        "SELECT count(DISTINCT person_name) FROM dst_monthly_spending_summary WHERE snapshot_version_source = ?1",
        version,
    )?;
    let analytics_persons = count_where(
        conn,
        "SELECT count(DISTINCT person_name) FROM dst_person_analytics WHERE snapshot_version_source = ?1",
        version,
    )?;
    let consistent = snapshot_persons == monthly_persons && monthly_persons == analytics_persons;
    let mut persons = CheckResult::new("person_counts_match", Severity::Error, snapshot_persons, (!consistent) as i64);
    if !consistent {
        persons = persons.with_message(format!(
            "snapshot={snapshot_persons}, monthly={monthly_persons}, analytics={analytics_persons}"
        ));
    }
    run.checks.push(persons);

    let tx = conn.unchecked_transaction()?;
    audit::clear_stage_checks(&tx, STAGE, TABLE)?;
    for check in &run.checks {
        audit::record(&tx, &run.run_id, STAGE, TABLE, check)?;
    }
    tx.commit()?;
    info!(run = %run.run_id, version, errors = run.errors(), "marts validated");

    Ok(MartValidation {
        run,
        snapshot_version: version,
        snapshot_total,
        snapshot_count,
        marts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;
    use crate::curated::create_snapshot;
    use crate::marts::{populate_all, populate_person_analytics, tests::snapshot_fixture};
    use crate::settings::Settings;
    use crate::stg_transform::tests::insert_src;
    use crate::stg_transform::transform_and_load;

    #[test]
    fn test_requires_snapshot() {
        let (_dir, conn) = test_db();
        assert!(matches!(validate_marts(&conn, 0.01), Err(EtlError::EmptyStage { .. })));
    }

    #[test]
    fn test_requires_populated_marts() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        assert!(matches!(validate_marts(&conn, 0.01), Err(EtlError::EmptyStage { .. })));
    }

    #[test]
    fn test_fresh_marts_reconcile() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        populate_all(&conn).unwrap();
        let v = validate_marts(&conn, 0.01).unwrap();
        assert_eq!(v.snapshot_count, 7);
        assert_eq!(v.snapshot_total, 955.0);
        assert_eq!(v.run.errors(), 0, "{:?}", v.run.failed());
        assert_eq!(v.run.checks.len(), 9);
        assert!(v.marts.iter().all(|m| (m.total - 955.0).abs() < 0.01));
    }

    #[test]
    fn test_partial_population_fails() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        populate_person_analytics(&conn).unwrap();
        let v = validate_marts(&conn, 0.01).unwrap();
        let monthly = v
            .run
            .checks
            .iter()
            .find(|c| c.check_name == "monthly_total_reconciles")
            .unwrap();
        assert!(!monthly.passed);
        assert!(v.run.ensure_passed().is_err());
    }

    #[test]
    fn test_tampered_breakdown_is_detected() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        populate_all(&conn).unwrap();
        conn.execute("UPDATE dst_person_analytics SET other_spending = other_spending + 10", [])
            .unwrap();
        let v = validate_marts(&conn, 0.01).unwrap();
        let c = v
            .run
            .checks
            .iter()
            .find(|c| c.check_name == "person_group_breakdown")
            .unwrap();
        assert!(!c.passed);
        assert_eq!(c.records_failed, 4);
    }

    #[test]
    fn test_sub_cent_amounts_reconcile() {
        let (_dir, conn) = test_db();
        let names: Vec<String> = (0..12).map(|i| format!("Person {i}")).collect();
        let rows: Vec<[Option<&str>; 7]> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let amount = if i % 2 == 0 { "1.004" } else { "SGD 2.006" };
                [Some(name.as_str()), Some("2024-04-02"), Some("Food"), Some(amount), Some("Mall"), Some("x"), Some("Cash")]
            })
            .collect();
        insert_src(&conn, &rows);
        transform_and_load(&conn, &Settings::default()).unwrap();
        create_snapshot(&conn).unwrap();
        populate_all(&conn).unwrap();

        let v = validate_marts(&conn, 0.01).unwrap();
        assert!((v.snapshot_total - 18.06).abs() < 1e-9, "{}", v.snapshot_total);
        assert_eq!(v.run.errors(), 0, "{:?}", v.run.failed());
        assert!(v.marts.iter().all(|m| (m.total - v.snapshot_total).abs() < 1e-9));
    }
}
