use chrono::Local;
use rusqlite::{params, Connection};
use tracing::info;

use crate::audit;
use crate::db::count_rows;
use crate::error::{EtlError, Result};
use crate::models::{CheckResult, Severity, ValidationRun};

const STAGE: &str = "CURATED";
const TABLE: &str = "curated_spending_snapshots";
const HISTORY_CUTOFF: &str = "2020-01-01";

pub struct SnapshotResult {
    pub version: i64,
    pub batch_id: String,
    pub snapshot_date: String,
    pub records: usize,
    pub historical_records: i64,
    pub total_versions: i64,
}

fn next_version(conn: &Connection) -> Result<i64> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(snapshot_version), 0) FROM curated_spending_snapshots",
        [],
        |r| r.get(0),
    )?;
    Ok(max + 1)
}

/// Copy the whole staging fact into a new snapshot version and flag it latest.
pub fn create_snapshot(conn: &Connection) -> Result<SnapshotResult> {
    let stg_rows = count_rows(conn, "stg_fact_spending")?;
    if stg_rows == 0 {
        return Err(EtlError::empty("stg_fact_spending", "Run `spendflow stg transform` first."));
    }

    let tx = conn.unchecked_transaction()?;
    let version = next_version(&tx)?;
    let batch_id = audit::new_run_id("CURATED_SNAPSHOT");
    let snapshot_date = Local::now().date_naive().format("%Y-%m-%d").to_string();
    info!(version, batch = %batch_id, "creating snapshot");

    let demoted = tx.execute("UPDATE curated_spending_snapshots SET is_latest = 0 WHERE is_latest != 0", [])?;
    let still_latest: i64 = tx.query_row(
        "SELECT count(*) FROM curated_spending_snapshots WHERE is_latest != 0",
        [],
        |r| r.get(0),
    )?;
    if still_latest != 0 {
        return Err(EtlError::Other(format!(
            "{still_latest} snapshot rows are still flagged latest after demotion"
        )));
    }

    let inserted = tx.execute(
        "INSERT INTO curated_spending_snapshots (
            snapshot_version, snapshot_date, snapshot_batch_id, is_latest,
            src_id, stg_spending_id, person_id, category_id, location_id, payment_method_id,
            person_name, category_name, category_group, location_name, location_type,
            payment_method_name, payment_type,
            spending_date, spending_year, spending_month, spending_quarter, spending_day_of_week,
            amount_cleaned, currency_code, description, data_quality_score
        )
        SELECT
            ?1, ?2, ?3, 1,
            f.src_id, f.spending_id, f.person_id, f.category_id, f.location_id, f.payment_method_id,
            p.person_name, c.category_name, c.category_group, l.location_name, l.location_type,
            pm.payment_method_name, pm.payment_type,
            f.spending_date, f.spending_year, f.spending_month, f.spending_quarter,
            CASE f.spending_day_of_week
                WHEN 'Monday' THEN 1
                WHEN 'Tuesday' THEN 2
                WHEN 'Wednesday' THEN 3
                WHEN 'Thursday' THEN 4
                WHEN 'Friday' THEN 5
                WHEN 'Saturday' THEN 6
                WHEN 'Sunday' THEN 7
                ELSE 0
            END,
            f.amount_cleaned, f.currency_code, f.description, f.data_quality_score
        FROM stg_fact_spending f
        JOIN stg_dim_person p ON f.person_id = p.person_id
        JOIN stg_dim_category c ON f.category_id = c.category_id
        JOIN stg_dim_location l ON f.location_id = l.location_id
        JOIN stg_dim_payment_method pm ON f.payment_method_id = pm.payment_method_id
        ORDER BY f.spending_id",
        params![version, snapshot_date, batch_id],
    )?;

    let verify: i64 = tx.query_row(
        "SELECT count(*) FROM curated_spending_snapshots WHERE snapshot_version = ?1 AND is_latest = 1",
        [version],
        |r| r.get(0),
    )?;
    if verify != inserted as i64 || verify != stg_rows {
        return Err(EtlError::Other(format!(
            "snapshot verification failed: expected {stg_rows} rows, found {verify}"
        )));
    }
    let latest_versions: i64 = tx.query_row(
        "SELECT count(DISTINCT snapshot_version) FROM curated_spending_snapshots WHERE is_latest = 1",
        [],
        |r| r.get(0),
    )?;
    if latest_versions != 1 {
        return Err(EtlError::Other(format!(
            "{latest_versions} versions are flagged latest (expected exactly 1)"
        )));
    }

    let (total_versions, historical_records): (i64, i64) = tx.query_row(
        "SELECT count(DISTINCT snapshot_version), COALESCE(SUM(is_latest = 0), 0) FROM curated_spending_snapshots",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    tx.commit()?;
    info!(version, records = inserted, demoted, "snapshot committed");

    Ok(SnapshotResult {
        version,
        batch_id,
        snapshot_date,
        records: inserted,
        historical_records,
        total_versions,
    })
}

// ---------------------------------------------------------------------------
// Version history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub version: i64,
    pub snapshot_date: String,
    pub is_latest: bool,
    pub records: i64,
    pub earliest: Option<String>,
    pub latest: Option<String>,
    pub total_amount: f64,
    pub growth: Option<i64>,
    pub growth_pct: Option<f64>,
}

/// Newest first, at most `limit` versions.
pub fn version_history(conn: &Connection, limit: usize) -> Result<Vec<VersionInfo>> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_version, MIN(snapshot_date), MAX(is_latest), count(*),
                MIN(spending_date), MAX(spending_date), COALESCE(SUM(amount_cleaned), 0)
         FROM curated_spending_snapshots
         GROUP BY snapshot_version ORDER BY snapshot_version",
    )?;
    let mut versions = stmt
        .query_map([], |r| {
            Ok(VersionInfo {
                version: r.get(0)?,
                snapshot_date: r.get(1)?,
                is_latest: r.get::<_, i64>(2)? == 1,
                records: r.get(3)?,
                earliest: r.get(4)?,
                latest: r.get(5)?,
                total_amount: r.get(6)?,
                growth: None,
                growth_pct: None,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut prev: Option<i64> = None;
    for v in versions.iter_mut() {
        if let Some(p) = prev {
            v.growth = Some(v.records - p);
            if p > 0 {
                v.growth_pct = Some(((v.records - p) as f64 / p as f64 * 10000.0).round() / 100.0);
            }
        }
        prev = Some(v.records);
    }
    versions.reverse();
    versions.truncate(limit);
    Ok(versions)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub struct SnapshotValidation {
    pub run: ValidationRun,
    pub history: Vec<VersionInfo>,
}

fn scalar(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |r| r.get::<_, Option<i64>>(0))?.unwrap_or(0))
}

fn samples(conn: &Connection, sql: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |r| r.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn validate_snapshots(conn: &Connection) -> Result<SnapshotValidation> {
    let total = count_rows(conn, TABLE)?;
    if total == 0 {
        return Err(EtlError::empty(TABLE, "Run `spendflow curated snapshot` first."));
    }
    let mut run = ValidationRun::new(STAGE, audit::new_run_id("VAL_CURATED"));

    // 1. version integrity
    let latest_versions = scalar(
        conn,
        "SELECT count(DISTINCT snapshot_version) FROM curated_spending_snapshots WHERE is_latest = 1",
    )?;
    let versions = scalar(conn, "SELECT count(DISTINCT snapshot_version) FROM curated_spending_snapshots")?;
    let bad_flags = (latest_versions != 1) as i64;
    run.checks.push(
        CheckResult::new("single_latest_version", Severity::Error, versions, bad_flags)
            .with_message(format!("{latest_versions} version(s) flagged latest (expected exactly 1)")),
    );
    let invalid_flags = scalar(
        conn,
        "SELECT count(*) FROM curated_spending_snapshots WHERE is_latest NOT IN (0, 1)",
    )?;
    run.checks.push(
        CheckResult::new("valid_is_latest_values", Severity::Error, total, invalid_flags)
            .with_message(format!("{invalid_flags} rows have is_latest outside (0, 1)")),
    );

    // 2. completeness
    let mut null_fields = Vec::new();
    let mut null_total = 0;
    for field in [
        "snapshot_version",
        "snapshot_date",
        "stg_spending_id",
        "person_id",
        "category_id",
        "spending_date",
        "amount_cleaned",
    ] {
        let n = scalar(conn, &format!("SELECT count(*) FROM curated_spending_snapshots WHERE {field} IS NULL"))?;
        if n > 0 {
            null_fields.push(format!("{n} NULL in {field}"));
            null_total += n;
        }
    }
    run.checks.push(
        CheckResult::new("required_fields_present", Severity::Error, total, null_total)
            .with_message(null_fields.join("; ")),
    );
    let mut gaps = Vec::new();
    let mut gap_total = 0;
    for field in ["person_name", "category_name", "location_name", "payment_method_name"] {
        let n = scalar(conn, &format!("SELECT count(*) FROM curated_spending_snapshots WHERE {field} IS NULL"))?;
        if n > 0 {
            gaps.push(format!("{n} missing {field}"));
            gap_total += n;
        }
    }
    run.checks.push(
        CheckResult::new("denormalized_names_present", Severity::Warning, total, gap_total)
            .with_message(gaps.join("; ")),
    );

    // 3. consistency with staging
    let stg_count = count_rows(conn, "stg_fact_spending")?;
    let latest_count = scalar(conn, "SELECT count(*) FROM curated_spending_snapshots WHERE is_latest = 1")?;
    run.checks.push(
        CheckResult::new("latest_matches_staging_count", Severity::Error, stg_count, (stg_count - latest_count).abs())
            .with_message(format!("staging has {stg_count} rows, latest snapshot has {latest_count}")),
    );
    let missing_sql = "FROM stg_fact_spending s
         WHERE NOT EXISTS (
             SELECT 1 FROM curated_spending_snapshots c
             WHERE c.stg_spending_id = s.spending_id AND c.is_latest = 1
         )";
    let missing = scalar(conn, &format!("SELECT count(*) {missing_sql}"))?;
    run.checks.push(
        CheckResult::new("staging_rows_in_latest", Severity::Error, stg_count, missing)
            .with_message(format!("{missing} staging rows are not in the latest snapshot"))
            .with_samples(samples(conn, &format!("SELECT s.src_id {missing_sql} ORDER BY s.src_id LIMIT 10"))?),
    );

    // 4. version growth
    let history = version_history(conn, 10)?;
    let growth = history
        .first()
        .map(|v| match v.growth {
            Some(g) => format!("v{} has {} records ({g:+} vs previous version)", v.version, v.records),
            None => format!("v{} is the initial version with {} records", v.version, v.records),
        })
        .unwrap_or_default();
    run.checks
        .push(CheckResult::new("version_growth", Severity::Info, versions, 0).with_message(growth));

    // 5. date range of the latest version
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    let future = conn.query_row(
        "SELECT count(*) FROM curated_spending_snapshots WHERE is_latest = 1 AND spending_date > ?1",
        [&today],
        |r| r.get::<_, i64>(0),
    )?;
    run.checks.push(
        CheckResult::new("no_future_dates", Severity::Error, latest_count, future)
            .with_message(format!("{future} transactions dated after {today}")),
    );
    let old = conn.query_row(
        "SELECT count(*) FROM curated_spending_snapshots WHERE is_latest = 1 AND spending_date < ?1",
        [HISTORY_CUTOFF],
        |r| r.get::<_, i64>(0),
    )?;
    run.checks.push(
        CheckResult::new("pre_2020_dates", Severity::Info, latest_count, old)
            .with_message(format!("{old} transactions dated before {HISTORY_CUTOFF}")),
    );

    for check in run.checks.iter_mut().filter(|c| c.passed) {
        if check.check_type != Severity::Info {
            check.message = None;
        }
    }

    let tx = conn.unchecked_transaction()?;
    audit::clear_stage_checks(&tx, STAGE, TABLE)?;
    for check in &run.checks {
        audit::record(&tx, &run.run_id, STAGE, TABLE, check)?;
    }
    tx.commit()?;

    Ok(SnapshotValidation { run, history })
}
