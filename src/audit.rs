use chrono::Local;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::Result;
use crate::models::CheckResult;

/// `PREFIX_YYYYMMDD_HHMMSS_xxxxxxxx`; the suffix keeps ids unique within one second.
pub fn new_run_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}_{}", Local::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

pub fn record(conn: &Connection, run_id: &str, stage: &str, table: &str, check: &CheckResult) -> Result<()> {
    let samples = if check.sample_ids.is_empty() {
        None
    } else {
        Some(
            check
                .sample_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(","),
        )
    };
    let message = check.message.as_deref().map(truncate_message);
    conn.execute(
        "INSERT INTO log_validation_results
         (validation_run_id, stage, table_name, check_name, check_type, check_status,
          records_checked, records_failed, failure_percentage, error_message, sample_failed_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            run_id,
            stage,
            table,
            check.check_name,
            check.check_type.as_str(),
            check.status(),
            check.records_checked,
            check.records_failed,
            check.failure_pct(),
            message,
            samples,
        ],
    )?;
    Ok(())
}

pub fn truncate_message(msg: &str) -> String {
    msg.chars().take(500).collect()
}

/// Drop earlier results of one stage's validation checks (load events are kept).
pub fn clear_stage_checks(conn: &Connection, stage: &str, table: &str) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM log_validation_results
         WHERE stage = ?1 AND table_name = ?2 AND check_name NOT LIKE 'DATA_LOAD_%'
           AND check_name != 'FILE_NOT_FOUND'",
        params![stage, table],
    )?;
    Ok(n)
}

// ---------------------------------------------------------------------------
// Reading the log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub log_id: i64,
    pub validation_run_id: String,
    pub validation_timestamp: String,
    pub stage: String,
    pub table_name: String,
    pub check_name: String,
    pub check_type: String,
    pub check_status: String,
    pub records_checked: i64,
    pub records_failed: i64,
    pub failure_percentage: f64,
    pub error_message: Option<String>,
    pub sample_failed_ids: Option<String>,
}

pub fn entries(conn: &Connection, stage: Option<&str>) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT log_id, validation_run_id, validation_timestamp, stage, table_name, check_name,
                check_type, check_status, records_checked, records_failed, failure_percentage,
                error_message, sample_failed_ids
         FROM log_validation_results
         WHERE (?1 IS NULL OR stage = ?1)
         ORDER BY log_id",
    )?;
    let rows = stmt
        .query_map([stage], |row| {
            Ok(LogEntry {
                log_id: row.get(0)?,
                validation_run_id: row.get(1)?,
                validation_timestamp: row.get(2)?,
                stage: row.get(3)?,
                table_name: row.get(4)?,
                check_name: row.get(5)?,
                check_type: row.get(6)?,
                check_status: row.get(7)?,
                records_checked: row.get(8)?,
                records_failed: row.get(9)?,
                failure_percentage: row.get(10)?,
                error_message: row.get(11)?,
                sample_failed_ids: row.get(12)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub validation_run_id: String,
    pub total_checks: i64,
    pub passed: i64,
    pub failed: i64,
    pub errors: i64,
    pub warnings: i64,
}

pub fn latest_summary(conn: &Connection) -> Result<Vec<StageSummary>> {
    let mut stmt = conn.prepare(
        "SELECT stage, validation_run_id, total_checks, passed, failed, errors, warnings
         FROM v_latest_validation_summary ORDER BY stage",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(StageSummary {
                stage: row.get(0)?,
                validation_run_id: row.get(1)?,
                total_checks: row.get(2)?,
                passed: row.get(3)?,
                failed: row.get(4)?,
                errors: row.get(5)?,
                warnings: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;
    use crate::models::Severity;

    #[test]
    fn test_run_ids_are_unique() {
        let a = new_run_id("VAL");
        let b = new_run_id("VAL");
        assert!(a.starts_with("VAL_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_and_summary() {
        let (_dir, conn) = test_db();
        let ok = CheckResult::new("null_amount", Severity::Error, 10, 0);
        let bad = CheckResult::new("missing_location", Severity::Warning, 10, 2).with_samples(vec![3, 7]);
        record(&conn, "VAL_1", "SRC", "src_daily_spending", &ok).unwrap();
        record(&conn, "VAL_1", "SRC", "src_daily_spending", &bad).unwrap();

        let all = entries(&conn, Some("SRC")).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].sample_failed_ids.as_deref(), Some("3,7"));
        assert_eq!(all[1].failure_percentage, 20.0);

        let summary = latest_summary(&conn).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].total_checks, 2);
        assert_eq!(summary[0].failed, 1);
        assert_eq!(summary[0].warnings, 1);
        assert_eq!(summary[0].errors, 0);
    }

    #[test]
    fn test_clear_stage_keeps_load_events() {
        let (_dir, conn) = test_db();
        let load = CheckResult::new("DATA_LOAD_SUCCESS", Severity::Info, 5, 0);
        let check = CheckResult::new("null_amount", Severity::Error, 5, 0);
        record(&conn, "LOAD_1", "SRC", "src_daily_spending", &load).unwrap();
        record(&conn, "VAL_1", "SRC", "src_daily_spending", &check).unwrap();
        assert_eq!(clear_stage_checks(&conn, "SRC", "src_daily_spending").unwrap(), 1);
        assert_eq!(entries(&conn, None).unwrap().len(), 1);
    }

    #[test]
    fn test_long_messages_truncated() {
        let long = "x".repeat(900);
        assert_eq!(truncate_message(&long).len(), 500);
    }
}
