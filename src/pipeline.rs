use std::path::Path;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::curated;
use crate::dst_validate::validate_marts;
use crate::error::{EtlError, Result};
use crate::insights;
use crate::marts::populate_all;
use crate::settings::Settings;
use crate::sources::resolve_format;
use crate::src_load::load_source;
use crate::src_validate::validate_source;
use crate::stg_transform::transform_and_load;

/// One completed pipeline step.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: &'static str,
    pub summary: String,
}

impl StageOutcome {
    fn new(stage: &'static str, summary: String) -> Self {
        info!(stage, "{summary}");
        Self { stage, summary }
    }
}

/// Run every stage in order. Each stage commits on its own; the first failing
/// validation gate stops the run.
pub fn run_all(conn: &Connection, settings: &Settings, file: Option<&Path>) -> Result<Vec<StageOutcome>> {
    let mut done = Vec::new();

    if let Some(path) = file {
        let format = resolve_format(path, None)?;
        match load_source(conn, path, format, settings.chunk_size, false) {
            Ok(r) => done.push(StageOutcome::new(
                "SRC load",
                format!("{} rows from {} ({})", r.rows_loaded, r.source_file, r.batch_id),
            )),
            Err(EtlError::DuplicateSource(name)) => {
                warn!(file = %name, "already loaded, continuing with existing source rows");
                done.push(StageOutcome::new("SRC load", format!("{name} already loaded, skipped")));
            }
            Err(e) => return Err(e),
        }
    }

    let src = validate_source(conn, settings)?;
    src.ensure_passed()?;
    done.push(StageOutcome::new(
        "SRC validate",
        format!("{} checks, {} warnings", src.checks.len(), src.warnings()),
    ));

    let stg = transform_and_load(conn, settings)?;
    done.push(StageOutcome::new(
        "STG transform",
        format!("{} of {} rows staged, {} rejected", stg.loaded, stg.source_rows, stg.rejected()),
    ));

    let snap = curated::create_snapshot(conn)?;
    done.push(StageOutcome::new(
        "CURATED snapshot",
        format!("version {} with {} records", snap.version, snap.records),
    ));

    let cur = curated::validate_snapshots(conn)?;
    cur.run.ensure_passed()?;
    done.push(StageOutcome::new(
        "CURATED validate",
        format!("{} checks, {} warnings", cur.run.checks.len(), cur.run.warnings()),
    ));

    let marts = populate_all(conn)?;
    let inserted: usize = marts.iter().map(|m| m.inserted).sum();
    done.push(StageOutcome::new(
        "DST populate",
        format!("{inserted} rows across {} marts", marts.len()),
    ));

    let dst = validate_marts(conn, settings.quality_tolerance)?;
    dst.run.ensure_passed()?;
    done.push(StageOutcome::new("DST validate", format!("{} checks passed", dst.run.checks.len())));

    insights::deploy_views(conn)?;
    done.push(StageOutcome::new("DIS deploy", format!("{} views", insights::VIEWS.len())));

    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::count_rows;
    use crate::db::tests::test_db;
    use crate::sample::{generate, write_csv};

    #[test]
    fn test_full_run_on_sample_data() {
        let (dir, conn) = test_db();
        let path = dir.path().join("sample.csv");
        write_csv(&path, &generate(200, 3)).unwrap();

        let stages = run_all(&conn, &Settings::default(), Some(&path)).unwrap();
        assert_eq!(stages.len(), 8);
        assert_eq!(stages.last().unwrap().stage, "DIS deploy");
        assert!(count_rows(&conn, "dst_person_analytics").unwrap() > 0);
        assert!(!insights::scorecard(&conn).unwrap().is_empty());

        // a second run skips the duplicate file and adds a snapshot version
        let again = run_all(&conn, &Settings::default(), Some(&path)).unwrap();
        assert!(again[0].summary.contains("already loaded"));
        assert_eq!(crate::db::latest_snapshot_version(&conn).unwrap(), Some(2));
    }

    #[test]
    fn test_blocking_source_errors_stop_the_run() {
        let (dir, conn) = test_db();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "person_name,spending_date,category,amount,location,description,payment_method\n\
             ,2024-01-01,Food,5,Mall,x,Cash\n",
        )
        .unwrap();
        let err = run_all(&conn, &Settings::default(), Some(&path)).unwrap_err();
        assert!(matches!(err, EtlError::ValidationFailed { .. }));
        assert_eq!(count_rows(&conn, "stg_fact_spending").unwrap(), 0);
    }
}
