use rusqlite::Connection;

use crate::audit::{self, StageSummary};
use crate::db::{count_rows, latest_snapshot_version};
use crate::error::Result;
use crate::src_load::{list_batches, BatchInfo};

/// Tables reported per stage, in pipeline order.
const LAYERS: &[(&str, &str)] = &[
    ("SRC", "src_daily_spending"),
    ("STG", "stg_fact_spending"),
    ("STG", "stg_rejected_records"),
    ("CURATED", "curated_spending_snapshots"),
    ("DST", "dst_monthly_spending_summary"),
    ("DST", "dst_category_trends"),
    ("DST", "dst_person_analytics"),
    ("DST", "dst_payment_method_summary"),
];

pub struct LayerCount {
    pub stage: &'static str,
    pub table: &'static str,
    pub rows: i64,
}

pub struct StatusReport {
    pub layers: Vec<LayerCount>,
    pub snapshot_versions: i64,
    pub latest_version: Option<i64>,
    pub batches: Vec<BatchInfo>,
    pub validations: Vec<StageSummary>,
}

pub fn build_status(conn: &Connection) -> Result<StatusReport> {
    let layers = LAYERS
        .iter()
        .map(|&(stage, table)| {
            Ok(LayerCount {
                stage,
                table,
                rows: count_rows(conn, table)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let snapshot_versions = conn.query_row(
        "SELECT count(DISTINCT snapshot_version) FROM curated_spending_snapshots",
        [],
        |r| r.get(0),
    )?;
    Ok(StatusReport {
        layers,
        snapshot_versions,
        latest_version: latest_snapshot_version(conn)?,
        batches: list_batches(conn)?,
        validations: audit::latest_summary(conn)?,
    })
}
