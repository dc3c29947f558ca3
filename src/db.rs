use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;
use crate::insights;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS log_validation_results (
    log_id INTEGER PRIMARY KEY,
    validation_run_id TEXT NOT NULL,
    validation_timestamp TEXT NOT NULL DEFAULT (datetime('now')),
    stage TEXT NOT NULL,
    table_name TEXT NOT NULL,
    check_name TEXT NOT NULL,
    check_type TEXT NOT NULL CHECK (check_type IN ('ERROR', 'WARNING', 'INFO')),
    check_status TEXT NOT NULL CHECK (check_status IN ('PASSED', 'FAILED')),
    records_checked INTEGER DEFAULT 0,
    records_failed INTEGER DEFAULT 0,
    failure_percentage REAL DEFAULT 0,
    error_message TEXT,
    sample_failed_ids TEXT
);

CREATE INDEX IF NOT EXISTS idx_log_run ON log_validation_results(validation_run_id);

CREATE VIEW IF NOT EXISTS v_latest_validation_summary AS
SELECT
    l.stage,
    l.validation_run_id,
    COUNT(*) AS total_checks,
    SUM(CASE WHEN l.check_status = 'PASSED' THEN 1 ELSE 0 END) AS passed,
    SUM(CASE WHEN l.check_status = 'FAILED' THEN 1 ELSE 0 END) AS failed,
    SUM(CASE WHEN l.check_status = 'FAILED' AND l.check_type = 'ERROR' THEN 1 ELSE 0 END) AS errors,
    SUM(CASE WHEN l.check_status = 'FAILED' AND l.check_type = 'WARNING' THEN 1 ELSE 0 END) AS warnings
FROM log_validation_results l
WHERE l.validation_run_id = (
    SELECT l2.validation_run_id FROM log_validation_results l2
    WHERE l2.stage = l.stage
    ORDER BY l2.log_id DESC LIMIT 1
)
GROUP BY l.stage, l.validation_run_id;

-- SRC ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS src_daily_spending (
    src_id INTEGER PRIMARY KEY,
    person_name TEXT,
    spending_date TEXT,
    category TEXT,
    amount TEXT,
    location TEXT,
    description TEXT,
    payment_method TEXT,
    source_file TEXT,
    load_batch_id TEXT NOT NULL,
    loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_src_batch ON src_daily_spending(load_batch_id);

CREATE TABLE IF NOT EXISTS src_load_files (
    file_id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    checksum TEXT NOT NULL UNIQUE,
    load_batch_id TEXT NOT NULL,
    record_count INTEGER NOT NULL,
    loaded_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- STG ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS stg_dim_person (
    person_id INTEGER PRIMARY KEY,
    person_name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS stg_dim_location (
    location_id INTEGER PRIMARY KEY,
    location_name TEXT NOT NULL UNIQUE,
    location_type TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS stg_dim_category (
    category_id INTEGER PRIMARY KEY,
    category_name TEXT NOT NULL UNIQUE,
    category_group TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS stg_dim_payment_method (
    payment_method_id INTEGER PRIMARY KEY,
    payment_method_name TEXT NOT NULL UNIQUE,
    payment_type TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS stg_fact_spending (
    spending_id INTEGER PRIMARY KEY,
    person_id INTEGER NOT NULL,
    location_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    payment_method_id INTEGER NOT NULL,
    spending_date TEXT NOT NULL,
    spending_year INTEGER NOT NULL,
    spending_month INTEGER NOT NULL,
    spending_day INTEGER NOT NULL,
    spending_quarter INTEGER NOT NULL,
    spending_day_of_week TEXT NOT NULL,
    amount_raw TEXT,
    amount_cleaned REAL NOT NULL,
    currency_code TEXT NOT NULL,
    description TEXT,
    is_amount_parsed_successfully INTEGER NOT NULL,
    is_date_parsed_successfully INTEGER NOT NULL,
    data_quality_score INTEGER NOT NULL CHECK (data_quality_score BETWEEN 0 AND 100),
    src_id INTEGER NOT NULL,
    transform_batch_id TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (person_id) REFERENCES stg_dim_person(person_id),
    FOREIGN KEY (location_id) REFERENCES stg_dim_location(location_id),
    FOREIGN KEY (category_id) REFERENCES stg_dim_category(category_id),
    FOREIGN KEY (payment_method_id) REFERENCES stg_dim_payment_method(payment_method_id)
);

CREATE INDEX IF NOT EXISTS idx_stg_fact_date ON stg_fact_spending(spending_date);

CREATE TABLE IF NOT EXISTS stg_rejected_records (
    reject_id INTEGER PRIMARY KEY,
    src_id INTEGER NOT NULL,
    reason TEXT NOT NULL,
    transform_batch_id TEXT NOT NULL
);

CREATE VIEW IF NOT EXISTS vw_stg_spending_complete AS
SELECT
    f.spending_id,
    f.src_id,
    p.person_name,
    f.spending_date,
    f.spending_year,
    f.spending_month,
    f.spending_quarter,
    f.spending_day_of_week,
    c.category_name,
    c.category_group,
    l.location_name,
    l.location_type,
    pm.payment_method_name,
    pm.payment_type,
    f.amount_cleaned,
    f.currency_code,
    f.description,
    f.data_quality_score
FROM stg_fact_spending f
JOIN stg_dim_person p ON f.person_id = p.person_id
JOIN stg_dim_category c ON f.category_id = c.category_id
JOIN stg_dim_location l ON f.location_id = l.location_id
JOIN stg_dim_payment_method pm ON f.payment_method_id = pm.payment_method_id;

-- CURATED -----------------------------------------------------------------

CREATE TABLE IF NOT EXISTS curated_spending_snapshots (
    curated_id INTEGER PRIMARY KEY,
    snapshot_version INTEGER NOT NULL,
    snapshot_date TEXT NOT NULL,
    snapshot_batch_id TEXT NOT NULL,
    is_latest INTEGER NOT NULL DEFAULT 0,
    src_id INTEGER,
    stg_spending_id INTEGER NOT NULL,
    person_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    location_id INTEGER,
    payment_method_id INTEGER,
    person_name TEXT,
    category_name TEXT,
    category_group TEXT,
    location_name TEXT,
    location_type TEXT,
    payment_method_name TEXT,
    payment_type TEXT,
    spending_date TEXT NOT NULL,
    spending_year INTEGER NOT NULL,
    spending_month INTEGER NOT NULL,
    spending_quarter INTEGER NOT NULL,
    spending_day_of_week INTEGER NOT NULL,
    amount_cleaned REAL NOT NULL,
    currency_code TEXT,
    description TEXT,
    data_quality_score INTEGER,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_curated_version ON curated_spending_snapshots(snapshot_version);
CREATE INDEX IF NOT EXISTS idx_curated_latest ON curated_spending_snapshots(is_latest);

-- DST ---------------------------------------------------------------------

CREATE TABLE IF NOT EXISTS dst_monthly_spending_summary (
    summary_id INTEGER PRIMARY KEY,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    quarter INTEGER NOT NULL,
    month_start_date TEXT NOT NULL,
    month_end_date TEXT NOT NULL,
    person_name TEXT NOT NULL,
    category_name TEXT NOT NULL,
    category_group TEXT,
    location_name TEXT NOT NULL,
    location_type TEXT,
    total_spending REAL NOT NULL,
    transaction_count INTEGER NOT NULL,
    avg_transaction_amount REAL,
    min_transaction_amount REAL,
    max_transaction_amount REAL,
    prev_month_spending REAL,
    mom_absolute_change REAL,
    mom_percent_change REAL,
    prev_year_spending REAL,
    yoy_absolute_change REAL,
    yoy_percent_change REAL,
    avg_quality_score REAL,
    snapshot_version_source INTEGER NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_dst_monthly_version ON dst_monthly_spending_summary(snapshot_version_source);

CREATE TABLE IF NOT EXISTS dst_category_trends (
    trend_id INTEGER PRIMARY KEY,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    quarter INTEGER NOT NULL,
    month_start_date TEXT NOT NULL,
    category_name TEXT NOT NULL,
    category_group TEXT,
    total_spending REAL NOT NULL,
    transaction_count INTEGER NOT NULL,
    unique_persons INTEGER NOT NULL,
    avg_transaction_amount REAL,
    prev_month_spending REAL,
    mom_absolute_change REAL,
    mom_percent_change REAL,
    mom_trend_direction TEXT NOT NULL,
    prev_year_spending REAL,
    yoy_absolute_change REAL,
    yoy_percent_change REAL,
    yoy_trend_direction TEXT NOT NULL,
    rolling_3month_avg REAL,
    rolling_6month_avg REAL,
    category_rank_current INTEGER NOT NULL,
    category_rank_prev_month INTEGER,
    rank_change INTEGER NOT NULL,
    percent_of_total_spending REAL,
    snapshot_version_source INTEGER NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_dst_category_version ON dst_category_trends(snapshot_version_source);

CREATE TABLE IF NOT EXISTS dst_person_analytics (
    analytics_id INTEGER PRIMARY KEY,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    quarter INTEGER NOT NULL,
    month_start_date TEXT NOT NULL,
    person_name TEXT NOT NULL,
    total_spending REAL NOT NULL,
    transaction_count INTEGER NOT NULL,
    avg_transaction_amount REAL,
    median_transaction_amount REAL,
    top_category TEXT,
    top_category_spending REAL,
    top_category_percent REAL,
    essential_spending REAL NOT NULL,
    discretionary_spending REAL NOT NULL,
    transport_spending REAL NOT NULL,
    healthcare_spending REAL NOT NULL,
    education_spending REAL NOT NULL,
    other_spending REAL NOT NULL,
    essential_percent REAL,
    discretionary_percent REAL,
    essential_to_discretionary_ratio REAL,
    unique_categories_count INTEGER NOT NULL,
    unique_locations_count INTEGER NOT NULL,
    unique_payment_methods_count INTEGER NOT NULL,
    weekday_spending REAL NOT NULL,
    weekend_spending REAL NOT NULL,
    weekend_spending_percent REAL,
    small_transactions_count INTEGER NOT NULL,
    medium_transactions_count INTEGER NOT NULL,
    large_transactions_count INTEGER NOT NULL,
    xlarge_transactions_count INTEGER NOT NULL,
    avg_daily_spending REAL,
    avg_weekly_spending REAL,
    days_with_spending INTEGER NOT NULL,
    spending_frequency_percent REAL,
    prev_month_total REAL,
    mom_absolute_change REAL,
    mom_percent_change REAL,
    prev_year_total REAL,
    yoy_absolute_change REAL,
    yoy_percent_change REAL,
    avg_quality_score REAL,
    snapshot_version_source INTEGER NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_dst_person_version ON dst_person_analytics(snapshot_version_source);

CREATE TABLE IF NOT EXISTS dst_payment_method_summary (
    payment_summary_id INTEGER PRIMARY KEY,
    year INTEGER NOT NULL,
    month INTEGER NOT NULL,
    quarter INTEGER NOT NULL,
    month_start_date TEXT NOT NULL,
    payment_method_name TEXT NOT NULL,
    payment_type TEXT,
    transaction_count INTEGER NOT NULL,
    unique_persons_count INTEGER NOT NULL,
    total_amount REAL NOT NULL,
    avg_transaction_amount REAL,
    min_transaction_amount REAL,
    max_transaction_amount REAL,
    percent_of_transactions REAL,
    percent_of_spending REAL,
    top_category_1 TEXT,
    top_category_1_amount REAL,
    top_category_2 TEXT,
    top_category_2_amount REAL,
    top_category_3 TEXT,
    top_category_3_amount REAL,
    prev_month_transaction_count INTEGER,
    mom_transaction_change_percent REAL,
    prev_month_amount REAL,
    mom_amount_change_percent REAL,
    payment_method_rank INTEGER NOT NULL,
    snapshot_version_source INTEGER NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_dst_payment_version ON dst_payment_method_summary(snapshot_version_source);
";

/// Every table the pipeline owns, in creation order.
pub const TABLES: &[&str] = &[
    "log_validation_results",
    "src_daily_spending",
    "src_load_files",
    "stg_dim_person",
    "stg_dim_location",
    "stg_dim_category",
    "stg_dim_payment_method",
    "stg_fact_spending",
    "stg_rejected_records",
    "curated_spending_snapshots",
    "dst_monthly_spending_summary",
    "dst_category_trends",
    "dst_person_analytics",
    "dst_payment_method_summary",
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    insights::deploy_views(conn)?;
    Ok(())
}

/// `SELECT count(*)` for a table or view owned by the pipeline.
pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let n = conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(n)
}

/// The version currently flagged latest in the curated layer, if any.
pub fn latest_snapshot_version(conn: &Connection) -> Result<Option<i64>> {
    let v: Option<i64> = conn.query_row(
        "SELECT MAX(snapshot_version) FROM curated_spending_snapshots WHERE is_latest = 1",
        [],
        |r| r.get(0),
    )?;
    Ok(v)
}

pub struct ColumnInfo {
    pub name: String,
    pub not_null: bool,
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let cols = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                not_null: row.get::<_, i64>(3)? == 1,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(cols)
}
