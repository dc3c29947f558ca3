use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::audit;
use crate::classify::{classify_category_group, classify_location_type, classify_payment_type};
use crate::db::count_rows;
use crate::error::{EtlError, Result};
use crate::parsers::{parse_amount, parse_date, DateParts};
use crate::quality::{data_quality_score, QualityInputs};
use crate::settings::Settings;
use crate::trends::round2;

pub const REASON_AMOUNT: &str = "amount_parse_failed";
pub const REASON_DATE: &str = "date_parse_failed";
pub const REASON_MISSING_KEY: &str = "missing_dimension_key";
const PROGRESS_EVERY: usize = 500;

/// A source row after cleaning, before it is keyed against the dimensions.
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub src_id: i64,
    pub person_name: Option<String>,
    pub location_name: Option<String>,
    pub location_type: &'static str,
    pub category_name: Option<String>,
    pub category_group: &'static str,
    pub payment_method_name: Option<String>,
    pub payment_type: &'static str,
    pub date: Option<NaiveDate>,
    pub amount_raw: Option<String>,
    pub amount: Option<f64>,
    pub currency: String,
    pub description: Option<String>,
    pub quality_score: i64,
}

impl StagedRow {
    pub fn rejection(&self) -> Option<&'static str> {
        if self.amount.is_none() {
            Some(REASON_AMOUNT)
        } else if self.date.is_none() {
            Some(REASON_DATE)
        } else {
            None
        }
    }
}

fn clean_text(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

struct SourceRow {
    src_id: i64,
    person_name: Option<String>,
    spending_date: Option<String>,
    category: Option<String>,
    amount: Option<String>,
    location: Option<String>,
    description: Option<String>,
    payment_method: Option<String>,
}

/// Parse, classify and score one source row.
fn stage_row(row: SourceRow, default_currency: &str) -> StagedRow {
    let amount = row.amount.as_deref().map(|a| parse_amount(a, default_currency));
    let currency = amount
        .as_ref()
        .map(|a| a.currency.clone())
        .unwrap_or_else(|| default_currency.to_string());
    // money is staged in cents so every later layer sums the same values
    let value = amount.and_then(|a| a.value).map(round2);
    let date = row.spending_date.as_deref().and_then(parse_date);

    let person_name = clean_text(row.person_name);
    let location_name = clean_text(row.location);
    let category_name = clean_text(row.category);
    let payment_method_name = clean_text(row.payment_method);
    let description = row.description.filter(|d| !d.trim().is_empty());

    let quality_score = data_quality_score(&QualityInputs {
        amount_parsed: value.is_some(),
        date_parsed: date.is_some(),
        has_description: description.is_some(),
        has_person: person_name.is_some(),
        has_location: location_name.is_some(),
        has_category: category_name.is_some(),
    });

    StagedRow {
        src_id: row.src_id,
        location_type: classify_location_type(location_name.as_deref().unwrap_or("")).as_str(),
        category_group: classify_category_group(category_name.as_deref().unwrap_or("")).as_str(),
        payment_type: classify_payment_type(payment_method_name.as_deref().unwrap_or("")).as_str(),
        person_name,
        location_name,
        category_name,
        payment_method_name,
        date,
        amount_raw: row.amount,
        amount: value,
        currency,
        description,
        quality_score,
    }
}

#[derive(Debug, Default)]
pub struct TransformSummary {
    pub batch_id: String,
    pub source_rows: usize,
    pub amount_failures: usize,
    pub date_failures: usize,
    pub valid_rows: usize,
    pub rejected_parse: usize,
    pub rejected_missing_key: usize,
    pub loaded: usize,
    pub persons: usize,
    pub locations: usize,
    pub categories: usize,
    pub payment_methods: usize,
    pub avg_quality: Option<f64>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl TransformSummary {
    fn rate(&self, failures: usize) -> f64 {
        if self.source_rows == 0 {
            0.0
        } else {
            (self.source_rows - failures) as f64 / self.source_rows as f64 * 100.0
        }
    }

    pub fn amount_success_rate(&self) -> f64 {
        self.rate(self.amount_failures)
    }

    pub fn date_success_rate(&self) -> f64 {
        self.rate(self.date_failures)
    }

    pub fn rejected(&self) -> usize {
        self.rejected_parse + self.rejected_missing_key
    }
}

// ---------------------------------------------------------------------------
// Stage steps
// ---------------------------------------------------------------------------

fn clear_staging(conn: &Connection) -> Result<()> {
    for table in [
        "stg_fact_spending",
        "stg_rejected_records",
        "stg_dim_payment_method",
        "stg_dim_category",
        "stg_dim_location",
        "stg_dim_person",
    ] {
        let n = conn.execute(&format!("DELETE FROM {table}"), [])?;
        debug!(table, removed = n, "cleared");
    }
    Ok(())
}

fn extract(conn: &Connection) -> Result<Vec<SourceRow>> {
    let mut stmt = conn.prepare(
        "SELECT src_id, person_name, spending_date, category, amount, location, description, payment_method
         FROM src_daily_spending ORDER BY src_id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SourceRow {
                src_id: r.get(0)?,
                person_name: r.get(1)?,
                spending_date: r.get(2)?,
                category: r.get(3)?,
                amount: r.get(4)?,
                location: r.get(5)?,
                description: r.get(6)?,
                payment_method: r.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Upsert distinct (name, type) pairs in first-seen order and read back name -> id.
fn load_dimension<'a>(
    conn: &Connection,
    upsert_sql: &str,
    select_sql: &str,
    values: impl Iterator<Item = (&'a str, Option<&'a str>)>,
) -> Result<HashMap<String, i64>> {
    let mut seen = HashSet::new();
    let mut stmt = conn.prepare(upsert_sql)?;
    for (name, kind) in values {
        if !seen.insert(name) {
            continue;
        }
        match kind {
            Some(kind) => stmt.execute(params![name, kind])?,
            None => stmt.execute(params![name])?,
        };
    }
    let mut select = conn.prepare(select_sql)?;
    let map = select
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(map)
}

fn reject(conn: &Connection, src_id: i64, reason: &str, batch_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO stg_rejected_records (src_id, reason, transform_batch_id) VALUES (?1, ?2, ?3)",
        params![src_id, reason, batch_id],
    )?;
    Ok(())
}

fn key_of(map: &HashMap<String, i64>, name: &Option<String>) -> Option<i64> {
    name.as_ref().and_then(|n| map.get(n).copied())
}

/// Rebuild the staging layer from every source row, in one transaction.
pub fn transform_and_load(conn: &Connection, settings: &Settings) -> Result<TransformSummary> {
    if count_rows(conn, "src_daily_spending")? == 0 {
        return Err(EtlError::empty("src_daily_spending", "Run `spendflow src load FILE` first."));
    }

    let tx = conn.unchecked_transaction()?;
    let batch_id = audit::new_run_id("STG_TRANSFORM");
    info!(batch = %batch_id, "transforming source into staging");

    clear_staging(&tx)?;
    let source = extract(&tx)?;

    let mut summary = TransformSummary {
        batch_id: batch_id.clone(),
        source_rows: source.len(),
        ..Default::default()
    };

    let staged: Vec<StagedRow> = source
        .into_iter()
        .map(|r| stage_row(r, &settings.default_currency))
        .collect();
    summary.amount_failures = staged.iter().filter(|r| r.amount.is_none()).count();
    summary.date_failures = staged.iter().filter(|r| r.date.is_none()).count();

    let mut valid = Vec::with_capacity(staged.len());
    for row in staged {
        match row.rejection() {
            Some(reason) => {
                reject(&tx, row.src_id, reason, &batch_id)?;
                summary.rejected_parse += 1;
            }
            None => valid.push(row),
        }
    }
    summary.valid_rows = valid.len();
    info!(
        valid = summary.valid_rows,
        rejected = summary.rejected_parse,
        "parsed source rows"
    );

    let persons = load_dimension(
        &tx,
        "INSERT INTO stg_dim_person (person_name) VALUES (?1) ON CONFLICT(person_name) DO NOTHING",
        "SELECT person_name, person_id FROM stg_dim_person",
        valid.iter().filter_map(|r| r.person_name.as_deref().map(|n| (n, None))),
    )?;
    let locations = load_dimension(
        &tx,
        "INSERT INTO stg_dim_location (location_name, location_type) VALUES (?1, ?2)
         ON CONFLICT(location_name) DO UPDATE SET location_type = excluded.location_type",
        "SELECT location_name, location_id FROM stg_dim_location",
        valid
            .iter()
            .filter_map(|r| r.location_name.as_deref().map(|n| (n, Some(r.location_type)))),
    )?;
    let categories = load_dimension(
        &tx,
        "INSERT INTO stg_dim_category (category_name, category_group) VALUES (?1, ?2)
         ON CONFLICT(category_name) DO UPDATE SET category_group = excluded.category_group",
        "SELECT category_name, category_id FROM stg_dim_category",
        valid
            .iter()
            .filter_map(|r| r.category_name.as_deref().map(|n| (n, Some(r.category_group)))),
    )?;
    let payments = load_dimension(
        &tx,
        "INSERT INTO stg_dim_payment_method (payment_method_name, payment_type) VALUES (?1, ?2)
         ON CONFLICT(payment_method_name) DO UPDATE SET payment_type = excluded.payment_type",
        "SELECT payment_method_name, payment_method_id FROM stg_dim_payment_method",
        valid
            .iter()
            .filter_map(|r| r.payment_method_name.as_deref().map(|n| (n, Some(r.payment_type)))),
    )?;
    summary.persons = persons.len();
    summary.locations = locations.len();
    summary.categories = categories.len();
    summary.payment_methods = payments.len();

    let mut insert = tx.prepare(
        "INSERT INTO stg_fact_spending (
            person_id, location_id, category_id, payment_method_id,
            spending_date, spending_year, spending_month, spending_day,
            spending_quarter, spending_day_of_week,
            amount_raw, amount_cleaned, currency_code, description,
            is_amount_parsed_successfully, is_date_parsed_successfully,
            data_quality_score, src_id, transform_batch_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 1, 1, ?15, ?16, ?17)",
    )?;

    let mut quality_total = 0i64;
    let mut min_date: Option<NaiveDate> = None;
    let mut max_date: Option<NaiveDate> = None;
    for row in &valid {
        let keys = (
            key_of(&persons, &row.person_name),
            key_of(&locations, &row.location_name),
            key_of(&categories, &row.category_name),
            key_of(&payments, &row.payment_method_name),
        );
        let (Some(person_id), Some(location_id), Some(category_id), Some(payment_id)) = keys else {
            reject(&tx, row.src_id, REASON_MISSING_KEY, &batch_id)?;
            summary.rejected_missing_key += 1;
            continue;
        };
        // rejection() already filtered rows without these
        let (Some(date), Some(amount)) = (row.date, row.amount) else {
            continue;
        };
        let parts = DateParts::from(date);
        insert.execute(params![
            person_id,
            location_id,
            category_id,
            payment_id,
            date.format("%Y-%m-%d").to_string(),
            parts.year,
            parts.month,
            parts.day,
            parts.quarter,
            parts.weekday_name,
            row.amount_raw,
            amount,
            row.currency,
            row.description,
            row.quality_score,
            row.src_id,
            batch_id,
        ])?;
        summary.loaded += 1;
        quality_total += row.quality_score;
        min_date = Some(min_date.map_or(date, |d| d.min(date)));
        max_date = Some(max_date.map_or(date, |d| d.max(date)));
        if summary.loaded % PROGRESS_EVERY == 0 {
            info!(loaded = summary.loaded, total = valid.len(), "loading facts");
        }
    }
    drop(insert);

    if summary.rejected_missing_key > 0 {
        warn!(rows = summary.rejected_missing_key, "rows dropped for missing dimension keys");
    }
    if summary.loaded > 0 {
        summary.avg_quality = Some(quality_total as f64 / summary.loaded as f64);
    }
    summary.date_range = min_date.zip(max_date);

    tx.commit()?;
    info!(batch = %batch_id, loaded = summary.loaded, "staging load complete");
    Ok(summary)
}

pub struct RejectedRecord {
    pub src_id: i64,
    pub reason: String,
    pub amount: Option<String>,
    pub spending_date: Option<String>,
}

pub fn rejected_records(conn: &Connection, limit: i64) -> Result<Vec<RejectedRecord>> {
    let mut stmt = conn.prepare(
        "SELECT r.src_id, r.reason, s.amount, s.spending_date
         FROM stg_rejected_records r
         LEFT JOIN src_daily_spending s ON s.src_id = r.src_id
         ORDER BY r.src_id LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit], |r| {
            Ok(RejectedRecord {
                src_id: r.get(0)?,
                reason: r.get(1)?,
                amount: r.get(2)?,
                spending_date: r.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::tests::test_db;

    pub(crate) fn insert_src(conn: &Connection, rows: &[[Option<&str>; 7]]) {
        for r in rows {
            conn.execute(
                "INSERT INTO src_daily_spending (person_name, spending_date, category, amount, location, description, payment_method, load_batch_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'BATCH_T')",
                params![r[0], r[1], r[2], r[3], r[4], r[5], r[6]],
            )
            .unwrap();
        }
    }

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn test_empty_source_is_an_error() {
        let (_dir, conn) = test_db();
        let err = transform_and_load(&conn, &settings());
        assert!(matches!(err, Err(EtlError::EmptyStage { .. })));
    }

    #[test]
    fn test_transform_loads_dimensions_and_facts() {
        let (_dir, conn) = test_db();
        insert_src(
            &conn,
            &[
                [Some(" Alice "), Some("01-Apr-2022"), Some("Groceries"), Some("$12.50"), Some("FairPrice Market"), Some("Weekly shop"), Some("Visa Card")],
                [Some("Alice"), Some("2022-04-03"), Some("Dining"), Some("SGD 30"), Some("Shopee"), None, Some("PayNow")],
                [Some("Bob"), Some("14/05/2024"), Some("Transport"), Some("2.10 USD"), Some("Bishan MRT"), Some("Train"), Some("EZ-Link")],
            ],
        );
        let summary = transform_and_load(&conn, &settings()).unwrap();
        assert_eq!(summary.source_rows, 3);
        assert_eq!(summary.loaded, 3);
        assert_eq!(summary.rejected(), 0);
        assert_eq!(summary.persons, 2);
        assert_eq!(summary.locations, 3);
        assert_eq!(summary.categories, 3);
        assert_eq!(summary.payment_methods, 3);
        assert_eq!(summary.amount_success_rate(), 100.0);
        assert_eq!(
            summary.date_range,
            Some((NaiveDate::from_ymd_opt(2022, 4, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 5, 14).unwrap()))
        );

        let (group, ltype): (String, String) = conn
            .query_row(
                "SELECT category_group, location_type FROM vw_stg_spending_complete WHERE src_id = 2",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(group, "Discretionary");
        assert_eq!(ltype, "Online");

        let (currency, score, dow): (String, i64, String) = conn
            .query_row(
                "SELECT currency_code, data_quality_score, spending_day_of_week FROM stg_fact_spending WHERE src_id = 3",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(currency, "USD");
        assert_eq!(score, 100);
        assert_eq!(dow, "Tuesday");

        // description missing costs 10 points
        let score: i64 = conn
            .query_row("SELECT data_quality_score FROM stg_fact_spending WHERE src_id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(score, 90);
    }

    #[test]
    fn test_rejections_are_recorded() {
        let (_dir, conn) = test_db();
        insert_src(
            &conn,
            &[
                [Some("Alice"), Some("01-Apr-2022"), Some("Food"), Some("abc"), Some("Mall"), Some("x"), Some("Cash")],
                [Some("Alice"), Some("someday"), Some("Food"), Some("5"), Some("Mall"), Some("x"), Some("Cash")],
                [None, Some("01-Apr-2022"), Some("Food"), Some("5"), Some("Mall"), Some("x"), Some("Cash")],
                [Some("Bob"), Some("01-Apr-2022"), Some("Food"), Some("5"), Some("Mall"), Some("x"), Some("Cash")],
            ],
        );
        let summary = transform_and_load(&conn, &settings()).unwrap();
        assert_eq!(summary.rejected_parse, 2);
        assert_eq!(summary.rejected_missing_key, 1);
        assert_eq!(summary.loaded, 1);
        assert_eq!(summary.date_success_rate(), 75.0);

        let rejected = rejected_records(&conn, 10).unwrap();
        let reasons: Vec<&str> = rejected.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(reasons, vec![REASON_AMOUNT, REASON_DATE, REASON_MISSING_KEY]);
    }

    #[test]
    fn test_rerun_rebuilds_from_scratch() {
        let (_dir, conn) = test_db();
        insert_src(
            &conn,
            &[[Some("Alice"), Some("01-Apr-2022"), Some("Food"), Some("5"), Some("Mall"), Some("x"), Some("Cash")]],
        );
        transform_and_load(&conn, &settings()).unwrap();
        let summary = transform_and_load(&conn, &settings()).unwrap();
        assert_eq!(summary.loaded, 1);
        assert_eq!(count_rows(&conn, "stg_fact_spending").unwrap(), 1);
        assert_eq!(count_rows(&conn, "stg_dim_person").unwrap(), 1);
    }

    #[test]
    fn test_failure_rolls_back_everything() {
        let (_dir, conn) = test_db();
        insert_src(
            &conn,
            &[[Some("Alice"), Some("01-Apr-2022"), Some("Food"), Some("5"), Some("Mall"), Some("x"), Some("Cash")]],
        );
        transform_and_load(&conn, &settings()).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER boom BEFORE INSERT ON stg_fact_spending BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();
        assert!(transform_and_load(&conn, &settings()).is_err());
        // previous staging contents survive
        assert_eq!(count_rows(&conn, "stg_fact_spending").unwrap(), 1);
    }
}
