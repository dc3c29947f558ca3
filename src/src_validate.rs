use std::collections::HashSet;

use chrono::Local;
use rusqlite::Connection;
use tracing::info;

use crate::audit;
use crate::db::count_rows;
use crate::error::{EtlError, Result};
use crate::models::{CheckResult, RawSpendingRow, Severity, ValidationRun};
use crate::parsers::{parse_amount, parse_date};
use crate::settings::Settings;

const STAGE: &str = "SRC";
const TABLE: &str = "src_daily_spending";
const MAX_SAMPLES: usize = 10;
pub const EXTREME_AMOUNT: f64 = 10_000.0;

/// Accumulates failures for one check.
struct Tally {
    name: &'static str,
    severity: Severity,
    message: &'static str,
    checked: i64,
    failed: i64,
    samples: Vec<i64>,
}

impl Tally {
    fn new(name: &'static str, severity: Severity, message: &'static str) -> Self {
        Self {
            name,
            severity,
            message,
            checked: 0,
            failed: 0,
            samples: Vec::new(),
        }
    }

    fn observe(&mut self, src_id: i64, failed: bool) {
        self.checked += 1;
        if failed {
            self.failed += 1;
            if self.samples.len() < MAX_SAMPLES {
                self.samples.push(src_id);
            }
        }
    }

    fn finish(self) -> CheckResult {
        let check = CheckResult::new(self.name, self.severity, self.checked, self.failed).with_samples(self.samples);
        if check.passed {
            check
        } else {
            check.with_message(self.message)
        }
    }
}

fn blank(v: &Option<String>) -> bool {
    v.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn load_rows(conn: &Connection) -> Result<Vec<(i64, RawSpendingRow)>> {
    let mut stmt = conn.prepare(
        "SELECT src_id, person_name, spending_date, category, amount, location, description, payment_method
         FROM src_daily_spending ORDER BY src_id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                RawSpendingRow {
                    person_name: r.get(1)?,
                    spending_date: r.get(2)?,
                    category: r.get(3)?,
                    amount: r.get(4)?,
                    location: r.get(5)?,
                    description: r.get(6)?,
                    payment_method: r.get(7)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Run every SRC check and record the results under a fresh run id.
pub fn validate_source(conn: &Connection, settings: &Settings) -> Result<ValidationRun> {
    if count_rows(conn, TABLE)? == 0 {
        return Err(EtlError::empty(TABLE, "Run `spendflow src load FILE` first."));
    }
    let rows = load_rows(conn)?;
    let today = Local::now().date_naive();

    let mut null_person = Tally::new("null_person_name", Severity::Error, "person_name is NULL or blank");
    let mut null_date = Tally::new("null_spending_date", Severity::Error, "spending_date is NULL or blank");
    let mut null_amount = Tally::new("null_amount", Severity::Error, "amount is NULL or blank");
    let mut bad_amount = Tally::new("invalid_amount_format", Severity::Warning, "amount cannot be parsed as a number");
    let mut bad_date = Tally::new("invalid_date_format", Severity::Warning, "spending_date matches no known date format");
    let mut non_positive = Tally::new("non_positive_amount", Severity::Warning, "amount is zero or negative");
    let mut extreme = Tally::new("extreme_amount", Severity::Warning, "amount exceeds 10,000");
    let mut future = Tally::new("future_date", Severity::Warning, "spending_date is in the future");
    let mut no_category = Tally::new("missing_category", Severity::Warning, "category is NULL or blank");
    let mut no_location = Tally::new("missing_location", Severity::Warning, "location is NULL or blank");
    let mut no_payment = Tally::new("missing_payment_method", Severity::Warning, "payment_method is NULL or blank");
    let mut duplicates = Tally::new("duplicate_records", Severity::Warning, "row duplicates an earlier row");

    let mut seen = HashSet::new();
    for (id, row) in &rows {
        let id = *id;
        null_person.observe(id, blank(&row.person_name));
        null_date.observe(id, blank(&row.spending_date));
        null_amount.observe(id, blank(&row.amount));
        no_category.observe(id, blank(&row.category));
        no_location.observe(id, blank(&row.location));
        no_payment.observe(id, blank(&row.payment_method));

        if let Some(raw) = row.amount.as_deref().filter(|s| !s.trim().is_empty()) {
            let parsed = parse_amount(raw, &settings.default_currency);
            bad_amount.observe(id, !parsed.ok);
            if let Some(v) = parsed.value {
                non_positive.observe(id, v <= 0.0);
                extreme.observe(id, v > EXTREME_AMOUNT);
            }
        }
        if let Some(raw) = row.spending_date.as_deref().filter(|s| !s.trim().is_empty()) {
            let parsed = parse_date(raw);
            bad_date.observe(id, parsed.is_none());
            if let Some(d) = parsed {
                future.observe(id, d > today);
            }
        }

        let key = (
            row.person_name.clone(),
            row.spending_date.clone(),
            row.amount.clone(),
            row.category.clone(),
            row.location.clone(),
            row.description.clone(),
        );
        duplicates.observe(id, !seen.insert(key));
    }

    let run_id = audit::new_run_id("VAL");
    let mut run = ValidationRun::new(STAGE, run_id);
    run.checks = [
        null_person,
        null_date,
        null_amount,
        bad_amount,
        bad_date,
        non_positive,
        extreme,
        future,
        no_category,
        no_location,
        no_payment,
        duplicates,
    ]
    .into_iter()
    .map(Tally::finish)
    .collect();

    let tx = conn.unchecked_transaction()?;
    audit::clear_stage_checks(&tx, STAGE, TABLE)?;
    for check in &run.checks {
        audit::record(&tx, &run.run_id, STAGE, TABLE, check)?;
    }
    tx.commit()?;

    info!(run = %run.run_id, records = rows.len(), errors = run.errors(), warnings = run.warnings(), "source validated");
    Ok(run)
}
