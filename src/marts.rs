use std::collections::{BTreeMap, BTreeSet, HashMap};

use rusqlite::{params, Connection};
use tracing::info;

use crate::classify::CategoryGroup;
use crate::db::latest_snapshot_version;
use crate::error::{EtlError, Result};
use crate::trends::{median, pct_change, rolling_average, round2, safe_pct, trend_direction, YearMonth};

const WEEKS_PER_MONTH: f64 = 4.33;

// ---------------------------------------------------------------------------
// Mart registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mart {
    Monthly,
    Category,
    Person,
    Payment,
}

impl Mart {
    pub const ALL: [Mart; 4] = [Self::Monthly, Self::Category, Self::Person, Self::Payment];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Category => "category",
            Self::Person => "person",
            Self::Payment => "payment",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Monthly => "dst_monthly_spending_summary",
            Self::Category => "dst_category_trends",
            Self::Person => "dst_person_analytics",
            Self::Payment => "dst_payment_method_summary",
        }
    }

    pub fn get_by_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }
}

#[derive(Debug, Clone)]
pub struct MartResult {
    pub mart: Mart,
    pub snapshot_version: i64,
    pub deleted: usize,
    pub inserted: usize,
}

/// One row of the latest snapshot, as the marts see it.
#[derive(Debug, Clone)]
struct SnapRow {
    ym: YearMonth,
    spending_date: String,
    day_of_week: i64,
    person: String,
    category: String,
    group: Option<String>,
    location: String,
    location_type: Option<String>,
    payment: String,
    payment_type: Option<String>,
    amount: f64,
    quality: Option<f64>,
}

fn latest_rows(conn: &Connection) -> Result<(i64, Vec<SnapRow>)> {
    let version = latest_snapshot_version(conn)?
        .ok_or_else(|| EtlError::empty("curated_spending_snapshots", "Run `spendflow curated snapshot` first."))?;
    let mut stmt = conn.prepare(
        "SELECT spending_year, spending_month, spending_date, spending_day_of_week,
                COALESCE(person_name, 'Unknown'), COALESCE(category_name, 'Unknown'), category_group,
                COALESCE(location_name, 'Unknown'), location_type,
                COALESCE(payment_method_name, 'Unknown'), payment_type,
                amount_cleaned, data_quality_score
         FROM curated_spending_snapshots
         WHERE snapshot_version = ?1 AND is_latest = 1
         ORDER BY curated_id",
    )?;
    let rows = stmt
        .query_map([version], |r| {
            Ok(SnapRow {
                ym: YearMonth::new(r.get(0)?, r.get(1)?),
                spending_date: r.get(2)?,
                day_of_week: r.get(3)?,
                person: r.get(4)?,
                category: r.get(5)?,
                group: r.get(6)?,
                location: r.get(7)?,
                location_type: r.get(8)?,
                payment: r.get(9)?,
                payment_type: r.get(10)?,
                amount: r.get(11)?,
                quality: r.get(12)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((version, rows))
}

fn clear_version(conn: &Connection, mart: Mart, version: i64) -> Result<usize> {
    let n = conn.execute(
        &format!("DELETE FROM {} WHERE snapshot_version_source = ?1", mart.table()),
        [version],
    )?;
    Ok(n)
}

fn month_bounds(ym: YearMonth) -> (String, String) {
    let fmt = |d: Option<chrono::NaiveDate>| d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
    (fmt(ym.first_day()), fmt(ym.last_day()))
}

fn diff(current: f64, previous: Option<f64>) -> Option<f64> {
    previous.map(|p| round2(current - p))
}

#[derive(Default)]
struct Quality {
    sum: f64,
    n: usize,
}

impl Quality {
    fn add(&mut self, q: Option<f64>) {
        if let Some(q) = q {
            self.sum += q;
            self.n += 1;
        }
    }

    fn avg(&self) -> Option<f64> {
        (self.n > 0).then(|| round2(self.sum / self.n as f64))
    }
}

/// Sort `(name, total)` pairs by total desc, ties by name, and number them from 1.
fn rank_by_total<'a>(mut entries: Vec<(&'a str, f64)>) -> HashMap<&'a str, i64> {
    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (name, _))| (name, i as i64 + 1))
        .collect()
}

// ---------------------------------------------------------------------------
// Monthly summary
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MonthlyAgg {
    group: Option<String>,
    location_type: Option<String>,
    total: f64,
    count: i64,
    min: f64,
    max: f64,
    quality: Quality,
}

fn monthly(conn: &Connection, version: i64, rows: &[SnapRow]) -> Result<MartResult> {
    let deleted = clear_version(conn, Mart::Monthly, version)?;
    let mut groups: BTreeMap<(YearMonth, &str, &str, &str), MonthlyAgg> = BTreeMap::new();
    for r in rows {
        let agg = groups
            .entry((r.ym, r.person.as_str(), r.category.as_str(), r.location.as_str()))
            .or_insert_with(|| MonthlyAgg {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                ..Default::default()
            });
        agg.group = agg.group.take().or_else(|| r.group.clone());
        agg.location_type = agg.location_type.take().or_else(|| r.location_type.clone());
        agg.total += r.amount;
        agg.count += 1;
        agg.min = agg.min.min(r.amount);
        agg.max = agg.max.max(r.amount);
        agg.quality.add(r.quality);
    }

    let mut stmt = conn.prepare(
        "INSERT INTO dst_monthly_spending_summary (
            year, month, quarter, month_start_date, month_end_date,
            person_name, category_name, category_group, location_name, location_type,
            total_spending, transaction_count, avg_transaction_amount,
            min_transaction_amount, max_transaction_amount,
            prev_month_spending, mom_absolute_change, mom_percent_change,
            prev_year_spending, yoy_absolute_change, yoy_percent_change,
            avg_quality_score, snapshot_version_source
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
    )?;
    let mut inserted = 0;
    for (&(ym, person, category, location), agg) in &groups {
        let total = round2(agg.total);
        let prev_month = groups.get(&(ym.prev(), person, category, location)).map(|a| round2(a.total));
        let prev_year = groups
            .get(&(ym.minus_years(1), person, category, location))
            .map(|a| round2(a.total));
        let (start, end) = month_bounds(ym);
        inserted += stmt.execute(params![
            ym.year,
            ym.month,
            ym.quarter(),
            start,
            end,
            person,
            category,
            agg.group,
            location,
            agg.location_type,
            total,
            agg.count,
            round2(agg.total / agg.count as f64),
            round2(agg.min),
            round2(agg.max),
            prev_month,
            diff(total, prev_month),
            pct_change(total, prev_month),
            prev_year,
            diff(total, prev_year),
            pct_change(total, prev_year),
            agg.quality.avg(),
            version,
        ])?;
    }
    Ok(MartResult {
        mart: Mart::Monthly,
        snapshot_version: version,
        deleted,
        inserted,
    })
}

// ---------------------------------------------------------------------------
// Category trends
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CategoryAgg<'a> {
    group: Option<String>,
    total: f64,
    count: i64,
    persons: BTreeSet<&'a str>,
}

fn category(conn: &Connection, version: i64, rows: &[SnapRow]) -> Result<MartResult> {
    let deleted = clear_version(conn, Mart::Category, version)?;
    let mut groups: BTreeMap<(YearMonth, &str), CategoryAgg> = BTreeMap::new();
    for r in rows {
        let agg = groups.entry((r.ym, r.category.as_str())).or_default();
        agg.group = agg.group.take().or_else(|| r.group.clone());
        agg.total += r.amount;
        agg.count += 1;
        agg.persons.insert(r.person.as_str());
    }

    let mut series: HashMap<&str, BTreeMap<YearMonth, f64>> = HashMap::new();
    let mut by_month: BTreeMap<YearMonth, Vec<(&str, f64)>> = BTreeMap::new();
    for (&(ym, cat), agg) in &groups {
        series.entry(cat).or_default().insert(ym, agg.total);
        by_month.entry(ym).or_default().push((cat, agg.total));
    }
    let month_totals: HashMap<YearMonth, f64> = by_month
        .iter()
        .map(|(ym, entries)| (*ym, entries.iter().map(|(_, t)| t).sum()))
        .collect();
    let ranks: HashMap<YearMonth, HashMap<&str, i64>> = by_month
        .into_iter()
        .map(|(ym, entries)| (ym, rank_by_total(entries)))
        .collect();

    let mut stmt = conn.prepare(
        "INSERT INTO dst_category_trends (
            year, month, quarter, month_start_date, category_name, category_group,
            total_spending, transaction_count, unique_persons, avg_transaction_amount,
            prev_month_spending, mom_absolute_change, mom_percent_change, mom_trend_direction,
            prev_year_spending, yoy_absolute_change, yoy_percent_change, yoy_trend_direction,
            rolling_3month_avg, rolling_6month_avg,
            category_rank_current, category_rank_prev_month, rank_change,
            percent_of_total_spending, snapshot_version_source
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
    )?;
    let mut inserted = 0;
    for (&(ym, cat), agg) in &groups {
        let total = round2(agg.total);
        let prev_month = groups.get(&(ym.prev(), cat)).map(|a| round2(a.total));
        let prev_year = groups.get(&(ym.minus_years(1), cat)).map(|a| round2(a.total));
        let cat_series = &series[cat];
        let rank = ranks.get(&ym).and_then(|r| r.get(cat)).copied().unwrap_or(0);
        let prev_rank = ranks.get(&ym.prev()).and_then(|r| r.get(cat)).copied();
        let rank_change = prev_rank.map_or(0, |p| p - rank);
        let (start, _) = month_bounds(ym);
        inserted += stmt.execute(params![
            ym.year,
            ym.month,
            ym.quarter(),
            start,
            cat,
            agg.group,
            total,
            agg.count,
            agg.persons.len() as i64,
            round2(agg.total / agg.count as f64),
            prev_month,
            diff(total, prev_month),
            pct_change(total, prev_month),
            trend_direction(total, prev_month),
            prev_year,
            diff(total, prev_year),
            pct_change(total, prev_year),
            trend_direction(total, prev_year),
            rolling_average(cat_series, ym, 3),
            rolling_average(cat_series, ym, 6),
            rank,
            prev_rank,
            rank_change,
            safe_pct(agg.total, month_totals.get(&ym).copied().unwrap_or(0.0)),
            version,
        ])?;
    }
    Ok(MartResult {
        mart: Mart::Category,
        snapshot_version: version,
        deleted,
        inserted,
    })
}

// ---------------------------------------------------------------------------
// Person analytics
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PersonAgg<'a> {
    amounts: Vec<f64>,
    by_category: BTreeMap<&'a str, f64>,
    by_group: [f64; 6],
    locations: BTreeSet<&'a str>,
    payments: BTreeSet<&'a str>,
    weekday: f64,
    weekend: f64,
    buckets: [i64; 4],
    days: BTreeSet<&'a str>,
    quality: Quality,
}

impl PersonAgg<'_> {
    fn total(&self) -> f64 {
        self.amounts.iter().sum()
    }

    fn group(&self, g: CategoryGroup) -> f64 {
        self.by_group[g as usize]
    }

    fn top_category(&self) -> Option<(&str, f64)> {
        self.by_category
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, total)| (*name, *total))
    }
}

fn size_bucket(amount: f64) -> usize {
    if amount < 10.0 {
        0
    } else if amount < 100.0 {
        1
    } else if amount < 500.0 {
        2
    } else {
        3
    }
}

fn person(conn: &Connection, version: i64, rows: &[SnapRow]) -> Result<MartResult> {
    let deleted = clear_version(conn, Mart::Person, version)?;
    let mut groups: BTreeMap<(YearMonth, &str), PersonAgg> = BTreeMap::new();
    for r in rows {
        let agg = groups.entry((r.ym, r.person.as_str())).or_default();
        agg.amounts.push(r.amount);
        *agg.by_category.entry(r.category.as_str()).or_default() += r.amount;
        let group = r.group.as_deref().map_or(CategoryGroup::Other, CategoryGroup::from_name);
        agg.by_group[group as usize] += r.amount;
        agg.locations.insert(r.location.as_str());
        agg.payments.insert(r.payment.as_str());
        match r.day_of_week {
            1..=5 => agg.weekday += r.amount,
            6 | 7 => agg.weekend += r.amount,
            _ => {}
        }
        agg.buckets[size_bucket(r.amount)] += 1;
        agg.days.insert(r.spending_date.as_str());
        agg.quality.add(r.quality);
    }
    let totals: HashMap<(YearMonth, &str), f64> = groups.iter().map(|(k, a)| (*k, a.total())).collect();

    let mut stmt = conn.prepare(
        "INSERT INTO dst_person_analytics (
            year, month, quarter, month_start_date, person_name,
            total_spending, transaction_count, avg_transaction_amount, median_transaction_amount,
            top_category, top_category_spending, top_category_percent,
            essential_spending, discretionary_spending, transport_spending,
            healthcare_spending, education_spending, other_spending,
            essential_percent, discretionary_percent, essential_to_discretionary_ratio,
            unique_categories_count, unique_locations_count, unique_payment_methods_count,
            weekday_spending, weekend_spending, weekend_spending_percent,
            small_transactions_count, medium_transactions_count,
            large_transactions_count, xlarge_transactions_count,
            avg_daily_spending, avg_weekly_spending, days_with_spending, spending_frequency_percent,
            prev_month_total, mom_absolute_change, mom_percent_change,
            prev_year_total, yoy_absolute_change, yoy_percent_change,
            avg_quality_score, snapshot_version_source
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20,
                  ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38, ?39,
                  ?40, ?41, ?42, ?43)",
    )?;
    let mut inserted = 0;
    for (&(ym, name), agg) in &groups {
        let raw_total = agg.total();
        let total = round2(raw_total);
        let count = agg.amounts.len();
        let essential = agg.group(CategoryGroup::Essential);
        let discretionary = agg.group(CategoryGroup::Discretionary);
        let top = agg.top_category();
        let days_in_month = ym.days() as f64;
        let prev_month = totals.get(&(ym.prev(), name)).map(|t| round2(*t));
        let prev_year = totals.get(&(ym.minus_years(1), name)).map(|t| round2(*t));
        let (start, _) = month_bounds(ym);
        inserted += stmt.execute(params![
            ym.year,
            ym.month,
            ym.quarter(),
            start,
            name,
            total,
            count as i64,
            round2(raw_total / count as f64),
            median(&agg.amounts).map(round2),
            top.map(|(c, _)| c),
            top.map(|(_, t)| round2(t)),
            top.and_then(|(_, t)| safe_pct(t, raw_total)),
            round2(essential),
            round2(discretionary),
            round2(agg.group(CategoryGroup::Transport)),
            round2(agg.group(CategoryGroup::Healthcare)),
            round2(agg.group(CategoryGroup::Education)),
            round2(agg.group(CategoryGroup::Other)),
            safe_pct(essential, raw_total),
            safe_pct(discretionary, raw_total),
            (discretionary > 0.0).then(|| round2(essential / discretionary)),
            agg.by_category.len() as i64,
            agg.locations.len() as i64,
            agg.payments.len() as i64,
            round2(agg.weekday),
            round2(agg.weekend),
            safe_pct(agg.weekend, raw_total),
            agg.buckets[0],
            agg.buckets[1],
            agg.buckets[2],
            agg.buckets[3],
            round2(raw_total / days_in_month),
            round2(raw_total / WEEKS_PER_MONTH),
            agg.days.len() as i64,
            round2(agg.days.len() as f64 / days_in_month * 100.0),
            prev_month,
            diff(total, prev_month),
            pct_change(total, prev_month),
            prev_year,
            diff(total, prev_year),
            pct_change(total, prev_year),
            agg.quality.avg(),
            version,
        ])?;
    }
    Ok(MartResult {
        mart: Mart::Person,
        snapshot_version: version,
        deleted,
        inserted,
    })
}

// ---------------------------------------------------------------------------
// Payment method summary
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PaymentAgg<'a> {
    payment_type: Option<String>,
    count: i64,
    persons: BTreeSet<&'a str>,
    total: f64,
    min: f64,
    max: f64,
    by_category: BTreeMap<&'a str, f64>,
}

impl PaymentAgg<'_> {
    fn top_categories(&self, n: usize) -> Vec<(&str, f64)> {
        let mut cats: Vec<(&str, f64)> = self.by_category.iter().map(|(c, t)| (*c, *t)).collect();
        cats.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        cats.truncate(n);
        cats
    }
}

fn payment(conn: &Connection, version: i64, rows: &[SnapRow]) -> Result<MartResult> {
    let deleted = clear_version(conn, Mart::Payment, version)?;
    let mut groups: BTreeMap<(YearMonth, &str), PaymentAgg> = BTreeMap::new();
    let mut month_counts: HashMap<YearMonth, i64> = HashMap::new();
    let mut month_amounts: HashMap<YearMonth, f64> = HashMap::new();
    for r in rows {
        let agg = groups.entry((r.ym, r.payment.as_str())).or_insert_with(|| PaymentAgg {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            ..Default::default()
        });
        agg.payment_type = agg.payment_type.take().or_else(|| r.payment_type.clone());
        agg.count += 1;
        agg.persons.insert(r.person.as_str());
        agg.total += r.amount;
        agg.min = agg.min.min(r.amount);
        agg.max = agg.max.max(r.amount);
        *agg.by_category.entry(r.category.as_str()).or_default() += r.amount;
        *month_counts.entry(r.ym).or_default() += 1;
        *month_amounts.entry(r.ym).or_default() += r.amount;
    }

    let mut by_month: BTreeMap<YearMonth, Vec<(&str, f64)>> = BTreeMap::new();
    for (&(ym, method), agg) in &groups {
        by_month.entry(ym).or_default().push((method, agg.total));
    }
    let ranks: HashMap<YearMonth, HashMap<&str, i64>> = by_month
        .into_iter()
        .map(|(ym, entries)| (ym, rank_by_total(entries)))
        .collect();

    let mut stmt = conn.prepare(
        "INSERT INTO dst_payment_method_summary (
            year, month, quarter, month_start_date, payment_method_name, payment_type,
            transaction_count, unique_persons_count, total_amount, avg_transaction_amount,
            min_transaction_amount, max_transaction_amount,
            percent_of_transactions, percent_of_spending,
            top_category_1, top_category_1_amount, top_category_2, top_category_2_amount,
            top_category_3, top_category_3_amount,
            prev_month_transaction_count, mom_transaction_change_percent,
            prev_month_amount, mom_amount_change_percent,
            payment_method_rank, snapshot_version_source
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
    )?;
    let mut inserted = 0;
    for (&(ym, method), agg) in &groups {
        let total = round2(agg.total);
        let prev = groups.get(&(ym.prev(), method));
        let prev_count = prev.map(|p| p.count);
        let prev_amount = prev.map(|p| round2(p.total));
        let top = agg.top_categories(3);
        let top_name = |i: usize| top.get(i).map(|(c, _)| *c);
        let top_amount = |i: usize| top.get(i).map(|(_, t)| round2(*t));
        let rank = ranks.get(&ym).and_then(|r| r.get(method)).copied().unwrap_or(0);
        let (start, _) = month_bounds(ym);
        inserted += stmt.execute(params![
            ym.year,
            ym.month,
            ym.quarter(),
            start,
            method,
            agg.payment_type,
            agg.count,
            agg.persons.len() as i64,
            total,
            round2(agg.total / agg.count as f64),
            round2(agg.min),
            round2(agg.max),
            safe_pct(agg.count as f64, month_counts.get(&ym).copied().unwrap_or(0) as f64),
            safe_pct(agg.total, month_amounts.get(&ym).copied().unwrap_or(0.0)),
            top_name(0),
            top_amount(0),
            top_name(1),
            top_amount(1),
            top_name(2),
            top_amount(2),
            prev_count,
            pct_change(agg.count as f64, prev_count.map(|c| c as f64)),
            prev_amount,
            pct_change(total, prev_amount),
            rank,
            version,
        ])?;
    }
    Ok(MartResult {
        mart: Mart::Payment,
        snapshot_version: version,
        deleted,
        inserted,
    })
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

fn build(conn: &Connection, mart: Mart, version: i64, rows: &[SnapRow]) -> Result<MartResult> {
    let result = match mart {
        Mart::Monthly => monthly(conn, version, rows)?,
        Mart::Category => category(conn, version, rows)?,
        Mart::Person => person(conn, version, rows)?,
        Mart::Payment => payment(conn, version, rows)?,
    };
    info!(
        table = mart.table(),
        version,
        deleted = result.deleted,
        inserted = result.inserted,
        "mart populated"
    );
    Ok(result)
}

/// Rebuild one mart for the latest snapshot version.
pub fn populate(conn: &Connection, mart: Mart) -> Result<MartResult> {
    let tx = conn.unchecked_transaction()?;
    let (version, rows) = latest_rows(&tx)?;
    let result = build(&tx, mart, version, &rows)?;
    tx.commit()?;
    Ok(result)
}

pub fn populate_monthly_summary(conn: &Connection) -> Result<MartResult> {
    populate(conn, Mart::Monthly)
}

pub fn populate_category_trends(conn: &Connection) -> Result<MartResult> {
    populate(conn, Mart::Category)
}

pub fn populate_person_analytics(conn: &Connection) -> Result<MartResult> {
    populate(conn, Mart::Person)
}

pub fn populate_payment_summary(conn: &Connection) -> Result<MartResult> {
    populate(conn, Mart::Payment)
}

/// All four marts in order, committed together.
pub fn populate_all(conn: &Connection) -> Result<Vec<MartResult>> {
    let tx = conn.unchecked_transaction()?;
    let (version, rows) = latest_rows(&tx)?;
    let results = Mart::ALL
        .into_iter()
        .map(|mart| build(&tx, mart, version, &rows))
        .collect::<Result<Vec<_>>>()?;
    tx.commit()?;
    Ok(results)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::curated::create_snapshot;
    use crate::db::tests::test_db;
    use crate::settings::Settings;
    use crate::stg_transform::tests::insert_src;
    use crate::stg_transform::transform_and_load;

    type Src<'a> = [Option<&'a str>; 7];

    fn row<'a>(person: &'a str, date: &'a str, category: &'a str, amount: &'a str, payment: &'a str) -> Src<'a> {
        [Some(person), Some(date), Some(category), Some(amount), Some("Mall"), Some("x"), Some(payment)]
    }

    /// Alice and Bob across March/April 2024 and April 2023.
    pub(crate) fn snapshot_fixture(conn: &Connection) {
        insert_src(
            conn,
            &[
                row("Alice", "2024-03-04", "Food", "100", "Cash"),
                row("Alice", "2024-04-01", "Food", "150", "Cash"),
                row("Alice", "2024-04-06", "Shopping", "600", "Visa Card"),
                row("Alice", "2024-04-06", "Food", "5", "Cash"),
                row("Alice", "2023-04-10", "Food", "50", "Cash"),
                row("Bob", "2024-04-02", "Transport", "20", "EZ-Link"),
                row("Bob", "2024-04-03", "Transport", "30", "EZ-Link"),
            ],
        );
        transform_and_load(conn, &Settings::default()).unwrap();
        create_snapshot(conn).unwrap();
    }

    fn f(conn: &Connection, sql: &str) -> f64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    fn opt(conn: &Connection, sql: &str) -> Option<f64> {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_get_by_key() {
        assert_eq!(Mart::get_by_key("person"), Some(Mart::Person));
        assert_eq!(Mart::get_by_key("nope"), None);
    }

    #[test]
    fn test_requires_snapshot() {
        let (_dir, conn) = test_db();
        assert!(matches!(populate_all(&conn), Err(EtlError::EmptyStage { .. })));
    }

    #[test]
    fn test_monthly_summary_mom_and_yoy() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        let r = populate_monthly_summary(&conn).unwrap();
        assert_eq!(r.snapshot_version, 1);
        assert_eq!(r.deleted, 0);
        // Alice/Food/Mall: 2023-04, 2024-03, 2024-04; Alice/Shopping 2024-04; Bob/Transport 2024-04
        assert_eq!(r.inserted, 5);

        let where_ = "FROM dst_monthly_spending_summary WHERE person_name = 'Alice' AND category_name = 'Food' AND year = 2024 AND month = 4";
        assert_eq!(f(&conn, &format!("SELECT total_spending {where_}")), 155.0);
        assert_eq!(f(&conn, &format!("SELECT prev_month_spending {where_}")), 100.0);
        assert_eq!(f(&conn, &format!("SELECT mom_percent_change {where_}")), 55.0);
        assert_eq!(f(&conn, &format!("SELECT prev_year_spending {where_}")), 50.0);
        assert_eq!(f(&conn, &format!("SELECT yoy_absolute_change {where_}")), 105.0);
        assert_eq!(f(&conn, &format!("SELECT min_transaction_amount {where_}")), 5.0);

        let again = populate_monthly_summary(&conn).unwrap();
        assert_eq!(again.deleted, 5);
        assert_eq!(again.inserted, 5);
    }

    #[test]
    fn test_category_trends_rank_and_share() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        populate_category_trends(&conn).unwrap();
        let april = "FROM dst_category_trends WHERE year = 2024 AND month = 4";
        let (rank, share): (i64, f64) = conn
            .query_row(
                &format!("SELECT category_rank_current, percent_of_total_spending {april} AND category_name = 'Shopping'"),
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(rank, 1);
        // 600 of 805
        assert_eq!(share, 74.53);
        let (prev_rank, change, trend): (Option<i64>, i64, String) = conn
            .query_row(
                &format!("SELECT category_rank_prev_month, rank_change, mom_trend_direction {april} AND category_name = 'Food'"),
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(prev_rank, Some(1));
        assert_eq!(change, -1);
        assert_eq!(trend, "INCREASING");
        assert_eq!(
            f(&conn, &format!("SELECT rolling_3month_avg {april} AND category_name = 'Food'")),
            127.5
        );
        let no_data: String = conn
            .query_row(
                &format!("SELECT mom_trend_direction {april} AND category_name = 'Transport'"),
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(no_data, "NO_DATA");
    }

    #[test]
    fn test_person_analytics_breakdown() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        populate_person_analytics(&conn).unwrap();
        let alice = "FROM dst_person_analytics WHERE person_name = 'Alice' AND year = 2024 AND month = 4";
        assert_eq!(f(&conn, &format!("SELECT total_spending {alice}")), 755.0);
        assert_eq!(f(&conn, &format!("SELECT median_transaction_amount {alice}")), 150.0);
        assert_eq!(f(&conn, &format!("SELECT essential_spending {alice}")), 155.0);
        assert_eq!(f(&conn, &format!("SELECT discretionary_spending {alice}")), 600.0);
        // 2024-04-06 was a Saturday
        assert_eq!(f(&conn, &format!("SELECT weekend_spending {alice}")), 605.0);
        let (small, medium, large, xlarge, days): (i64, i64, i64, i64, i64) = conn
            .query_row(
                &format!(
                    "SELECT small_transactions_count, medium_transactions_count, large_transactions_count,
                            xlarge_transactions_count, days_with_spending {alice}"
                ),
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!((small, medium, large, xlarge, days), (1, 0, 1, 1, 2));
        let top: String = conn
            .query_row(&format!("SELECT top_category {alice}"), [], |r| r.get(0))
            .unwrap();
        assert_eq!(top, "Shopping");
        assert_eq!(f(&conn, &format!("SELECT avg_daily_spending {alice}")), 25.17);
        assert_eq!(f(&conn, &format!("SELECT mom_percent_change {alice}")), 655.0);
        let bob_ratio = opt(
            &conn,
            "SELECT essential_to_discretionary_ratio FROM dst_person_analytics WHERE person_name = 'Bob'",
        );
        assert_eq!(bob_ratio, None);
    }

    #[test]
    fn test_payment_summary() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        populate_payment_summary(&conn).unwrap();
        let cash = "FROM dst_payment_method_summary WHERE payment_method_name = 'Cash' AND year = 2024 AND month = 4";
        assert_eq!(f(&conn, &format!("SELECT total_amount {cash}")), 155.0);
        // 2 of 5 April transactions
        assert_eq!(f(&conn, &format!("SELECT percent_of_transactions {cash}")), 40.0);
        assert_eq!(f(&conn, &format!("SELECT mom_transaction_change_percent {cash}")), 100.0);
        let rank: i64 = conn
            .query_row(
                "SELECT payment_method_rank FROM dst_payment_method_summary
                 WHERE payment_method_name = 'Visa Card' AND year = 2024 AND month = 4",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rank, 1);
        let top: Option<String> = conn
            .query_row(&format!("SELECT top_category_2 {cash}"), [], |r| r.get(0))
            .unwrap();
        assert_eq!(top, None);
    }

    #[test]
    fn test_populate_all_counts() {
        let (_dir, conn) = test_db();
        snapshot_fixture(&conn);
        let results = populate_all(&conn).unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.inserted > 0 && r.snapshot_version == 1));
    }
}
