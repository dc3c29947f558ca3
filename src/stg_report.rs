use chrono::Local;
use rusqlite::Connection;

use crate::db::count_rows;
use crate::error::{EtlError, Result};
use crate::quality::quality_band;
use crate::stg_transform::REASON_MISSING_KEY;
use crate::trends::median;

pub struct TableCount {
    pub label: &'static str,
    pub table: &'static str,
    pub rows: i64,
}

pub struct Completeness {
    pub counts: Vec<TableCount>,
    pub source_rows: i64,
    pub fact_rows: i64,
    pub load_pct: f64,
    pub null_key_fields: Vec<(&'static str, i64)>,
}

#[derive(Default)]
pub struct QualityStats {
    pub avg: f64,
    pub min: i64,
    pub max: i64,
    pub perfect: i64,
    pub high: i64,
    pub good: i64,
    pub poor: i64,
}

#[derive(Default)]
pub struct AmountStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub non_positive: i64,
    pub extreme: i64,
}

#[derive(Default)]
pub struct DateStats {
    pub min: Option<String>,
    pub max: Option<String>,
    pub distinct_dates: i64,
    pub future: i64,
}

pub struct Integrity {
    pub orphans: Vec<(&'static str, i64)>,
    pub unused: Vec<(&'static str, i64)>,
}

pub struct Breakdown {
    pub label: String,
    pub detail: Option<String>,
    pub count: i64,
    pub total: f64,
    pub pct: f64,
}

pub struct Analytics {
    pub by_person: Vec<Breakdown>,
    pub by_category: Vec<Breakdown>,
    pub payment_usage: Vec<Breakdown>,
    pub monthly: Vec<Breakdown>,
    pub location_types: Vec<Breakdown>,
}

pub struct StgQualityReport {
    pub generated_at: String,
    pub completeness: Completeness,
    pub quality: QualityStats,
    pub amounts: AmountStats,
    pub dates: DateStats,
    pub integrity: Integrity,
    pub analytics: Analytics,
    pub total_amount: f64,
    pub grade: &'static str,
}

/// Overall grade from load completeness and average quality score.
pub fn grade(completeness_pct: f64, avg_quality: f64) -> &'static str {
    if completeness_pct >= 100.0 && avg_quality >= 95.0 {
        "A+"
    } else if completeness_pct >= 95.0 && avg_quality >= 85.0 {
        "A"
    } else if completeness_pct >= 90.0 && avg_quality >= 75.0 {
        "B"
    } else {
        "C"
    }
}

pub fn grade_label(grade: &str) -> &'static str {
    match grade {
        "A+" => "Excellent",
        "A" => "Very Good",
        "B" => "Good",
        _ => "Needs Improvement",
    }
}

fn scalar_i64(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |r| r.get::<_, Option<i64>>(0))?.unwrap_or(0))
}

fn completeness(conn: &Connection) -> Result<Completeness> {
    let tables = [
        ("Persons", "stg_dim_person"),
        ("Locations", "stg_dim_location"),
        ("Categories", "stg_dim_category"),
        ("Payment Methods", "stg_dim_payment_method"),
        ("Spending Facts", "stg_fact_spending"),
        ("Rejected Records", "stg_rejected_records"),
        ("Source Records", "src_daily_spending"),
    ];
    let mut counts = Vec::new();
    for (label, table) in tables {
        counts.push(TableCount {
            label,
            table,
            rows: count_rows(conn, table)?,
        });
    }
    let source_rows = count_rows(conn, "src_daily_spending")?;
    let fact_rows = count_rows(conn, "stg_fact_spending")?;
    let load_pct = if source_rows > 0 {
        fact_rows as f64 / source_rows as f64 * 100.0
    } else {
        0.0
    };

    let mut null_key_fields = Vec::new();
    for field in [
        "person_id",
        "location_id",
        "category_id",
        "payment_method_id",
        "spending_date",
        "amount_cleaned",
    ] {
        let n = scalar_i64(conn, &format!("SELECT count(*) FROM stg_fact_spending WHERE {field} IS NULL"))?;
        if n > 0 {
            null_key_fields.push((field, n));
        }
    }

    Ok(Completeness {
        counts,
        source_rows,
        fact_rows,
        load_pct,
        null_key_fields,
    })
}

fn quality_stats(conn: &Connection) -> Result<QualityStats> {
    let mut stmt = conn.prepare("SELECT data_quality_score FROM stg_fact_spending")?;
    let scores = stmt
        .query_map([], |r| r.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let mut stats = QualityStats::default();
    if scores.is_empty() {
        return Ok(stats);
    }
    stats.avg = scores.iter().sum::<i64>() as f64 / scores.len() as f64;
    stats.min = scores.iter().copied().min().unwrap_or(0);
    stats.max = scores.iter().copied().max().unwrap_or(0);
    for score in scores {
        match quality_band(score) {
            "high" if score == 100 => stats.perfect += 1,
            "high" => stats.high += 1,
            "good" => stats.good += 1,
            _ => stats.poor += 1,
        }
    }
    Ok(stats)
}

fn amount_stats(conn: &Connection) -> Result<AmountStats> {
    let mut stmt = conn.prepare("SELECT amount_cleaned FROM stg_fact_spending")?;
    let amounts = stmt
        .query_map([], |r| r.get::<_, f64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if amounts.is_empty() {
        return Ok(AmountStats::default());
    }
    Ok(AmountStats {
        min: amounts.iter().copied().fold(f64::INFINITY, f64::min),
        max: amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        avg: amounts.iter().sum::<f64>() / amounts.len() as f64,
        median: median(&amounts).unwrap_or(0.0),
        non_positive: amounts.iter().filter(|a| **a <= 0.0).count() as i64,
        extreme: amounts.iter().filter(|a| **a > 10_000.0).count() as i64,
    })
}

fn date_stats(conn: &Connection) -> Result<DateStats> {
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    let stats = conn.query_row(
        "SELECT MIN(spending_date), MAX(spending_date), COUNT(DISTINCT spending_date),
                COALESCE(SUM(spending_date > ?1), 0)
         FROM stg_fact_spending",
        [&today],
        |r| {
            Ok(DateStats {
                min: r.get(0)?,
                max: r.get(1)?,
                distinct_dates: r.get(2)?,
                future: r.get(3)?,
            })
        },
    )?;
    Ok(stats)
}

const DIMENSIONS: [(&str, &str, &str); 4] = [
    ("person_id", "stg_dim_person", "person_id"),
    ("location_id", "stg_dim_location", "location_id"),
    ("category_id", "stg_dim_category", "category_id"),
    ("payment_method_id", "stg_dim_payment_method", "payment_method_id"),
];

fn integrity(conn: &Connection) -> Result<Integrity> {
    let mut orphans = Vec::new();
    let mut unused = Vec::new();
    for (fk, dim, pk) in DIMENSIONS {
        orphans.push((
            dim,
            scalar_i64(
                conn,
                &format!(
                    "SELECT count(*) FROM stg_fact_spending f
                     WHERE NOT EXISTS (SELECT 1 FROM {dim} d WHERE d.{pk} = f.{fk})"
                ),
            )?,
        ));
        unused.push((
            dim,
            scalar_i64(
                conn,
                &format!(
                    "SELECT count(*) FROM {dim} d
                     WHERE NOT EXISTS (SELECT 1 FROM stg_fact_spending f WHERE f.{fk} = d.{pk})"
                ),
            )?,
        ));
    }
    Ok(Integrity { orphans, unused })
}

fn breakdown(conn: &Connection, sql: &str) -> Result<Vec<Breakdown>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Breakdown {
                label: r.get(0)?,
                detail: r.get(1)?,
                count: r.get(2)?,
                total: r.get(3)?,
                pct: r.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn analytics(conn: &Connection) -> Result<Analytics> {
    let by_person = breakdown(
        conn,
        "SELECT person_name, NULL, count(*), SUM(amount_cleaned),
                ROUND(100.0 * SUM(amount_cleaned) / (SELECT SUM(amount_cleaned) FROM stg_fact_spending), 2)
         FROM vw_stg_spending_complete GROUP BY person_name ORDER BY SUM(amount_cleaned) DESC",
    )?;
    let by_category = breakdown(
        conn,
        "SELECT category_name, category_group, count(*), SUM(amount_cleaned),
                ROUND(100.0 * SUM(amount_cleaned) / (SELECT SUM(amount_cleaned) FROM stg_fact_spending), 2)
         FROM vw_stg_spending_complete GROUP BY category_name, category_group
         ORDER BY SUM(amount_cleaned) DESC",
    )?;
    let payment_usage = breakdown(
        conn,
        "SELECT payment_method_name, payment_type, count(*), SUM(amount_cleaned),
                ROUND(100.0 * count(*) / (SELECT count(*) FROM stg_fact_spending), 2)
         FROM vw_stg_spending_complete GROUP BY payment_method_name, payment_type
         ORDER BY count(*) DESC, payment_method_name LIMIT 10",
    )?;
    let mut monthly = breakdown(
        conn,
        "SELECT substr(spending_date, 1, 7), NULL, count(*), SUM(amount_cleaned), AVG(amount_cleaned)
         FROM stg_fact_spending GROUP BY substr(spending_date, 1, 7)
         ORDER BY substr(spending_date, 1, 7) DESC LIMIT 12",
    )?;
    monthly.reverse();
    let location_types = breakdown(
        conn,
        "SELECT location_type, NULL, count(*), SUM(amount_cleaned),
                ROUND(100.0 * SUM(amount_cleaned) / (SELECT SUM(amount_cleaned) FROM stg_fact_spending), 2)
         FROM vw_stg_spending_complete GROUP BY location_type ORDER BY SUM(amount_cleaned) DESC",
    )?;
    Ok(Analytics {
        by_person,
        by_category,
        payment_usage,
        monthly,
        location_types,
    })
}

pub fn build_report(conn: &Connection) -> Result<StgQualityReport> {
    if count_rows(conn, "stg_fact_spending")? == 0 {
        return Err(EtlError::empty("stg_fact_spending", "Run `spendflow stg transform` first."));
    }
    let completeness = completeness(conn)?;
    let quality = quality_stats(conn)?;
    let total_amount: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_cleaned), 0) FROM stg_fact_spending",
        [],
        |r| r.get(0),
    )?;
    let grade = grade(completeness.load_pct, quality.avg);
    Ok(StgQualityReport {
        generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        amounts: amount_stats(conn)?,
        dates: date_stats(conn)?,
        integrity: integrity(conn)?,
        analytics: analytics(conn)?,
        completeness,
        quality,
        total_amount,
        grade,
    })
}

/// Rows dropped because a dimension key could not be resolved.
pub fn missing_key_rejections(conn: &Connection) -> Result<i64> {
    let n = conn.query_row(
        "SELECT count(*) FROM stg_rejected_records WHERE reason = ?1",
        [REASON_MISSING_KEY],
        |r| r.get(0),
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;
    use crate::settings::Settings;
    use crate::stg_transform::tests::insert_src;
    use crate::stg_transform::transform_and_load;

    #[test]
    fn test_grades() {
        assert_eq!(grade(100.0, 96.0), "A+");
        assert_eq!(grade(100.0, 90.0), "A");
        assert_eq!(grade(96.0, 96.0), "A");
        assert_eq!(grade(92.0, 80.0), "B");
        assert_eq!(grade(80.0, 99.0), "C");
        assert_eq!(grade_label("B"), "Good");
    }

    #[test]
    fn test_report_requires_staging() {
        let (_dir, conn) = test_db();
        assert!(matches!(build_report(&conn), Err(EtlError::EmptyStage { .. })));
    }

    #[test]
    fn test_report_sections() {
        let (_dir, conn) = test_db();
        insert_src(
            &conn,
            &[
                [Some("Alice"), Some("01-Apr-2022"), Some("Groceries"), Some("10"), Some("Market"), Some("a"), Some("Visa")],
                [Some("Alice"), Some("02-Apr-2022"), Some("Dining"), Some("30"), Some("Cafe"), None, Some("Visa")],
                [Some("Bob"), Some("03-May-2022"), Some("Groceries"), Some("20"), Some("Market"), Some("c"), Some("Cash")],
                [Some("Bob"), Some("bad"), Some("Groceries"), Some("20"), Some("Market"), Some("c"), Some("Cash")],
            ],
        );
        transform_and_load(&conn, &Settings::default()).unwrap();
        let report = build_report(&conn).unwrap();

        assert_eq!(report.completeness.source_rows, 4);
        assert_eq!(report.completeness.fact_rows, 3);
        assert_eq!(report.completeness.load_pct, 75.0);
        assert!(report.completeness.null_key_fields.is_empty());
        assert_eq!(report.quality.perfect, 2);
        assert_eq!(report.quality.high, 1);
        assert_eq!(report.amounts.median, 20.0);
        assert_eq!(report.amounts.max, 30.0);
        assert_eq!(report.dates.distinct_dates, 3);
        assert!(report.integrity.orphans.iter().all(|(_, n)| *n == 0));
        assert!(report.integrity.unused.iter().all(|(_, n)| *n == 0));
        assert_eq!(report.analytics.by_person[0].label, "Alice");
        assert_eq!(report.analytics.by_person[0].pct, 66.67);
        assert_eq!(report.analytics.monthly.len(), 2);
        assert_eq!(report.analytics.monthly[0].label, "2022-04");
        assert_eq!(report.total_amount, 60.0);
        assert_eq!(report.grade, "C");
        assert_eq!(missing_key_rejections(&conn).unwrap(), 0);
    }
}
