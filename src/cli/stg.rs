use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::{money, pct, thousands};
use crate::settings::load_settings;
use crate::stg_report::{build_report, grade_label, missing_key_rejections, Breakdown};
use crate::stg_transform::{rejected_records, transform_and_load};

use super::open_db;

const REJECTED_PREVIEW: i64 = 10;

pub fn transform() -> Result<()> {
    let settings = load_settings();
    let conn = open_db()?;
    let s = transform_and_load(&conn, &settings)?;

    println!("Batch:            {}", s.batch_id);
    println!("Source rows:      {}", thousands(s.source_rows as i64));
    println!(
        "Amounts parsed:   {} ({} failed)",
        pct(s.amount_success_rate()),
        s.amount_failures
    );
    println!("Dates parsed:     {} ({} failed)", pct(s.date_success_rate()), s.date_failures);
    println!(
        "Dimensions:       {} persons, {} locations, {} categories, {} payment methods",
        s.persons, s.locations, s.categories, s.payment_methods
    );
    if let Some(q) = s.avg_quality {
        println!("Avg quality:      {q:.1}");
    }
    if let Some((from, to)) = s.date_range {
        println!("Date range:       {from} to {to}");
    }
    println!("{} {} rows into stg_fact_spending", "Loaded".green().bold(), thousands(s.loaded as i64));

    if s.rejected() > 0 {
        println!(
            "{} {} rows ({} unparseable, {} missing keys)",
            "Rejected".yellow().bold(),
            s.rejected(),
            s.rejected_parse,
            s.rejected_missing_key
        );
        let mut table = Table::new();
        table.set_header(vec!["Source ID", "Reason", "Amount", "Date"]);
        for r in rejected_records(&conn, REJECTED_PREVIEW)? {
            table.add_row(vec![
                Cell::new(r.src_id),
                Cell::new(r.reason),
                Cell::new(r.amount.unwrap_or_default()),
                Cell::new(r.spending_date.unwrap_or_default()),
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

fn breakdown_table(title: &str, rows: &[Breakdown]) {
    if rows.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec![title, "Detail", "Count", "Total", "Share"]);
    for b in rows {
        table.add_row(vec![
            Cell::new(&b.label),
            Cell::new(b.detail.as_deref().unwrap_or("")),
            Cell::new(b.count),
            Cell::new(money(b.total)),
            Cell::new(pct(b.pct)),
        ]);
    }
    println!("\n{table}");
}

pub fn report() -> Result<()> {
    let conn = open_db()?;
    let r = build_report(&conn)?;

    println!("{} ({})", "Staging data quality report".bold(), r.generated_at);

    let mut counts = Table::new();
    counts.set_header(vec!["Entity", "Table", "Rows"]);
    for c in &r.completeness.counts {
        counts.add_row(vec![Cell::new(c.label), Cell::new(c.table), Cell::new(thousands(c.rows))]);
    }
    println!("\n{counts}");
    println!(
        "Loaded {} of {} source rows ({})",
        thousands(r.completeness.fact_rows),
        thousands(r.completeness.source_rows),
        pct(r.completeness.load_pct)
    );
    let missing_keys = missing_key_rejections(&conn)?;
    if missing_keys > 0 {
        println!("{} {missing_keys} rows rejected for missing keys", "Warning:".yellow());
    }
    for (field, n) in &r.completeness.null_key_fields {
        if *n > 0 {
            println!("{} {n} facts with null {field}", "Warning:".yellow());
        }
    }

    let q = &r.quality;
    println!(
        "\nQuality score: avg {:.1}, min {}, max {} | 100: {}  90-99: {}  70-89: {}  <70: {}",
        q.avg, q.min, q.max, q.perfect, q.high, q.good, q.poor
    );
    let a = &r.amounts;
    println!(
        "Amounts: total {}  min {}  max {}  avg {}  median {} | non-positive {}  extreme {}",
        money(r.total_amount),
        money(a.min),
        money(a.max),
        money(a.avg),
        money(a.median),
        a.non_positive,
        a.extreme
    );
    let d = &r.dates;
    println!(
        "Dates: {} to {} ({} distinct, {} in the future)",
        d.min.as_deref().unwrap_or("-"),
        d.max.as_deref().unwrap_or("-"),
        d.distinct_dates,
        d.future
    );

    let broken: Vec<_> = r
        .integrity
        .orphans
        .iter()
        .filter(|(_, n)| *n > 0)
        .collect();
    if broken.is_empty() {
        println!("Referential integrity: {}", "OK".green());
    } else {
        for (fk, n) in broken {
            println!("{} {n} facts with orphaned {fk}", "Integrity:".red().bold());
        }
    }
    for (dim, n) in &r.integrity.unused {
        if *n > 0 {
            println!("Unused {dim}: {n}");
        }
    }

    breakdown_table("Person", &r.analytics.by_person);
    breakdown_table("Category", &r.analytics.by_category);
    breakdown_table("Payment method", &r.analytics.payment_usage);
    breakdown_table("Location type", &r.analytics.location_types);
    breakdown_table("Month", &r.analytics.monthly);

    let grade = match r.grade {
        "A+" | "A" => r.grade.green().bold(),
        "B" => r.grade.yellow().bold(),
        _ => r.grade.red().bold(),
    };
    println!("\nOverall grade: {grade} ({})", grade_label(r.grade));
    Ok(())
}
