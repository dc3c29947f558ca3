use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::curated::{create_snapshot, validate_snapshots, version_history, VersionInfo};
use crate::error::Result;
use crate::fmt::{money, opt_pct, thousands};

use super::{open_db, report_validation};

pub fn snapshot() -> Result<()> {
    let conn = open_db()?;
    let s = create_snapshot(&conn)?;
    println!(
        "{} version {} with {} records",
        "Snapshot created:".green().bold(),
        s.version,
        thousands(s.records as i64)
    );
    println!("Batch:       {}", s.batch_id);
    println!("Date:        {}", s.snapshot_date);
    println!("Versions:    {}", s.total_versions);
    println!("Historical:  {} rows in older versions", thousands(s.historical_records));
    Ok(())
}

fn history_table(versions: &[VersionInfo]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Version", "Date", "Latest", "Records", "Range", "Total", "Growth"]);
    for v in versions {
        let latest = if v.is_latest { "yes".green() } else { "".normal() };
        let range = match (&v.earliest, &v.latest) {
            (Some(a), Some(b)) => format!("{a} to {b}"),
            _ => String::new(),
        };
        let growth = match v.growth {
            Some(g) => format!("{g:+} ({})", opt_pct(v.growth_pct)),
            None => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(v.version),
            Cell::new(&v.snapshot_date),
            Cell::new(latest),
            Cell::new(thousands(v.records)),
            Cell::new(range),
            Cell::new(money(v.total_amount)),
            Cell::new(growth),
        ]);
    }
    table
}

pub fn history(limit: usize) -> Result<()> {
    let conn = open_db()?;
    let versions = version_history(&conn, limit)?;
    if versions.is_empty() {
        println!("No snapshots yet. Run `spendflow curated snapshot`.");
        return Ok(());
    }
    println!("{}", history_table(&versions));
    Ok(())
}

pub fn validate() -> Result<()> {
    let conn = open_db()?;
    let v = validate_snapshots(&conn)?;
    println!("{}\n", history_table(&v.history));
    report_validation(&v.run)
}
