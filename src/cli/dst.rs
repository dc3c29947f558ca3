use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::dst_validate::validate_marts;
use crate::error::{EtlError, Result};
use crate::fmt::money;
use crate::marts::{
    populate_all, populate_category_trends, populate_monthly_summary, populate_payment_summary,
    populate_person_analytics, Mart, MartResult,
};
use crate::settings::load_settings;

use super::{open_db, report_validation};

pub fn populate_marts(mart: &str) -> Result<()> {
    let conn = open_db()?;
    let results: Vec<MartResult> = if mart == "all" {
        populate_all(&conn)?
    } else {
        let m = Mart::get_by_key(mart).ok_or_else(|| {
            EtlError::Other(format!(
                "Unknown mart '{mart}'. Choose one of: monthly, category, person, payment, all"
            ))
        })?;
        vec![match m {
            Mart::Monthly => populate_monthly_summary(&conn)?,
            Mart::Category => populate_category_trends(&conn)?,
            Mart::Person => populate_person_analytics(&conn)?,
            Mart::Payment => populate_payment_summary(&conn)?,
        }]
    };

    let mut table = Table::new();
    table.set_header(vec!["Mart", "Table", "Snapshot", "Deleted", "Inserted"]);
    for r in &results {
        table.add_row(vec![
            Cell::new(r.mart.key()),
            Cell::new(r.mart.table()),
            Cell::new(r.snapshot_version),
            Cell::new(r.deleted),
            Cell::new(r.inserted),
        ]);
    }
    println!("{table}");
    println!("{} {} mart(s)", "Populated".green().bold(), results.len());
    Ok(())
}

pub fn validate() -> Result<()> {
    let conn = open_db()?;
    let v = validate_marts(&conn, load_settings().quality_tolerance)?;
    println!(
        "Snapshot v{}: {} across {} transactions\n",
        v.snapshot_version,
        money(v.snapshot_total),
        v.snapshot_count
    );
    let mut table = Table::new();
    table.set_header(vec!["Mart", "Total", "Transactions", "Records"]);
    for m in &v.marts {
        table.add_row(vec![
            Cell::new(m.mart.key()),
            Cell::new(money(m.total)),
            Cell::new(m.transactions),
            Cell::new(m.records),
        ]);
    }
    println!("{table}\n");
    report_validation(&v.run)
}
