use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::{format_bytes, thousands};
use crate::settings::db_path;
use crate::status::build_status;

use super::open_db;

pub fn run() -> Result<()> {
    let path = db_path();
    println!("Database:   {}", path.display());
    if !path.exists() {
        println!();
        println!("Database not found. Run `spendflow init` to set up.");
        return Ok(());
    }
    println!("DB size:    {}", format_bytes(std::fs::metadata(&path)?.len()));

    let conn = open_db()?;
    let report = build_status(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["Stage", "Table", "Rows"]);
    for layer in &report.layers {
        table.add_row(vec![
            Cell::new(layer.stage),
            Cell::new(layer.table),
            Cell::new(thousands(layer.rows)),
        ]);
    }
    println!("\n{table}");

    match report.latest_version {
        Some(v) => println!("Snapshot versions: {} (latest v{v})", report.snapshot_versions),
        None => println!("Snapshot versions: none"),
    }

    if !report.batches.is_empty() {
        let mut batches = Table::new();
        batches.set_header(vec!["Batch", "File", "Rows", "Loaded"]);
        for b in &report.batches {
            batches.add_row(vec![
                Cell::new(&b.batch_id),
                Cell::new(b.source_file.as_deref().unwrap_or("")),
                Cell::new(thousands(b.rows)),
                Cell::new(&b.loaded_at),
            ]);
        }
        println!("\nSource batches\n{batches}");
    }

    if report.validations.is_empty() {
        println!("\nNo validation runs yet.");
        return Ok(());
    }
    let mut checks = Table::new();
    checks.set_header(vec!["Stage", "Run", "Checks", "Passed", "Failed", "Errors", "Warnings"]);
    for v in &report.validations {
        let errors = if v.errors > 0 {
            v.errors.to_string().red().bold()
        } else {
            v.errors.to_string().green()
        };
        checks.add_row(vec![
            Cell::new(&v.stage),
            Cell::new(&v.validation_run_id),
            Cell::new(v.total_checks),
            Cell::new(v.passed),
            Cell::new(v.failed),
            Cell::new(errors),
            Cell::new(v.warnings),
        ]);
    }
    println!("\nLatest validations\n{checks}");
    Ok(())
}
