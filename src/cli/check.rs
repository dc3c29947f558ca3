use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::checker::check_source;
use crate::error::Result;
use crate::fmt::{format_bytes, money, pct, thousands};
use crate::settings::load_settings;

pub fn run(file: &str, chunk_size: Option<usize>) -> Result<()> {
    let chunk_size = chunk_size.unwrap_or_else(|| load_settings().chunk_size);
    let profile = check_source(Path::new(file), chunk_size)?;

    println!("File:       {} ({})", profile.file_name, profile.format);
    println!("Size:       {}", format_bytes(profile.file_size));
    println!("Rows:       {} in {} chunk(s)", thousands(profile.total_rows as i64), profile.chunks);
    println!("Columns:    {}", profile.columns.join(", "));
    if !profile.missing_columns.is_empty() {
        println!(
            "{} {}",
            "Missing columns:".yellow().bold(),
            profile.missing_columns.join(", ")
        );
    }

    let mut nulls = Table::new();
    nulls.set_header(vec!["Column", "Nulls", "Null %"]);
    for c in &profile.column_nulls {
        nulls.add_row(vec![Cell::new(c.name), Cell::new(c.nulls), Cell::new(pct(c.null_pct))]);
    }
    println!("\n{nulls}");

    println!(
        "\nAmounts parsed: {}/{} ({})",
        profile.amounts.parsed,
        profile.amounts.attempted,
        pct(profile.amounts.success_rate())
    );
    if let Some(stats) = &profile.amount_stats {
        println!(
            "  min {}  max {}  mean {}  negative {}",
            money(stats.min),
            money(stats.max),
            money(stats.mean),
            profile.negative_amounts
        );
    }
    println!(
        "Dates parsed:   {}/{} ({})",
        profile.dates.parsed,
        profile.dates.attempted,
        pct(profile.dates.success_rate())
    );
    for (format, n) in &profile.date_formats {
        println!("  {format:<12} {n}");
    }
    if profile.duplicate_rows > 0 {
        println!("{} {}", "Duplicate rows:".yellow(), profile.duplicate_rows);
    }

    if !profile.preview.is_empty() {
        let mut preview = Table::new();
        preview.set_header(vec!["Person", "Date", "Category", "Amount", "Payment"]);
        for row in &profile.preview {
            preview.add_row(vec![
                Cell::new(row.person_name.as_deref().unwrap_or("")),
                Cell::new(row.spending_date.as_deref().unwrap_or("")),
                Cell::new(row.category.as_deref().unwrap_or("")),
                Cell::new(row.amount.as_deref().unwrap_or("")),
                Cell::new(row.payment_method.as_deref().unwrap_or("")),
            ]);
        }
        println!("\nFirst rows\n{preview}");
    }
    Ok(())
}
