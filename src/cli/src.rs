use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::settings::load_settings;
use crate::sources::resolve_format;
use crate::src_load::{latest_batch, load_source, purge_batch};
use crate::src_validate::validate_source;

use super::{open_db, report_validation};

pub fn load(file: &str, format: Option<&str>, chunk_size: Option<usize>, force: bool) -> Result<()> {
    let path = Path::new(file);
    let format = resolve_format(path, format)?;
    let chunk_size = chunk_size.unwrap_or_else(|| load_settings().chunk_size);
    let conn = open_db()?;

    let result = load_source(&conn, path, format, chunk_size, force)?;
    println!(
        "{} {} rows from {} in {} chunk(s)",
        "Loaded".green().bold(),
        result.rows_loaded,
        result.source_file,
        result.chunks
    );
    println!("Batch:  {}", result.batch_id);
    println!("Run:    {}", result.load_run_id);

    if !result.sample.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["ID", "Person", "Date", "Category", "Amount", "Location"]);
        for (id, row) in &result.sample {
            table.add_row(vec![
                Cell::new(id),
                Cell::new(row.person_name.as_deref().unwrap_or("")),
                Cell::new(row.spending_date.as_deref().unwrap_or("")),
                Cell::new(row.category.as_deref().unwrap_or("")),
                Cell::new(row.amount.as_deref().unwrap_or("")),
                Cell::new(row.location.as_deref().unwrap_or("")),
            ]);
        }
        println!("\n{table}");
    }
    Ok(())
}

pub fn validate() -> Result<()> {
    let conn = open_db()?;
    if let Some(batch) = latest_batch(&conn)? {
        println!("Latest batch: {batch}");
    }
    let run = validate_source(&conn, &load_settings())?;
    report_validation(&run)
}

pub fn purge(batch_id: &str) -> Result<()> {
    let conn = open_db()?;
    let n = purge_batch(&conn, batch_id)?;
    if n == 0 {
        println!("No rows found for batch {batch_id}.");
    } else {
        println!("{} {n} rows of batch {batch_id}", "Purged".yellow().bold());
    }
    Ok(())
}
