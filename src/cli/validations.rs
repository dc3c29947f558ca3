use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::audit::entries;
use crate::error::Result;

use super::open_db;

pub fn run(stage: Option<&str>, export: Option<&str>) -> Result<()> {
    let conn = open_db()?;
    let stage = stage.map(|s| s.to_uppercase());
    let logged = entries(&conn, stage.as_deref())?;

    if let Some(path) = export {
        let json = serde_json::to_string_pretty(&logged)?;
        std::fs::write(path, format!("{json}\n"))?;
        println!("{} {} results to {path}", "Exported".green().bold(), logged.len());
        return Ok(());
    }

    if logged.is_empty() {
        println!("No validation results logged.");
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["When", "Stage", "Table", "Check", "Type", "Status", "Failed", "Fail %"]);
    for e in &logged {
        let status = if e.check_status == "PASSED" {
            e.check_status.green()
        } else {
            e.check_status.red().bold()
        };
        table.add_row(vec![
            Cell::new(&e.validation_timestamp),
            Cell::new(&e.stage),
            Cell::new(&e.table_name),
            Cell::new(&e.check_name),
            Cell::new(&e.check_type),
            Cell::new(status),
            Cell::new(format!("{}/{}", e.records_failed, e.records_checked)),
            Cell::new(format!("{:.2}", e.failure_percentage)),
        ]);
    }
    println!("{table}");
    Ok(())
}
