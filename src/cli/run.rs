use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::pipeline::run_all;
use crate::settings::load_settings;

use super::open_db;

pub fn run(file: Option<&str>) -> Result<()> {
    let settings = load_settings();
    let conn = open_db()?;
    let stages = run_all(&conn, &settings, file.map(Path::new))?;

    let mut table = Table::new();
    table.set_header(vec!["Stage", "Result"]);
    for s in &stages {
        table.add_row(vec![Cell::new(s.stage), Cell::new(&s.summary)]);
    }
    println!("{table}");
    println!("{}", "Pipeline complete.".green().bold());
    Ok(())
}
