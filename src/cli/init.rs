use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::db::{count_rows, get_connection, init_db, table_columns, TABLES};
use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path, DB_FILE};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
        save_settings(&settings)?;
    }

    let data_dir = std::path::PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join(DB_FILE);
    let conn = get_connection(&db_path)?;
    init_db(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["Table", "Columns", "Required", "Rows"]);
    for name in TABLES {
        let columns = table_columns(&conn, name)?;
        table.add_row(vec![
            Cell::new(name),
            Cell::new(columns.len()),
            Cell::new(columns.iter().filter(|c| c.not_null).count()),
            Cell::new(count_rows(&conn, name)?),
        ]);
    }
    println!("{table}");
    println!("{} {}", "Database ready:".green().bold(), db_path.display());
    Ok(())
}
