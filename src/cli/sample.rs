use std::path::Path;

use colored::Colorize;

use crate::error::Result;
use crate::sample::{generate, write_csv};

pub fn run(output: &str, rows: usize, seed: u64) -> Result<()> {
    let path = Path::new(output);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write_csv(path, &generate(rows, seed))?;
    println!("{} {rows} rows to {}", "Wrote".green().bold(), path.display());
    Ok(())
}
