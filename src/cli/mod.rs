pub mod check;
pub mod curated;
pub mod dis;
pub mod dst;
pub mod init;
pub mod run;
pub mod sample;
pub mod src;
pub mod status;
pub mod stg;
pub mod validations;

use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::db::get_connection;
use crate::error::{EtlError, Result};
use crate::models::{Severity, ValidationRun};
use crate::settings::db_path;

/// Open the configured database, refusing to create one implicitly.
pub(crate) fn open_db() -> Result<Connection> {
    let path = db_path();
    if !path.exists() {
        return Err(EtlError::Other(format!(
            "Database not found at {}. Run `spendflow init` first.",
            path.display()
        )));
    }
    get_connection(&path)
}

pub(crate) fn severity_cell(severity: Severity) -> Cell {
    match severity {
        Severity::Error => Cell::new(severity.as_str().red()),
        Severity::Warning => Cell::new(severity.as_str().yellow()),
        Severity::Info => Cell::new(severity.as_str().blue()),
    }
}

/// Print every check of a run and return `ValidationFailed` on blocking failures.
pub(crate) fn report_validation(run: &ValidationRun) -> Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["Check", "Type", "Status", "Checked", "Failed", "Fail %", "Detail"]);
    for c in &run.checks {
        let status = if c.passed { c.status().green() } else { c.status().red().bold() };
        table.add_row(vec![
            Cell::new(&c.check_name),
            severity_cell(c.check_type),
            Cell::new(status),
            Cell::new(c.records_checked),
            Cell::new(c.records_failed),
            Cell::new(format!("{:.2}", c.failure_pct())),
            Cell::new(textwrap::fill(c.message.as_deref().unwrap_or(""), 48)),
        ]);
    }
    println!("{} validation ({})\n{table}", run.stage, run.run_id);

    let failed = run.failed();
    if !failed.is_empty() {
        println!("\nFailed checks (most severe first):");
        for c in failed {
            let samples = if c.sample_ids.is_empty() {
                String::new()
            } else {
                format!(" sample ids: {:?}", c.sample_ids)
            };
            println!("  [{}] {} {:.2}%{samples}", c.check_type.as_str(), c.check_name, c.failure_pct());
        }
    }

    match (run.errors(), run.warnings()) {
        (0, 0) => println!("\n{}", "All checks passed.".green().bold()),
        (0, w) => println!("\n{}", format!("Passed with {w} warning(s). Proceed with caution.").yellow()),
        (e, _) => println!("\n{}", format!("{e} blocking error(s).").red().bold()),
    }
    run.ensure_passed()
}

#[derive(Parser)]
#[command(name = "spendflow", version, about = "Layered ETL pipeline for personal spending records.")]
pub struct Cli {
    /// Log progress to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and create the database.
    Init {
        /// Path for spendflow data (default: ~/Documents/spendflow)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Show row counts per layer and the latest validation results.
    Status,
    /// Write a messy sample spending file.
    Sample {
        /// Output CSV path
        #[arg(long)]
        output: String,
        /// Number of rows
        #[arg(long, default_value_t = 1000)]
        rows: usize,
        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Profile a source file without loading it.
    Check {
        /// CSV or XLSX file
        file: String,
        /// Rows per chunk (default: settings chunk_size)
        #[arg(long = "chunk-size")]
        chunk_size: Option<usize>,
    },
    /// Raw source layer.
    Src {
        #[command(subcommand)]
        command: SrcCommands,
    },
    /// Normalized staging layer.
    Stg {
        #[command(subcommand)]
        command: StgCommands,
    },
    /// Versioned snapshots.
    Curated {
        #[command(subcommand)]
        command: CuratedCommands,
    },
    /// Aggregated marts.
    Dst {
        #[command(subcommand)]
        command: DstCommands,
    },
    /// Analytical views.
    Dis {
        #[command(subcommand)]
        command: DisCommands,
    },
    /// Run every stage in order.
    Run {
        /// Load this file first
        #[arg(long)]
        file: Option<String>,
    },
    /// List logged validation results.
    Validations {
        /// Only this stage (SRC, CURATED, DST)
        #[arg(long)]
        stage: Option<String>,
        /// Write the results as JSON
        #[arg(long)]
        export: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SrcCommands {
    /// Load a CSV/XLSX file as a new batch.
    Load {
        /// Path to the source file
        file: String,
        /// Format key (csv, xlsx); detected from the extension by default
        #[arg(long)]
        format: Option<String>,
        /// Rows per chunk (default: settings chunk_size)
        #[arg(long = "chunk-size")]
        chunk_size: Option<usize>,
        /// Load even if this file was loaded before
        #[arg(long)]
        force: bool,
    },
    /// Run the source validation checks.
    Validate,
    /// Delete every row of one load batch.
    Purge {
        /// Batch id, e.g. BATCH_20240101_120000_1a2b3c4d
        batch_id: String,
    },
}

#[derive(Subcommand)]
pub enum StgCommands {
    /// Rebuild staging from the source layer.
    Transform,
    /// Print the staging data quality report.
    Report,
}

#[derive(Subcommand)]
pub enum CuratedCommands {
    /// Snapshot staging as a new version.
    Snapshot,
    /// Validate snapshot versions against staging.
    Validate,
    /// List snapshot versions.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum DstCommands {
    /// Rebuild marts for the latest snapshot.
    Populate {
        /// monthly, category, person, payment or all
        #[arg(default_value = "all")]
        mart: String,
    },
    /// Reconcile marts against the latest snapshot.
    Validate,
}

#[derive(Subcommand)]
pub enum DisCommands {
    /// Recreate the analytical views.
    Deploy,
    /// Print one view.
    Show {
        /// scorecard, recommendations, alerts, categories or plans
        #[arg(default_value = "scorecard")]
        view: String,
    },
}
