mod audit;
mod checker;
mod classify;
mod cli;
mod curated;
mod db;
mod dst_validate;
mod error;
mod fmt;
mod insights;
mod logging;
mod marts;
mod models;
mod parsers;
mod pipeline;
mod quality;
mod sample;
mod settings;
mod sources;
mod src_load;
mod src_validate;
mod status;
mod stg_report;
mod stg_transform;
mod trends;

use clap::Parser;

use cli::{Cli, Commands, CuratedCommands, DisCommands, DstCommands, SrcCommands, StgCommands};

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Status => cli::status::run(),
        Commands::Sample { output, rows, seed } => cli::sample::run(&output, rows, seed),
        Commands::Check { file, chunk_size } => cli::check::run(&file, chunk_size),
        Commands::Src { command } => match command {
            SrcCommands::Load {
                file,
                format,
                chunk_size,
                force,
            } => cli::src::load(&file, format.as_deref(), chunk_size, force),
            SrcCommands::Validate => cli::src::validate(),
            SrcCommands::Purge { batch_id } => cli::src::purge(&batch_id),
        },
        Commands::Stg { command } => match command {
            StgCommands::Transform => cli::stg::transform(),
            StgCommands::Report => cli::stg::report(),
        },
        Commands::Curated { command } => match command {
            CuratedCommands::Snapshot => cli::curated::snapshot(),
            CuratedCommands::Validate => cli::curated::validate(),
            CuratedCommands::History { limit } => cli::curated::history(limit),
        },
        Commands::Dst { command } => match command {
            DstCommands::Populate { mart } => cli::dst::populate_marts(&mart),
            DstCommands::Validate => cli::dst::validate(),
        },
        Commands::Dis { command } => match command {
            DisCommands::Deploy => cli::dis::deploy(),
            DisCommands::Show { view } => cli::dis::show(&view),
        },
        Commands::Run { file } => cli::run::run(file.as_deref()),
        Commands::Validations { stage, export } => cli::validations::run(stage.as_deref(), export.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
