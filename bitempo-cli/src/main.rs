// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Bitempo CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments first to get log level
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "Bitempo".bold().green(), bitempo::VERSION);
            println!("Bitemporal series cache engine");
            Ok(())
        }

        Commands::New(spec) => cli::handle_new(&cli.db, spec),

        Commands::Edit(spec) => cli::handle_edit(&cli.db, spec),

        Commands::Delete { name, yes } => cli::handle_delete(&cli.db, &name, yes),

        Commands::List { format } => cli::handle_list(&cli.db, format),

        Commands::Show { name, format } => cli::handle_show(&cli.db, &name, format),

        Commands::Map { policy, series } => cli::handle_map(&cli.db, &policy, &series),

        Commands::Unmap { series } => cli::handle_unmap(&cli.db, &series),

        Commands::Ready { series } => cli::handle_ready(&cli.db, &series),

        Commands::Series { policy } => cli::handle_series(&cli.db, &policy),

        Commands::Validate => cli::handle_validate(&cli.db),
    }
}
