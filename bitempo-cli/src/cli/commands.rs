// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line argument definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bitempo")]
#[command(about = "Bitemporal series cache policy administration")]
#[command(version)]
pub struct Cli {
    /// Path to the policy database
    #[arg(long, global = true, default_value = "./bitempo-policies")]
    pub db: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Explicit log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<log::Level>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print version information
    Version,

    /// Create a new cache policy
    New(PolicySpec),

    /// Edit an existing cache policy
    Edit(PolicySpec),

    /// Delete a policy, unmapping every linked series
    Delete {
        /// Policy name
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List all policies
    List {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Show one policy in full
    Show {
        /// Policy name
        name: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Map a series to a policy
    Map {
        /// Policy name
        policy: String,

        /// Series name
        series: String,
    },

    /// Unmap a series from its policy
    Unmap {
        /// Series name
        series: String,
    },

    /// Show the mapping and idle state of a series
    Ready {
        /// Series name
        series: String,
    },

    /// List the series mapped to a policy
    Series {
        /// Policy name
        policy: String,
    },

    /// Re-validate every stored policy against the field grammars
    Validate,
}

/// The five policy fields, shared by `new` and `edit`.
#[derive(Args)]
pub struct PolicySpec {
    /// Policy name
    pub name: String,

    /// Moment expression anchoring the first materialized revision,
    /// e.g. '(date "2025-1-1")'
    #[arg(long)]
    pub initial_revdate: String,

    /// Moment expression for the left value-date bound,
    /// e.g. '(shifted now #:days -15)'
    #[arg(long)]
    pub look_before: String,

    /// Moment expression for the right value-date bound
    #[arg(long)]
    pub look_after: String,

    /// Cron rule selecting candidate revision dates, e.g. '0 * * * *'
    #[arg(long)]
    pub revdate_rule: String,

    /// Cron rule consumed by the external scheduler
    #[arg(long)]
    pub schedule_rule: String,
}

impl PolicySpec {
    pub fn into_policy(self) -> bitempo::CachePolicy {
        bitempo::CachePolicy::new(
            self.name,
            self.initial_revdate,
            self.look_before,
            self.look_after,
            self.revdate_rule,
            self.schedule_rule,
        )
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}
