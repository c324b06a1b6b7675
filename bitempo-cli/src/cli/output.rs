// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Policy formatting for CLI output

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};

use bitempo::CachePolicy;

use super::commands::OutputFormat;

/// Formatter for the policy listing commands
pub struct PolicyFormatter;

impl PolicyFormatter {
    pub fn format_list(
        policies: &[CachePolicy],
        format: OutputFormat,
    ) -> Result<String, Box<dyn std::error::Error>> {
        match format {
            OutputFormat::Table => Ok(Self::list_table(policies)),
            OutputFormat::Json => Ok(format!(
                "{}\n",
                serde_json::to_string_pretty(policies)?
            )),
        }
    }

    pub fn format_one(
        policy: &CachePolicy,
        format: OutputFormat,
    ) -> Result<String, Box<dyn std::error::Error>> {
        match format {
            OutputFormat::Table => Ok(Self::one_table(policy)),
            OutputFormat::Json => Ok(format!(
                "{}\n",
                serde_json::to_string_pretty(policy)?
            )),
        }
    }

    fn list_table(policies: &[CachePolicy]) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("name").fg(Color::Green),
            Cell::new("revdate rule").fg(Color::Green),
            Cell::new("schedule rule").fg(Color::Green),
            Cell::new("initial revdate").fg(Color::Green),
        ]);
        for policy in policies {
            table.add_row(vec![
                policy.name.clone(),
                policy.revdate_rule.clone(),
                policy.schedule_rule.clone(),
                policy.initial_revdate.clone(),
            ]);
        }
        format!("{table}\n")
    }

    fn one_table(policy: &CachePolicy) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("field").fg(Color::Green),
            Cell::new("value").fg(Color::Green),
        ]);
        table.add_row(vec!["name", &policy.name]);
        table.add_row(vec!["initial_revdate", &policy.initial_revdate]);
        table.add_row(vec!["look_before", &policy.look_before]);
        table.add_row(vec!["look_after", &policy.look_after]);
        table.add_row(vec!["revdate_rule", &policy.revdate_rule]);
        table.add_row(vec!["schedule_rule", &policy.schedule_rule]);
        format!("{table}\n")
    }

    pub fn format_series(policy: &str, rows: &[(String, bool)]) -> String {
        let mut out = format!("{}\n", format!("Series mapped to '{policy}'").bold().green());
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("series").fg(Color::Green),
            Cell::new("state").fg(Color::Green),
        ]);
        for (name, idle) in rows {
            let state = if *idle { "idle" } else { "refreshing" };
            table.add_row(vec![name.as_str(), state]);
        }
        out.push_str(&format!("{table}\n"));
        out
    }
}
