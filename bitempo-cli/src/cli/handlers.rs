// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers

use colored::Colorize;
use std::path::Path;

use bitempo::{PolicyStore, SledPolicyStore};

use super::commands::{OutputFormat, PolicySpec};
use super::output::PolicyFormatter;

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn open_store(db: &Path) -> Result<SledPolicyStore, Box<dyn std::error::Error>> {
    SledPolicyStore::open(db).map_err(|e| format!("Failed to open policy store: {e}").into())
}

/// Handle the new command
pub fn handle_new(db: &Path, spec: PolicySpec) -> CliResult {
    let policy = spec.into_policy();
    let bad = policy.validate();
    if !bad.is_empty() {
        println!("{}", "Invalid policy fields:".red().bold());
        for (field, value) in &bad {
            println!("  {}: {:?}", field.yellow(), value);
        }
        return Err("Policy validation failed".into());
    }
    let store = open_store(db)?;
    store.create_policy(&policy)?;
    println!("{}", format!("Policy '{}' created", policy.name).green());
    Ok(())
}

/// Handle the edit command
pub fn handle_edit(db: &Path, spec: PolicySpec) -> CliResult {
    let policy = spec.into_policy();
    let bad = policy.validate();
    if !bad.is_empty() {
        println!("{}", "Invalid policy fields:".red().bold());
        for (field, value) in &bad {
            println!("  {}: {:?}", field.yellow(), value);
        }
        return Err("Policy validation failed".into());
    }
    let store = open_store(db)?;
    store.edit_policy(&policy)?;
    println!("{}", format!("Policy '{}' updated", policy.name).green());
    println!("Existing caches are kept; the next batch refresh applies the new rules.");
    Ok(())
}

/// Handle the delete command
pub fn handle_delete(db: &Path, name: &str, yes: bool) -> CliResult {
    let store = open_store(db)?;
    let linked = store.series_for_policy(name)?;
    if !yes {
        println!(
            "Deleting policy '{}' will unmap {} series. Continue? [y/N]",
            name,
            linked.len()
        );
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("{}", "Aborted".yellow());
            return Ok(());
        }
    }
    let unlinked = store.delete_policy(name)?;
    println!("{}", format!("Policy '{name}' deleted").green());
    for series in unlinked {
        println!("  unmapped {series}");
    }
    println!(
        "{}",
        "Note: materialized caches are not removed here; invalidate the \
unmapped series in the process owning the series store"
            .yellow()
    );
    Ok(())
}

/// Handle the list command
pub fn handle_list(db: &Path, format: OutputFormat) -> CliResult {
    let store = open_store(db)?;
    let policies = store.policies()?;
    if policies.is_empty() {
        println!("{}", "No policies defined".yellow());
        return Ok(());
    }
    print!("{}", PolicyFormatter::format_list(&policies, format)?);
    Ok(())
}

/// Handle the show command
pub fn handle_show(db: &Path, name: &str, format: OutputFormat) -> CliResult {
    let store = open_store(db)?;
    match store.policy(name)? {
        Some(policy) => {
            print!("{}", PolicyFormatter::format_one(&policy, format)?);
            Ok(())
        }
        None => Err(format!("No such policy: {name}").into()),
    }
}

/// Handle the map command
pub fn handle_map(db: &Path, policy: &str, series: &str) -> CliResult {
    let store = open_store(db)?;
    store.link_series(policy, series)?;
    println!(
        "{}",
        format!("Series '{series}' mapped to policy '{policy}'").green()
    );
    Ok(())
}

/// Handle the unmap command
pub fn handle_unmap(db: &Path, series: &str) -> CliResult {
    let store = open_store(db)?;
    if store.unlink_series(series)? {
        println!("{}", format!("Series '{series}' unmapped").green());
    } else {
        println!("{}", format!("Series '{series}' was not mapped").yellow());
    }
    Ok(())
}

/// Handle the ready command
pub fn handle_ready(db: &Path, series: &str) -> CliResult {
    let store = open_store(db)?;
    match store.link(series)? {
        Some(link) => {
            let state = if link.ready {
                "idle".green()
            } else {
                "refreshing".yellow()
            };
            println!("{} -> policy '{}' ({state})", link.series, link.policy);
            Ok(())
        }
        None => {
            println!("{}", format!("Series '{series}' is not mapped").yellow());
            Ok(())
        }
    }
}

/// Handle the series command
pub fn handle_series(db: &Path, policy: &str) -> CliResult {
    let store = open_store(db)?;
    if store.policy(policy)?.is_none() {
        return Err(format!("No such policy: {policy}").into());
    }
    let mut names = store.series_for_policy(policy)?;
    names.sort();
    if names.is_empty() {
        println!("{}", "No series mapped".yellow());
        return Ok(());
    }
    let mut rows = Vec::with_capacity(names.len());
    for name in names {
        let idle = store
            .link(&name)?
            .map(|l| l.ready)
            .unwrap_or(false);
        rows.push((name, idle));
    }
    print!("{}", PolicyFormatter::format_series(policy, &rows));
    Ok(())
}

/// Handle the validate command
pub fn handle_validate(db: &Path) -> CliResult {
    let store = open_store(db)?;
    let mut broken = 0;
    for policy in store.policies()? {
        let bad = policy.validate();
        if bad.is_empty() {
            println!("{} {}", "ok".green(), policy.name);
        } else {
            broken += 1;
            println!("{} {}", "BAD".red().bold(), policy.name);
            for (field, value) in &bad {
                println!("  {}: {:?}", field.yellow(), value);
            }
        }
    }
    if broken > 0 {
        return Err(format!("{broken} invalid policies").into());
    }
    Ok(())
}
