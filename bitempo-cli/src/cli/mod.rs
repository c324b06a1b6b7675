// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for bitempo
//!
//! Provides policy administration over a sled-backed policy store: creation
//! and validation, series mapping, readiness inspection.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands, OutputFormat, PolicySpec};
pub use handlers::{
    handle_delete, handle_edit, handle_list, handle_map, handle_new, handle_ready,
    handle_series, handle_show, handle_unmap, handle_validate,
};
