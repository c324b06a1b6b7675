// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Bitemporal series storage
//!
//! [`SeriesStore`] owns two revision namespaces backed by the same in-memory
//! structure: the primary namespace (ground revisions and formula
//! definitions) and the cache namespace (materialized formula revisions).
//! Reads go through the [`SeriesReader`] seam so a cache-aware decorator can
//! be layered over the base store without the base knowing about policies.

mod revlog;
mod store;

pub use revlog::RevisionLog;
pub use store::{SeriesKind, SeriesStore};

use thiserror::Error;

use crate::series::Stamp;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    #[error("Series not found: {0}")]
    SeriesNotFound(String),

    #[error("Series already exists: {0}")]
    SeriesExists(String),

    #[error("Formula error: {0}")]
    Formula(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<crate::formula::FormulaError> for StorageError {
    fn from(err: crate::formula::FormulaError) -> Self {
        StorageError::Formula(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Arguments of a series read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GetArgs {
    /// Read as of this insertion date; `None` means the latest revision.
    pub revision_date: Option<Stamp>,
    pub from_value_date: Option<Stamp>,
    pub to_value_date: Option<Stamp>,
    /// Bypass any materialized cache.
    pub nocache: bool,
    /// Request live augmentation over the cached curve.
    pub live: bool,
}

impl GetArgs {
    pub fn at_revision(revision_date: Stamp) -> Self {
        Self {
            revision_date: Some(revision_date),
            ..Self::default()
        }
    }

    pub fn windowed(
        revision_date: Option<Stamp>,
        from_value_date: Option<Stamp>,
        to_value_date: Option<Stamp>,
    ) -> Self {
        Self {
            revision_date,
            from_value_date,
            to_value_date,
            ..Self::default()
        }
    }
}

/// The read seam formula evaluation goes through. The base store implements
/// it with direct evaluation; the cache layer decorates it.
pub trait SeriesReader: Send + Sync {
    fn get(&self, name: &str, args: &GetArgs) -> StorageResult<crate::series::Curve>;
}
