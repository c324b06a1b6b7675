// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for the cache policy engine

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheError {
    /// One or more policy fields failed expression/cron parsing. Carries
    /// every offending field, never just the first one.
    #[error("Bad inputs for the cache policy: {fields:?}")]
    InvalidPolicy { fields: BTreeMap<String, String> },

    #[error("No such policy: {0}")]
    PolicyNotFound(String),

    #[error("Policy already exists: {0}")]
    PolicyExists(String),

    #[error("Series {0} has no cache policy")]
    NoPolicy(String),

    #[error("Series {series} is already linked to policy {policy}")]
    AlreadyLinked { series: String, policy: String },

    #[error("Not a cacheable formula: {0}")]
    NotAFormula(String),

    /// One or more series failed during a policy batch refresh; the others
    /// completed and are servable.
    #[error("Refresh of policy {policy} failed for series: {names:?}")]
    PartialRefresh { policy: String, names: Vec<String> },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Policy persistence error: {0}")]
    Persistence(String),

    #[error("Moment evaluation error: {0}")]
    Moment(String),

    #[error("Cron evaluation error: {0}")]
    Cron(String),
}

impl From<crate::storage::StorageError> for CacheError {
    fn from(err: crate::storage::StorageError) -> Self {
        CacheError::Storage(err.to_string())
    }
}

impl From<crate::moment::MomentError> for CacheError {
    fn from(err: crate::moment::MomentError) -> Self {
        CacheError::Moment(err.to_string())
    }
}

impl From<crate::cron::CronError> for CacheError {
    fn from(err: crate::cron::CronError) -> Self {
        CacheError::Cron(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
