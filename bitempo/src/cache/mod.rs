// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Cache policy engine
//!
//! A policy names a refresh horizon (three moment expressions) and two cron
//! rules. Formulas mapped to a policy get a materialized revision history,
//! kept current by [`RefreshEngine`] and served through [`CachedReader`],
//! which patches the cached tail with a live evaluation over the policy's
//! look-ahead window.

mod error;
mod frequency;
mod ordering;
mod policy;
mod read;
mod refresh;
mod store;

pub use error::{CacheError, CacheResult};
pub use frequency::reduce_frequency;
pub use ordering::sort_for_refresh;
pub use policy::{validate_policy, CachePolicy};
pub use read::CachedReader;
pub use refresh::RefreshEngine;
pub use store::{MemoryPolicyStore, PolicyLink, PolicyStore};

#[cfg(feature = "sled-backend")]
pub use store::SledPolicyStore;
