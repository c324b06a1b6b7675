// Copyright (c) 2025 Bitempo Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Policy persistence
//!
//! A policies table, a policy<->series link table with a per-row advisory
//! flag, and a per-policy bootstrap flag. The link `ready` flag means "not
//! currently mid-refresh"; it is an advisory lock, not "has data", and its
//! transitions are atomic conditional read-modify-writes so two concurrent
//! refreshers cannot both pass the check.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{CacheError, CacheResult};
use super::policy::CachePolicy;

/// One policy<->series association row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyLink {
    pub policy: String,
    pub series: String,
    /// Advisory lock: true when no refresh is in flight.
    pub ready: bool,
}

/// Persistence contract for policies, links and readiness flags.
pub trait PolicyStore: Send + Sync {
    fn create_policy(&self, policy: &CachePolicy) -> CacheResult<()>;
    fn edit_policy(&self, policy: &CachePolicy) -> CacheResult<()>;
    /// Remove the policy and all its links; returns the series that were
    /// linked so the caller can purge their caches.
    fn delete_policy(&self, name: &str) -> CacheResult<Vec<String>>;
    fn policy(&self, name: &str) -> CacheResult<Option<CachePolicy>>;
    fn policies(&self) -> CacheResult<Vec<CachePolicy>>;

    /// Associate a series with a policy. A series has at most one policy.
    fn link_series(&self, policy: &str, series: &str) -> CacheResult<()>;
    fn unlink_series(&self, series: &str) -> CacheResult<bool>;
    fn link(&self, series: &str) -> CacheResult<Option<PolicyLink>>;
    fn policy_for_series(&self, series: &str) -> CacheResult<Option<CachePolicy>>;
    fn series_for_policy(&self, policy: &str) -> CacheResult<Vec<String>>;

    /// Atomically flip the link flag from ready to busy. Returns false when
    /// the flag was already busy (a refresh is in flight) or no link exists.
    fn try_acquire_series(&self, series: &str) -> CacheResult<bool>;
    /// Release the advisory lock. Must be called on every refresh exit path.
    fn release_series(&self, series: &str) -> CacheResult<()>;

    /// Bootstrap flag: false until the policy completes one initial refresh.
    fn policy_ready(&self, name: &str) -> CacheResult<Option<bool>>;
    fn set_policy_ready(&self, name: &str, ready: bool) -> CacheResult<()>;
}

// ----------------------------------------------------------------------
// in-memory implementation

#[derive(Default)]
struct MemoryInner {
    policies: BTreeMap<String, CachePolicy>,
    ready: BTreeMap<String, bool>,
    /// Keyed by series name - a series has at most one link.
    links: BTreeMap<String, PolicyLink>,
}

/// Non-persistent policy store for tests and embedded use.
#[derive(Default)]
pub struct MemoryPolicyStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyStore for MemoryPolicyStore {
    fn create_policy(&self, policy: &CachePolicy) -> CacheResult<()> {
        let mut inner = self.inner.write();
        if inner.policies.contains_key(&policy.name) {
            return Err(CacheError::PolicyExists(policy.name.clone()));
        }
        inner.policies.insert(policy.name.clone(), policy.clone());
        inner.ready.insert(policy.name.clone(), false);
        Ok(())
    }

    fn edit_policy(&self, policy: &CachePolicy) -> CacheResult<()> {
        let mut inner = self.inner.write();
        if !inner.policies.contains_key(&policy.name) {
            return Err(CacheError::PolicyNotFound(policy.name.clone()));
        }
        inner.policies.insert(policy.name.clone(), policy.clone());
        Ok(())
    }

    fn delete_policy(&self, name: &str) -> CacheResult<Vec<String>> {
        let mut inner = self.inner.write();
        if inner.policies.remove(name).is_none() {
            return Err(CacheError::PolicyNotFound(name.to_string()));
        }
        inner.ready.remove(name);
        let linked: Vec<String> = inner
            .links
            .values()
            .filter(|l| l.policy == name)
            .map(|l| l.series.clone())
            .collect();
        for series in &linked {
            inner.links.remove(series);
        }
        Ok(linked)
    }

    fn policy(&self, name: &str) -> CacheResult<Option<CachePolicy>> {
        Ok(self.inner.read().policies.get(name).cloned())
    }

    fn policies(&self) -> CacheResult<Vec<CachePolicy>> {
        Ok(self.inner.read().policies.values().cloned().collect())
    }

    fn link_series(&self, policy: &str, series: &str) -> CacheResult<()> {
        let mut inner = self.inner.write();
        if !inner.policies.contains_key(policy) {
            return Err(CacheError::PolicyNotFound(policy.to_string()));
        }
        if let Some(existing) = inner.links.get(series) {
            return Err(CacheError::AlreadyLinked {
                series: series.to_string(),
                policy: existing.policy.clone(),
            });
        }
        inner.links.insert(
            series.to_string(),
            PolicyLink {
                policy: policy.to_string(),
                series: series.to_string(),
                ready: true,
            },
        );
        Ok(())
    }

    fn unlink_series(&self, series: &str) -> CacheResult<bool> {
        Ok(self.inner.write().links.remove(series).is_some())
    }

    fn link(&self, series: &str) -> CacheResult<Option<PolicyLink>> {
        Ok(self.inner.read().links.get(series).cloned())
    }

    fn policy_for_series(&self, series: &str) -> CacheResult<Option<CachePolicy>> {
        let inner = self.inner.read();
        Ok(inner
            .links
            .get(series)
            .and_then(|l| inner.policies.get(&l.policy))
            .cloned())
    }

    fn series_for_policy(&self, policy: &str) -> CacheResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .links
            .values()
            .filter(|l| l.policy == policy)
            .map(|l| l.series.clone())
            .collect())
    }

    fn try_acquire_series(&self, series: &str) -> CacheResult<bool> {
        let mut inner = self.inner.write();
        match inner.links.get_mut(series) {
            Some(link) if link.ready => {
                link.ready = false;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    fn release_series(&self, series: &str) -> CacheResult<()> {
        if let Some(link) = self.inner.write().links.get_mut(series) {
            link.ready = true;
        }
        Ok(())
    }

    fn policy_ready(&self, name: &str) -> CacheResult<Option<bool>> {
        Ok(self.inner.read().ready.get(name).copied())
    }

    fn set_policy_ready(&self, name: &str, ready: bool) -> CacheResult<()> {
        let mut inner = self.inner.write();
        if !inner.policies.contains_key(name) {
            return Err(CacheError::PolicyNotFound(name.to_string()));
        }
        inner.ready.insert(name.to_string(), ready);
        Ok(())
    }
}

// ----------------------------------------------------------------------
// sled-backed implementation

#[cfg(feature = "sled-backend")]
pub use self::sled_backend::SledPolicyStore;

#[cfg(feature = "sled-backend")]
mod sled_backend {
    use super::*;
    use std::path::Path;

    const POLICIES_TREE: &str = "policies";
    const READY_TREE: &str = "policy_ready";
    const LINKS_TREE: &str = "links";

    /// Durable policy store over an embedded sled database.
    pub struct SledPolicyStore {
        policies: sled::Tree,
        ready: sled::Tree,
        links: sled::Tree,
    }

    fn backend_err(e: impl std::fmt::Display) -> CacheError {
        CacheError::Persistence(e.to_string())
    }

    impl SledPolicyStore {
        pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
            let db = sled::open(path).map_err(backend_err)?;
            Self::from_db(&db)
        }

        pub fn from_db(db: &sled::Db) -> CacheResult<Self> {
            Ok(Self {
                policies: db.open_tree(POLICIES_TREE).map_err(backend_err)?,
                ready: db.open_tree(READY_TREE).map_err(backend_err)?,
                links: db.open_tree(LINKS_TREE).map_err(backend_err)?,
            })
        }

        fn read_policy(&self, name: &str) -> CacheResult<Option<CachePolicy>> {
            match self.policies.get(name).map_err(backend_err)? {
                Some(bytes) => Ok(Some(
                    bincode::deserialize(&bytes).map_err(backend_err)?,
                )),
                None => Ok(None),
            }
        }

        fn read_link(&self, series: &str) -> CacheResult<Option<PolicyLink>> {
            match self.links.get(series).map_err(backend_err)? {
                Some(bytes) => Ok(Some(
                    bincode::deserialize(&bytes).map_err(backend_err)?,
                )),
                None => Ok(None),
            }
        }

        fn write_link(&self, link: &PolicyLink) -> CacheResult<()> {
            let bytes = bincode::serialize(link).map_err(backend_err)?;
            self.links
                .insert(link.series.as_bytes(), bytes)
                .map_err(backend_err)?;
            Ok(())
        }
    }

    impl PolicyStore for SledPolicyStore {
        fn create_policy(&self, policy: &CachePolicy) -> CacheResult<()> {
            if self.read_policy(&policy.name)?.is_some() {
                return Err(CacheError::PolicyExists(policy.name.clone()));
            }
            let bytes = bincode::serialize(policy).map_err(backend_err)?;
            self.policies
                .insert(policy.name.as_bytes(), bytes)
                .map_err(backend_err)?;
            self.ready
                .insert(policy.name.as_bytes(), &[0u8])
                .map_err(backend_err)?;
            Ok(())
        }

        fn edit_policy(&self, policy: &CachePolicy) -> CacheResult<()> {
            if self.read_policy(&policy.name)?.is_none() {
                return Err(CacheError::PolicyNotFound(policy.name.clone()));
            }
            let bytes = bincode::serialize(policy).map_err(backend_err)?;
            self.policies
                .insert(policy.name.as_bytes(), bytes)
                .map_err(backend_err)?;
            Ok(())
        }

        fn delete_policy(&self, name: &str) -> CacheResult<Vec<String>> {
            if self.policies.remove(name).map_err(backend_err)?.is_none() {
                return Err(CacheError::PolicyNotFound(name.to_string()));
            }
            self.ready.remove(name).map_err(backend_err)?;
            let mut linked = Vec::new();
            for item in self.links.iter() {
                let (key, bytes) = item.map_err(backend_err)?;
                let link: PolicyLink =
                    bincode::deserialize(&bytes).map_err(backend_err)?;
                if link.policy == name {
                    self.links.remove(key).map_err(backend_err)?;
                    linked.push(link.series);
                }
            }
            Ok(linked)
        }

        fn policy(&self, name: &str) -> CacheResult<Option<CachePolicy>> {
            self.read_policy(name)
        }

        fn policies(&self) -> CacheResult<Vec<CachePolicy>> {
            let mut out = Vec::new();
            for item in self.policies.iter() {
                let (_, bytes) = item.map_err(backend_err)?;
                out.push(bincode::deserialize(&bytes).map_err(backend_err)?);
            }
            Ok(out)
        }

        fn link_series(&self, policy: &str, series: &str) -> CacheResult<()> {
            if self.read_policy(policy)?.is_none() {
                return Err(CacheError::PolicyNotFound(policy.to_string()));
            }
            if let Some(existing) = self.read_link(series)? {
                return Err(CacheError::AlreadyLinked {
                    series: series.to_string(),
                    policy: existing.policy,
                });
            }
            self.write_link(&PolicyLink {
                policy: policy.to_string(),
                series: series.to_string(),
                ready: true,
            })
        }

        fn unlink_series(&self, series: &str) -> CacheResult<bool> {
            Ok(self.links.remove(series).map_err(backend_err)?.is_some())
        }

        fn link(&self, series: &str) -> CacheResult<Option<PolicyLink>> {
            self.read_link(series)
        }

        fn policy_for_series(&self, series: &str) -> CacheResult<Option<CachePolicy>> {
            match self.read_link(series)? {
                Some(link) => self.read_policy(&link.policy),
                None => Ok(None),
            }
        }

        fn series_for_policy(&self, policy: &str) -> CacheResult<Vec<String>> {
            let mut out = Vec::new();
            for item in self.links.iter() {
                let (_, bytes) = item.map_err(backend_err)?;
                let link: PolicyLink =
                    bincode::deserialize(&bytes).map_err(backend_err)?;
                if link.policy == policy {
                    out.push(link.series);
                }
            }
            Ok(out)
        }

        fn try_acquire_series(&self, series: &str) -> CacheResult<bool> {
            let current = match self.read_link(series)? {
                Some(link) => link,
                None => return Ok(false),
            };
            if !current.ready {
                return Ok(false);
            }
            let mut next = current.clone();
            next.ready = false;
            let old = bincode::serialize(&current).map_err(backend_err)?;
            let new = bincode::serialize(&next).map_err(backend_err)?;
            // compare-and-swap so two refreshers cannot both win
            match self
                .links
                .compare_and_swap(series.as_bytes(), Some(old), Some(new))
                .map_err(backend_err)?
            {
                Ok(()) => Ok(true),
                Err(_) => Ok(false),
            }
        }

        fn release_series(&self, series: &str) -> CacheResult<()> {
            if let Some(mut link) = self.read_link(series)? {
                link.ready = true;
                self.write_link(&link)?;
            }
            Ok(())
        }

        fn policy_ready(&self, name: &str) -> CacheResult<Option<bool>> {
            Ok(self
                .ready
                .get(name)
                .map_err(backend_err)?
                .map(|bytes| bytes.first() == Some(&1)))
        }

        fn set_policy_ready(&self, name: &str, ready: bool) -> CacheResult<()> {
            if self.read_policy(name)?.is_none() {
                return Err(CacheError::PolicyNotFound(name.to_string()));
            }
            self.ready
                .insert(name.as_bytes(), &[u8::from(ready)])
                .map_err(backend_err)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(name: &str) -> CachePolicy {
        CachePolicy::new(
            name,
            "(date \"2022-1-1\")",
            "(shifted now #:days -10)",
            "(shifted now #:days 10)",
            "0 0 * * *",
            "0 8-18 * * *",
        )
    }

    #[test]
    fn memory_policy_crud() {
        let store = MemoryPolicyStore::new();
        store.create_policy(&policy("p1")).unwrap();
        assert!(matches!(
            store.create_policy(&policy("p1")),
            Err(CacheError::PolicyExists(_))
        ));
        assert_eq!(store.policy_ready("p1").unwrap(), Some(false));
        assert_eq!(store.policy_ready("nope").unwrap(), None);

        store.link_series("p1", "s1").unwrap();
        assert!(matches!(
            store.link_series("p1", "s1"),
            Err(CacheError::AlreadyLinked { .. })
        ));
        assert_eq!(store.series_for_policy("p1").unwrap(), vec!["s1"]);

        let unlinked = store.delete_policy("p1").unwrap();
        assert_eq!(unlinked, vec!["s1"]);
        assert_eq!(store.policy("p1").unwrap(), None);
        assert_eq!(store.link("s1").unwrap(), None);
    }

    #[test]
    fn advisory_lock_is_exclusive() {
        let store = MemoryPolicyStore::new();
        store.create_policy(&policy("p1")).unwrap();
        store.link_series("p1", "s1").unwrap();

        assert!(store.try_acquire_series("s1").unwrap());
        // second caller loses, silently
        assert!(!store.try_acquire_series("s1").unwrap());
        store.release_series("s1").unwrap();
        assert!(store.try_acquire_series("s1").unwrap());

        // unknown series never acquires
        assert!(!store.try_acquire_series("ghost").unwrap());
    }

    #[cfg(feature = "sled-backend")]
    #[test]
    fn sled_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledPolicyStore::open(dir.path()).unwrap();
        store.create_policy(&policy("p1")).unwrap();
        store.link_series("p1", "s1").unwrap();

        assert_eq!(store.policy("p1").unwrap().unwrap().revdate_rule, "0 0 * * *");
        assert_eq!(store.policy_ready("p1").unwrap(), Some(false));
        assert!(store.try_acquire_series("s1").unwrap());
        assert!(!store.try_acquire_series("s1").unwrap());
        store.release_series("s1").unwrap();
        assert_eq!(store.link("s1").unwrap().unwrap().ready, true);

        store.set_policy_ready("p1", true).unwrap();
        assert_eq!(store.policy_ready("p1").unwrap(), Some(true));
    }
}
