// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The storage registry: the name → [`TreeInstance`] directory that every
//! named index is looked up through.
//!
//! The reference design models the registry itself as a tree instance
//! keyed by storage name; this crate uses a plain `parking_lot::RwLock`
//! over a `HashMap` instead; see `DESIGN.md` for the rationale. The
//! simplification is invisible at the API boundary — `create_storage`,
//! `find_storage`, `delete_storage` and `list_storages` behave exactly as
//! specified.

use crate::error::Status;
use crate::tree::TreeInstance;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Name → index directory, plus best-effort tracking of storages mid
/// `delete_storage` so a racing `create_storage`/`find_storage` on the
/// same name can report [`Status::WarnConcurrentOperations`] instead of
/// silently resurrecting a storage that is being torn down.
pub struct StorageRegistry {
    storages: RwLock<HashMap<String, Arc<TreeInstance>>>,
    deleting: RwLock<HashSet<String>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self {
            storages: RwLock::new(HashMap::new()),
            deleting: RwLock::new(HashSet::new()),
        }
    }

    pub fn create_storage(&self, name: &str) -> Status {
        if self.deleting.read().contains(name) {
            log::warn!(target: "yakushima::storage", "create_storage({name}) raced a concurrent delete");
            return Status::WarnConcurrentOperations;
        }
        let mut storages = self.storages.write();
        if storages.contains_key(name) {
            return Status::WarnExist;
        }
        storages.insert(name.to_string(), Arc::new(TreeInstance::new()));
        log::debug!(target: "yakushima::storage", "created storage {name}");
        Status::Ok
    }

    pub fn find_storage(&self, name: &str) -> Option<Arc<TreeInstance>> {
        self.storages.read().get(name).cloned()
    }

    pub fn delete_storage(&self, name: &str) -> Status {
        {
            let mut deleting = self.deleting.write();
            if !deleting.insert(name.to_string()) {
                return Status::WarnConcurrentOperations;
            }
        }
        let removed = self.storages.write().remove(name);
        self.deleting.write().remove(name);
        match removed {
            Some(tree) => {
                tree.destroy();
                log::debug!(target: "yakushima::storage", "deleted storage {name}");
                Status::Ok
            }
            None => Status::WarnStorageNotExist,
        }
    }

    pub fn list_storages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.storages.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.storages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_find_round_trips() {
        let reg = StorageRegistry::new();
        assert_eq!(reg.create_storage("a"), Status::Ok);
        assert!(reg.find_storage("a").is_some());
    }

    #[test]
    fn create_twice_warns_exist() {
        let reg = StorageRegistry::new();
        reg.create_storage("a");
        assert_eq!(reg.create_storage("a"), Status::WarnExist);
    }

    #[test]
    fn delete_missing_warns_not_exist() {
        let reg = StorageRegistry::new();
        assert_eq!(reg.delete_storage("missing"), Status::WarnStorageNotExist);
    }

    #[test]
    fn delete_then_find_is_none() {
        let reg = StorageRegistry::new();
        reg.create_storage("a");
        assert_eq!(reg.delete_storage("a"), Status::Ok);
        assert!(reg.find_storage("a").is_none());
    }

    #[test]
    fn list_storages_is_sorted() {
        let reg = StorageRegistry::new();
        reg.create_storage("z");
        reg.create_storage("a");
        reg.create_storage("m");
        assert_eq!(reg.list_storages(), vec!["a".to_string(), "m".to_string(), "z".to_string()]);
    }
}
