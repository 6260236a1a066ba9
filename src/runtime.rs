// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! [`Runtime`]: an explicit context object bundling the epoch manager,
//! session table, background GC threads and storage registry. The crate
//! root's free functions are a thin global-singleton convenience layer
//! over one `Arc<Runtime>`; tests and embedders that want more than one
//! independent instance (or want to avoid a process-wide singleton
//! entirely) construct a `Runtime` directly.

use crate::config::Config;
use crate::epoch::{Epoch, EpochManager, EpochThreads};
use crate::error::Status;
use crate::session::{SessionTable, Token};
use crate::storage::StorageRegistry;
use crate::tree::ScanEndpoint;
use std::sync::Arc;

pub struct Runtime {
    config: Config,
    epoch: Arc<EpochManager>,
    sessions: Arc<SessionTable>,
    storages: StorageRegistry,
    threads: EpochThreads,
}

impl Runtime {
    pub fn new(config: Config) -> Arc<Self> {
        let epoch = Arc::new(EpochManager::new());
        let sessions = Arc::new(SessionTable::new(config.max_sessions, epoch.clone()));
        let threads = EpochThreads::spawn(epoch.clone(), sessions.clone(), config.epoch_tick_interval);
        log::info!(
            target: "yakushima::runtime",
            "runtime started (max_sessions={}, tick={:?})",
            config.max_sessions,
            config.epoch_tick_interval
        );
        Arc::new(Self {
            config,
            epoch,
            sessions,
            storages: StorageRegistry::new(),
            threads,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn enter(&self) -> (Status, Option<Token>) {
        self.sessions.enter_status()
    }

    pub fn leave(&self, token: Token) -> Status {
        self.sessions.leave_token(token)
    }

    pub fn has_active_sessions(&self) -> bool {
        self.sessions.any_occupied()
    }

    pub fn create_storage(&self, name: &str) -> Status {
        self.storages.create_storage(name)
    }

    pub fn delete_storage(&self, name: &str) -> Status {
        self.storages.delete_storage(name)
    }

    pub fn find_storage(&self, name: &str) -> Status {
        if self.storages.find_storage(name).is_some() {
            Status::Ok
        } else {
            Status::WarnStorageNotExist
        }
    }

    pub fn list_storages(&self) -> Vec<String> {
        self.storages.list_storages()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &self,
        token: Token,
        storage: &str,
        key: &[u8],
        value: &[u8],
        unique_restriction: bool,
    ) -> Status {
        let Some(tree) = self.storages.find_storage(storage) else {
            return Status::WarnStorageNotExist;
        };
        let r = tree.put(
            &self.sessions,
            token,
            key,
            value.as_ptr(),
            value.len(),
            std::mem::align_of::<u8>(),
            unique_restriction,
        );
        crate::error::flatten(r)
    }

    pub fn get(&self, storage: &str, key: &[u8]) -> (Status, Option<Vec<u8>>) {
        let Some(tree) = self.storages.find_storage(storage) else {
            return (Status::WarnStorageNotExist, None);
        };
        match tree.get(key) {
            Ok((status, value)) => (status, value),
            Err(e) => (Status::from(&e), None),
        }
    }

    pub fn remove(&self, token: Token, storage: &str, key: &[u8]) -> Status {
        let Some(tree) = self.storages.find_storage(storage) else {
            return Status::WarnStorageNotExist;
        };
        crate::error::flatten(tree.remove(&self.sessions, token, key))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn scan(
        &self,
        storage: &str,
        l_key: &[u8],
        l_end: ScanEndpoint,
        r_key: &[u8],
        r_end: ScanEndpoint,
        max_size: usize,
    ) -> (Status, Vec<(Vec<u8>, Vec<u8>)>) {
        let Some(tree) = self.storages.find_storage(storage) else {
            return (Status::WarnStorageNotExist, Vec::new());
        };
        match tree.scan(l_key, l_end, r_key, r_end, max_size, None) {
            Ok((status, tuples)) => (status, tuples),
            Err(e) => (Status::from(&e), Vec::new()),
        }
    }

    pub fn destroy(&self, storage: &str) -> Status {
        match self.storages.find_storage(storage) {
            Some(tree) => tree.destroy(),
            None => Status::WarnStorageNotExist,
        }
    }

    /// Manually advances the global epoch and runs one GC sweep,
    /// bypassing the background timer. Useful for tests that need
    /// deterministic reclamation without sleeping past `epoch_tick_interval`.
    pub fn force_epoch_tick(&self) -> Epoch {
        self.epoch.advance()
    }

    pub fn gc_sweep(&self) -> usize {
        let safe_epoch = self.sessions.min_begin_epoch().unwrap_or_else(|| self.epoch.get());
        self.sessions.reclaim_below(safe_epoch)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        log::info!(target: "yakushima::runtime", "runtime shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_runtime() -> Arc<Runtime> {
        Runtime::new(Config::new(Duration::from_millis(5), 8, 15).unwrap())
    }

    #[test]
    fn create_put_get_storage_round_trip() {
        let rt = test_runtime();
        assert_eq!(rt.create_storage("s"), Status::Ok);
        let (status, token) = rt.enter();
        assert_eq!(status, Status::Ok);
        let token = token.unwrap();
        assert_eq!(rt.put(token, "s", b"k", b"v", false), Status::Ok);
        let (status, value) = rt.get("s", b"k");
        assert_eq!(status, Status::Ok);
        assert_eq!(value.unwrap(), b"v");
        rt.leave(token);
    }

    #[test]
    fn operations_on_missing_storage_warn() {
        let rt = test_runtime();
        let (status, token) = rt.enter();
        assert_eq!(status, Status::Ok);
        let token = token.unwrap();
        assert_eq!(rt.put(token, "missing", b"k", b"v", false), Status::WarnStorageNotExist);
        let (status, _) = rt.get("missing", b"k");
        assert_eq!(status, Status::WarnStorageNotExist);
        assert_eq!(rt.remove(token, "missing", b"k"), Status::WarnStorageNotExist);
        rt.leave(token);
    }

    #[test]
    fn destroy_and_delete_storage() {
        let rt = test_runtime();
        rt.create_storage("s");
        let (_, token) = rt.enter();
        let token = token.unwrap();
        rt.put(token, "s", b"k", b"v", false);
        assert_eq!(rt.destroy("s"), Status::OkDestroyAll);
        let (status, _) = rt.get("s", b"k");
        assert_eq!(status, Status::WarnNotExist);
        assert_eq!(rt.delete_storage("s"), Status::Ok);
        assert_eq!(rt.find_storage("s"), Status::WarnStorageNotExist);
        rt.leave(token);
    }

    #[test]
    fn gc_sweep_reclaims_after_session_leaves() {
        let rt = test_runtime();
        rt.create_storage("s");
        let (_, token) = rt.enter();
        let token = token.unwrap();
        rt.put(token, "s", b"k", b"v1", false);
        rt.put(token, "s", b"k", b"v2", false);
        rt.leave(token);
        rt.force_epoch_tick();
        rt.force_epoch_tick();
        let freed = rt.gc_sweep();
        assert!(freed >= 1);
    }
}
