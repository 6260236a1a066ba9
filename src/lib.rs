// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! An in-memory, concurrent, ordered key-value index built as a trie of
//! B+-trees: each 8-byte slice of a key forms one trie layer, so keys of
//! any length share structure with their prefixes and a range [`scan`]
//! returns results in byte-lexicographic key order.
//!
//! Concurrency is optimistic: readers ([`get`], [`scan`]) never block,
//! validating the per-node version word they traversed against a retry
//! loop; writers ([`put`], [`remove`]) serialize per storage instance.
//! Reclamation is epoch-based — every thread that touches the index holds
//! a [`Token`] obtained from [`enter`], and memory is only freed once no
//! live token's begin-epoch can still observe it.
//!
//! Most applications use the module-level free functions below, backed by
//! one process-wide [`Runtime`] initialized via [`init`]/[`init_with`].
//! Embedders that want an explicit, non-singleton context (e.g. multiple
//! independent indices in one process, or deterministic test teardown)
//! construct a [`Runtime`] directly instead.

mod mem;
mod sync;
mod value;

pub mod config;
pub mod epoch;
pub mod error;
pub mod key;
pub mod node;
pub mod permutation;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod tree;
pub mod version;

pub use config::Config;
pub use error::{Result, Status, YakushimaError};
pub use runtime::Runtime;
pub use session::Token;
pub use tree::ScanEndpoint;

use parking_lot::RwLock;
use std::sync::Arc;

/// A border node's slot array holds at most this many entries; matches
/// the permutation word's 4-bit-per-rank slot addressing (see
/// [`permutation`]).
pub const FANOUT: usize = 15;

static GLOBAL: RwLock<Option<Arc<Runtime>>> = RwLock::new(None);

fn global() -> Option<Arc<Runtime>> {
    GLOBAL.read().clone()
}

/// Initializes the process-wide runtime with default [`Config`]. Returns
/// [`Status::WarnExist`] if already initialized.
pub fn init() -> Status {
    init_with(Config::default())
}

/// Initializes the process-wide runtime with an explicit [`Config`].
pub fn init_with(config: Config) -> Status {
    let mut slot = GLOBAL.write();
    if slot.is_some() {
        log::warn!(target: "yakushima", "init called while runtime already running");
        return Status::WarnExist;
    }
    *slot = Some(Runtime::new(config));
    Status::Ok
}

/// Tears down the process-wide runtime, stopping its background threads.
/// Any storage still registered is dropped along with it.
///
/// # Panics
/// Panics if any session is still open (hasn't called [`leave`]) — tearing
/// the runtime down under a live session would deadlock or corrupt the
/// tick/GC loop rather than fail cleanly, so this is a programming-error
/// precondition, not a [`Status`].
pub fn fin() -> Status {
    let mut slot = GLOBAL.write();
    let Some(rt) = slot.as_ref() else {
        return Status::ErrBadUsage;
    };
    // checked before the slot is cleared: a panic here must leave the
    // runtime in place so the caller can leave() outstanding sessions and
    // retry, instead of dropping it out from under them mid-unwind.
    assert!(
        !rt.has_active_sessions(),
        "fin() called while a session is still open; call leave() on every token first"
    );
    *slot = None;
    Status::Ok
}

pub fn enter() -> (Status, Option<Token>) {
    match global() {
        Some(rt) => rt.enter(),
        None => (Status::ErrBadUsage, None),
    }
}

pub fn leave(token: Token) -> Status {
    match global() {
        Some(rt) => rt.leave(token),
        None => Status::ErrBadUsage,
    }
}

pub fn create_storage(name: &str) -> Status {
    match global() {
        Some(rt) => rt.create_storage(name),
        None => Status::ErrBadUsage,
    }
}

pub fn delete_storage(name: &str) -> Status {
    match global() {
        Some(rt) => rt.delete_storage(name),
        None => Status::ErrBadUsage,
    }
}

pub fn find_storage(name: &str) -> Status {
    match global() {
        Some(rt) => rt.find_storage(name),
        None => Status::ErrBadUsage,
    }
}

pub fn list_storages() -> Vec<String> {
    global().map(|rt| rt.list_storages()).unwrap_or_default()
}

pub fn put(token: Token, storage: &str, key: &[u8], value: &[u8], unique_restriction: bool) -> Status {
    match global() {
        Some(rt) => rt.put(token, storage, key, value, unique_restriction),
        None => Status::ErrBadUsage,
    }
}

pub fn get(storage: &str, key: &[u8]) -> (Status, Option<Vec<u8>>) {
    match global() {
        Some(rt) => rt.get(storage, key),
        None => (Status::ErrBadUsage, None),
    }
}

pub fn remove(token: Token, storage: &str, key: &[u8]) -> Status {
    match global() {
        Some(rt) => rt.remove(token, storage, key),
        None => Status::ErrBadUsage,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn scan(
    storage: &str,
    l_key: &[u8],
    l_end: ScanEndpoint,
    r_key: &[u8],
    r_end: ScanEndpoint,
    max_size: usize,
) -> (Status, Vec<(Vec<u8>, Vec<u8>)>) {
    match global() {
        Some(rt) => rt.scan(storage, l_key, l_end, r_key, r_end, max_size),
        None => (Status::ErrBadUsage, Vec::new()),
    }
}

pub fn destroy(storage: &str) -> Status {
    match global() {
        Some(rt) => rt.destroy(storage),
        None => Status::ErrBadUsage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exercises the process-wide singleton lifecycle end to end. This is
    /// the only test in the crate touching `GLOBAL`, so it doesn't race
    /// other test threads.
    #[test]
    fn global_lifecycle_round_trips() {
        assert_eq!(init(), Status::Ok);
        assert_eq!(init(), Status::WarnExist);

        assert_eq!(create_storage("users"), Status::Ok);
        let (status, token) = enter();
        assert_eq!(status, Status::Ok);
        let token = token.unwrap();

        assert_eq!(put(token, "users", b"alice", b"1", false), Status::Ok);
        let (status, value) = get("users", b"alice");
        assert_eq!(status, Status::Ok);
        assert_eq!(value.unwrap(), b"1");

        let (status, rows) = scan("users", b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX);
        assert_eq!(status, Status::OkScanEnd);
        assert_eq!(rows.len(), 1);

        assert_eq!(remove(token, "users", b"alice"), Status::Ok);
        let (status, _) = get("users", b"alice");
        assert_eq!(status, Status::WarnNotExist);

        // fin() must refuse to tear the runtime down while a session is
        // still open rather than silently deadlocking the tick loop.
        let fin_with_open_session = std::panic::catch_unwind(std::panic::AssertUnwindSafe(fin));
        assert!(fin_with_open_session.is_err());

        assert_eq!(leave(token), Status::Ok);
        assert_eq!(delete_storage("users"), Status::Ok);
        assert_eq!(find_storage("users"), Status::WarnStorageNotExist);

        assert_eq!(fin(), Status::Ok);
        assert_eq!(fin(), Status::ErrBadUsage);

        // with no runtime running, every call reports bad usage rather
        // than panicking.
        assert_eq!(find_storage("anything"), Status::ErrBadUsage);
    }
}
