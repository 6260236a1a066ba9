// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end scenarios that need a real `Runtime` and, for the
//! concurrency cases, real OS threads — these don't fit naturally inside
//! a single-threaded `#[cfg(test)]` module next to the code they exercise.

use rand::seq::SliceRandom;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use yakushima::{Config, Runtime, ScanEndpoint, Status};

fn test_runtime() -> Arc<Runtime> {
    Runtime::new(Config::new(Duration::from_millis(5), 64, 15).unwrap())
}

#[test]
fn two_threads_put_disjoint_keys_then_scan_sees_the_union() {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = test_runtime();
    assert_eq!(rt.create_storage("shared"), Status::Ok);

    let mut handles = Vec::new();
    for half in 0..2u8 {
        let rt = rt.clone();
        handles.push(thread::spawn(move || {
            let (status, token) = rt.enter();
            assert_eq!(status, Status::Ok);
            let token = token.unwrap();
            for i in 0..9u8 {
                let key = [half, i];
                assert_eq!(rt.put(token, "shared", &key, &[i], false), Status::Ok);
            }
            rt.leave(token);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let (status, rows) = rt.scan("shared", b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX);
    assert_eq!(status, Status::OkScanEnd);
    assert_eq!(rows.len(), 18);
    for pair in rows.windows(2) {
        assert!(pair[0].0 < pair[1].0, "scan result not ordered: {:?} >= {:?}", pair[0].0, pair[1].0);
    }

    // now one thread removes its half while the other re-inserts a
    // disjoint key range, concurrently with a third thread scanning.
    let remover = {
        let rt = rt.clone();
        thread::spawn(move || {
            let (_, token) = rt.enter();
            let token = token.unwrap();
            for i in 0..9u8 {
                assert_eq!(rt.remove(token, "shared", &[0u8, i]), Status::Ok);
            }
            rt.leave(token);
        })
    };
    let inserter = {
        let rt = rt.clone();
        thread::spawn(move || {
            let (_, token) = rt.enter();
            let token = token.unwrap();
            for i in 0..9u8 {
                assert_eq!(rt.put(token, "shared", &[2u8, i], &[i], false), Status::Ok);
            }
            rt.leave(token);
        })
    };
    let scanner = {
        let rt = rt.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                let (status, rows) = rt.scan("shared", b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX);
                assert_eq!(status, Status::OkScanEnd);
                for pair in rows.windows(2) {
                    assert!(pair[0].0 < pair[1].0);
                }
            }
        })
    };
    remover.join().unwrap();
    inserter.join().unwrap();
    scanner.join().unwrap();

    let (status, rows) = rt.scan("shared", b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX);
    assert_eq!(status, Status::OkScanEnd);
    assert_eq!(rows.len(), 18);
    assert!(rows.iter().all(|(k, _)| k[0] == 1 || k[0] == 2));
}

#[test]
fn many_keys_random_order_split_tree_scans_in_order() {
    let rt = test_runtime();
    assert_eq!(rt.create_storage("big"), Status::Ok);
    let (_, token) = rt.enter();
    let token = token.unwrap();

    let mut keys: Vec<u32> = (0..120).collect();
    let mut rng = rand::thread_rng();
    keys.shuffle(&mut rng);

    for &k in &keys {
        let key = k.to_be_bytes();
        assert_eq!(rt.put(token, "big", &key, &key, false), Status::Ok);
    }

    let mut sorted = keys.clone();
    sorted.sort_unstable();
    for (idx, &k) in sorted.iter().enumerate() {
        let key = k.to_be_bytes();
        let (status, rows) = rt.scan("big", b"", ScanEndpoint::Inf, &key, ScanEndpoint::Inclusive, usize::MAX);
        assert_eq!(status, Status::OkScanEnd);
        assert_eq!(rows.len(), idx + 1, "scan up to key {k} returned wrong count");
        assert_eq!(rows.last().unwrap().0, key.to_vec());
    }

    rt.leave(token);
}

#[test]
fn multiple_storages_are_isolated() {
    let rt = test_runtime();
    assert_eq!(rt.create_storage("a"), Status::Ok);
    assert_eq!(rt.create_storage("b"), Status::Ok);
    let (_, token) = rt.enter();
    let token = token.unwrap();

    assert_eq!(rt.put(token, "a", b"k", b"from-a", false), Status::Ok);
    assert_eq!(rt.put(token, "b", b"k", b"from-b", false), Status::Ok);

    let (_, va) = rt.get("a", b"k");
    let (_, vb) = rt.get("b", b"k");
    assert_eq!(va.unwrap(), b"from-a");
    assert_eq!(vb.unwrap(), b"from-b");

    assert_eq!(rt.delete_storage("a"), Status::Ok);
    assert_eq!(rt.find_storage("a"), Status::WarnStorageNotExist);
    assert_eq!(rt.find_storage("b"), Status::Ok);
    assert_eq!(rt.delete_storage("a"), Status::WarnStorageNotExist);

    let (status, vb_after) = rt.get("b", b"k");
    assert_eq!(status, Status::Ok);
    assert_eq!(vb_after.unwrap(), b"from-b");

    rt.leave(token);
}
