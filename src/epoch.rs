// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Global epoch counter and the background threads that advance it and
//! sweep retired garbage.
//!
//! This crate uses `crossbeam_epoch`'s `Atomic`/`Shared`/`Owned` purely as
//! a tagged-atomic-pointer library (see `sync::atm`); the actual
//! reclamation timing is governed entirely by this module and
//! `session::SessionTable`, not by crossbeam's own collector. Every load
//! site pins with `crossbeam_epoch::unprotected()` rather than
//! `crossbeam_epoch::pin()`, which is sound here specifically because no
//! other mechanism ever frees a node or value except this module's GC
//! sweep, which only does so once every session's recorded begin-epoch has
//! advanced past the retirement epoch.
//!
//! The tick thread doesn't advance on a bare timer: it also waits for
//! every currently active session to have entered at or after the current
//! epoch before bumping it. That's what guarantees a session can never
//! straddle more than one tick — it either began before this tick (and
//! the tick waits on it) or after (and its begin-epoch already reflects
//! the new value) — which is what lets the GC sweep trust a retired
//! object's epoch number as a safe lower bound.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub type Epoch = u64;

#[derive(Debug)]
pub struct EpochManager {
    epoch: AtomicU64,
}

impl EpochManager {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU64::new(1),
        }
    }
    pub fn get(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }
    pub fn advance(&self) -> Epoch {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for EpochManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the two cooperating background workers: one bumps the global
/// epoch on a timer, the other sweeps every session's retirement list for
/// garbage that is now safe to free.
pub struct EpochThreads {
    shutdown: Arc<AtomicBool>,
    tick: Option<JoinHandle<()>>,
    gc: Option<JoinHandle<()>>,
}

impl EpochThreads {
    pub fn spawn(
        epoch: Arc<EpochManager>,
        sessions: Arc<crate::session::SessionTable>,
        tick_interval: Duration,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));

        let tick_shutdown = shutdown.clone();
        let tick_epoch = epoch.clone();
        let tick_sessions = sessions.clone();
        let tick = std::thread::Builder::new()
            .name("yakushima-epoch-tick".into())
            .spawn(move || {
                while !tick_shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(tick_interval);
                    if tick_shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let current = tick_epoch.get();
                    let backoff = crate::sync::Backoff::new();
                    loop {
                        if tick_shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        match tick_sessions.min_begin_epoch() {
                            None => break,
                            Some(min) if min >= current => break,
                            _ => {
                                log::trace!(
                                    target: "yakushima::epoch",
                                    "tick to {} waiting on a session still at an earlier epoch",
                                    current + 1
                                );
                                backoff.snooze();
                            }
                        }
                    }
                    if tick_shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let e = tick_epoch.advance();
                    log::trace!(target: "yakushima::epoch", "epoch advanced to {e}");
                }
            })
            .expect("failed to spawn epoch tick thread");

        let gc_shutdown = shutdown.clone();
        let gc_epoch = epoch;
        let gc_sessions = sessions;
        let gc = std::thread::Builder::new()
            .name("yakushima-epoch-gc".into())
            .spawn(move || {
                while !gc_shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(tick_interval);
                    let safe_epoch = gc_sessions.min_begin_epoch().unwrap_or(gc_epoch.get());
                    let freed = gc_sessions.reclaim_below(safe_epoch);
                    if freed > 0 {
                        log::debug!(target: "yakushima::epoch", "reclaimed {freed} objects below epoch {safe_epoch}");
                    }
                }
            })
            .expect("failed to spawn epoch gc thread");

        Self {
            shutdown,
            tick: Some(tick),
            gc: Some(gc),
        }
    }
}

impl Drop for EpochThreads {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.tick.take() {
            let _ = h.join();
        }
        if let Some(h) = self.gc.take() {
            let _ = h.join();
        }
        log::info!(target: "yakushima::epoch", "epoch manager threads stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_increments() {
        let m = EpochManager::new();
        let before = m.get();
        let after = m.advance();
        assert_eq!(after, before + 1);
        assert_eq!(m.get(), after);
    }
}
