// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The session table: every thread that touches the index must hold a
//! [`Token`] obtained from [`SessionTable::enter`], which records the
//! caller's begin-epoch so the garbage collector never frees memory a live
//! reader might still be walking.

use crate::epoch::{Epoch, EpochManager};
use crate::error::{Result, Status, YakushimaError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// An opaque handle to a claimed session slot. Must be released with
/// [`SessionTable::leave`] before the runtime shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token(pub(crate) usize);

/// A unit of deferred work run once no session can still observe the
/// memory it frees. Boxed and type-erased so `Node` subtrees and
/// `ValueBox` payloads share one retirement path.
pub struct Garbage(Box<dyn FnOnce() + Send>);

impl Garbage {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }
}

struct Slot {
    occupied: AtomicBool,
    begin_epoch: AtomicU64,
    retired: Mutex<Vec<(Epoch, Garbage)>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            occupied: AtomicBool::new(false),
            begin_epoch: AtomicU64::new(0),
            retired: Mutex::new(Vec::new()),
        }
    }
}

/// Fixed-size session table. The default capacity (300) mirrors the
/// reference implementation; callers who need more concurrent sessions
/// raise it via [`crate::config::Config::max_sessions`].
pub struct SessionTable {
    slots: Vec<Slot>,
    epoch: Arc<EpochManager>,
    /// Garbage a session retired but whose owning slot was released
    /// before the GC sweep caught up; still swept by `reclaim_below`.
    orphaned: Mutex<Vec<(Epoch, Garbage)>>,
}

pub struct Session<'a> {
    table: &'a SessionTable,
    token: Token,
}

impl<'a> Session<'a> {
    pub fn token(&self) -> Token {
        self.token
    }
    pub fn retire(&self, garbage: Garbage) {
        self.table.retire(self.token, garbage);
    }
}

impl<'a> Drop for Session<'a> {
    fn drop(&mut self) {
        self.table.leave(self.token);
    }
}

impl SessionTable {
    pub fn new(capacity: usize, epoch: Arc<EpochManager>) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::new);
        Self {
            slots,
            epoch,
            orphaned: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claims a free slot and stamps it with the current global epoch.
    /// Returns [`Status::WarnMaxSessions`] when the table is full.
    pub fn enter(&self) -> Result<Session<'_>> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .occupied
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.begin_epoch.store(self.epoch.get(), Ordering::Release);
                log::trace!(target: "yakushima::session", "session {idx} entered at epoch {}", self.epoch.get());
                return Ok(Session {
                    table: self,
                    token: Token(idx),
                });
            }
        }
        log::warn!(target: "yakushima::session", "session table exhausted ({} slots)", self.slots.len());
        Err(YakushimaError::BadUsage("session table is full"))
    }

    /// Explicit, `Status`-returning entry point used by the public API;
    /// `Session::drop` is the normal path internal callers use instead.
    pub fn enter_status(&self) -> (Status, Option<Token>) {
        match self.enter() {
            Ok(s) => {
                let t = s.token();
                std::mem::forget(s);
                (Status::Ok, Some(t))
            }
            Err(_) => (Status::WarnMaxSessions, None),
        }
    }

    fn leave(&self, token: Token) {
        let slot = &self.slots[token.0];
        let mut retired = slot.retired.lock();
        if !retired.is_empty() {
            self.orphaned.lock().append(&mut retired);
        }
        drop(retired);
        slot.occupied.store(false, Ordering::Release);
        log::trace!(target: "yakushima::session", "session {} left", token.0);
    }

    pub fn leave_token(&self, token: Token) -> Status {
        if token.0 >= self.slots.len() || !self.slots[token.0].occupied.load(Ordering::Acquire) {
            return Status::WarnInvalidToken;
        }
        self.leave(token);
        Status::Ok
    }

    fn retire(&self, token: Token, garbage: Garbage) {
        let slot = &self.slots[token.0];
        let stamp = slot.begin_epoch.load(Ordering::Acquire);
        slot.retired.lock().push((stamp, garbage));
    }

    /// Defers `garbage` for reclamation once no session's begin-epoch can
    /// still observe it. Used by callers (the tree/write path) that only
    /// hold a bare [`Token`], not an owning [`Session`] guard — the public
    /// function-level API hands out tokens, not RAII sessions.
    pub fn retire_by_token(&self, token: Token, garbage: Garbage) {
        self.retire(token, garbage);
    }

    /// The lowest begin-epoch among all currently occupied slots, i.e. the
    /// epoch below which it is safe to free anything retired.
    pub fn min_begin_epoch(&self) -> Option<Epoch> {
        self.slots
            .iter()
            .filter(|s| s.occupied.load(Ordering::Acquire))
            .map(|s| s.begin_epoch.load(Ordering::Acquire))
            .min()
    }

    /// Drops every retired item stamped with an epoch strictly below
    /// `safe_epoch`. Returns how many were freed.
    pub fn reclaim_below(&self, safe_epoch: Epoch) -> usize {
        let mut freed = 0;
        for slot in &self.slots {
            let mut retired = slot.retired.lock();
            let (ready, pending): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *retired).into_iter().partition(|(stamp, _)| *stamp < safe_epoch);
            *retired = pending;
            drop(retired);
            freed += ready.len();
            for (_, garbage) in ready {
                (garbage.0)();
            }
        }
        freed
    }

    pub fn any_occupied(&self) -> bool {
        self.slots.iter().any(|s| s.occupied.load(Ordering::Acquire))
    }
}
