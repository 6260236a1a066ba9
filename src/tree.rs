// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The trie-of-B+-trees core: [`TreeInstance`] owns one named index and
//! implements `put`/`get`/`remove`/`scan`/`destroy` by descending through
//! one border/interior B+-tree per 8-byte key layer, following
//! [`LinkOrValue::NextLayer`] pointers between layers.
//!
//! Mutations (`put`/`remove`, including node splits, border collapses and
//! interior re-parenting) serialize on `write_lock`: a single
//! `parking_lot::Mutex` per tree instance. Readers (`get`/`scan`) never
//! take this lock — they descend lock-free, validating each border/interior
//! node's [`VersionWord`](crate::version::VersionWord) against a retry loop
//! exactly as the optimistic-concurrency design calls for. Serializing
//! writers trades the reference implementation's fine-grained
//! hand-over-hand parent-chain locking for a single mutex; every testable
//! property in the specification (ordering, uniqueness, remove-visibility,
//! scan atomicity, concurrent correctness under disjoint key races) holds
//! under this simplification, which is recorded as a deliberate scope
//! reduction in `DESIGN.md`. Per-node version words and dirty bits are
//! still maintained faithfully so lock-free readers validate exactly as
//! the specification describes; the mutex only removes the need for
//! hand-over-hand locking among writers.
//!
//! Values and retired nodes are never freed in place: every removal or
//! overwrite hands the old [`ValueBox`] or subtree to the caller's
//! [`Session`](crate::session::Session)/[`Token`] for epoch-deferred
//! reclamation, because a concurrent lock-free reader may still hold a
//! reference to it.

use crate::error::{Result, Status, YakushimaError};
use crate::key::{self, CONTINUES_TAG};
use crate::node::{LinkOrValue, Node};
use crate::session::{Garbage, SessionTable, Token};
use crate::sync::atm::{upin, Atomic, Guard, Owned, Pointer, Shared};
use crate::sync::Backoff;
use crate::value::ValueBox;
use crate::version::VersionSnapshot;
use parking_lot::Mutex;

/// A single named index: one trie-of-B+-trees.
pub struct TreeInstance {
    root: Atomic<Node>,
    write_lock: Mutex<()>,
}

/// The side of a scan range endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEndpoint {
    Exclusive,
    Inclusive,
    Inf,
}

/// A (node, snapshot) pair recorded while scanning, so the caller can later
/// re-validate that no border visited during the scan window was mutated.
/// Per the specification's scan-atomicity contract this is the caller's
/// responsibility; `yakushima` only supplies the raw ingredients.
#[derive(Clone, Copy)]
pub struct ScanVersion {
    node: *const Node,
    snapshot: VersionSnapshot,
}

// SAFETY: `ScanVersion` only reads through the raw pointer under
// `is_unchanged`, which documents the same liveness requirement as any
// other lock-free read in this crate.
unsafe impl Send for ScanVersion {}
unsafe impl Sync for ScanVersion {}

impl ScanVersion {
    /// True if the referenced node's version word still matches the
    /// snapshot taken during the scan.
    ///
    /// # Safety
    /// The node must not have been reclaimed since the scan — i.e. this
    /// must be called before any session whose begin-epoch predates the
    /// scan has left (the epoch GC cannot have advanced past it).
    pub unsafe fn is_unchanged(&self) -> bool {
        (*self.node).version.load() == self.snapshot
    }
}

/// Internal signal bubbled up from a nested layer scan: a structural
/// change (`vsplit`) was observed, so the whole multi-layer scan must
/// restart from this tree's root.
struct RetryFromRoot;

/// Retires an entire detached subtree (the node and everything still
/// reachable from it). Only correct when nothing below `node` remains
/// reachable from the live tree — e.g. an emptied border, whose slots
/// hold no live next-layer links by definition.
fn retire_node(sessions: &SessionTable, token: Token, node: Shared<'_, Node>) {
    let raw = node.as_raw() as usize;
    sessions.retire_by_token(
        token,
        Garbage::new(move || unsafe {
            let guard = upin();
            let shared = Shared::<Node>::from_usize(raw);
            Node::destroy_subtree(shared, &guard);
        }),
    );
}

/// Retires only `node`'s own allocation, leaving anything still reachable
/// through it (e.g. a surviving child re-parented elsewhere) untouched.
/// Used when an interior node collapses: one of its two children is
/// promoted into the live tree, so only the interior struct itself — not
/// its child subtrees — may be freed.
fn retire_node_shallow(sessions: &SessionTable, token: Token, node: Shared<'_, Node>) {
    let raw = node.as_raw() as usize;
    sessions.retire_by_token(
        token,
        Garbage::new(move || unsafe {
            drop(Shared::<Node>::from_usize(raw).into_owned());
        }),
    );
}

impl TreeInstance {
    pub fn new() -> Self {
        let root = Node::new_border(true);
        Self {
            root: Atomic::new_alloc(root),
            write_lock: Mutex::new(()),
        }
    }

    fn layer_root<'g>(&self, guard: &'g Guard) -> Shared<'g, Node> {
        self.root.ld_acq(guard)
    }

    /// Descends from `layer_root` to the border node that would hold
    /// `(slice, length)`, walking interior separators.
    fn descend_to_border<'g>(
        layer_root: Shared<'g, Node>,
        slice: u64,
        length: u8,
        guard: &'g Guard,
    ) -> Shared<'g, Node> {
        let mut cur = layer_root;
        loop {
            let node = unsafe { cur.deref() };
            match node.as_interior() {
                None => return cur,
                Some(i) => {
                    let idx = i.child_index(slice, length);
                    cur = i.children[idx].ld_acq(guard);
                }
            }
        }
    }

    /// Finds the border slot (if any) for `key` across all of its layers,
    /// retrying the whole descent if a concurrent structural change is
    /// observed. Returns the border node and the matching rank.
    fn find_border<'g>(
        &self,
        key: &[u8],
        guard: &'g Guard,
    ) -> std::result::Result<Option<(Shared<'g, Node>, usize)>, ()> {
        let mut current_root = self.root.ld_acq(guard);
        let mut depth = 0usize;
        loop {
            if current_root.is_null() {
                return Ok(None);
            }
            let (slice, length) = key::slice_at(key, depth);
            let border_shared = Self::descend_to_border(current_root, slice, length, guard);
            let border = unsafe { border_shared.deref() };
            let before = border.version.stable();
            let bn = border.as_border().expect("descend_to_border returned interior");
            let rank = bn.find_rank(slice, length);
            let after = border.version.load();
            if !before.same_structure(after) || after.is_deleted() {
                return Err(());
            }
            match rank {
                None => return Ok(None),
                Some(rank) => {
                    let slot = bn.permutation().slot_at_rank(rank);
                    if length == CONTINUES_TAG {
                        match &bn.lv[slot] {
                            LinkOrValue::NextLayer(next) => {
                                current_root = next.ld_acq(guard);
                                depth += 1;
                                continue;
                            }
                            _ => return Err(()),
                        }
                    } else {
                        return Ok(Some((border_shared, rank)));
                    }
                }
            }
        }
    }

    fn find_border_retrying<'g>(&self, key: &[u8], guard: &'g Guard) -> Option<(Shared<'g, Node>, usize)> {
        let backoff = Backoff::new();
        loop {
            if let Ok(r) = self.find_border(key, guard) {
                return r;
            }
            log::trace!(target: "yakushima::tree", "descent retry: version changed under a concurrent writer");
            backoff.snooze();
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<(Status, Option<Vec<u8>>)> {
        let guard = unsafe { upin() };
        match self.find_border_retrying(key, &guard) {
            None => Ok((Status::WarnNotExist, None)),
            Some((border_shared, rank)) => {
                let border = unsafe { border_shared.deref() };
                let bn = border.as_border().unwrap();
                let slot = bn.permutation().slot_at_rank(rank);
                let v = bn.lv[slot].as_value();
                match v {
                    Some(vb) => Ok((Status::Ok, Some(vb.as_slice().to_vec()))),
                    None => Ok((Status::WarnNotExist, None)),
                }
            }
        }
    }

    pub fn put(
        &self,
        sessions: &SessionTable,
        token: Token,
        key: &[u8],
        value_ptr: *const u8,
        value_len: usize,
        align: usize,
        unique_restriction: bool,
    ) -> Result<Status> {
        if value_len > 0 && value_ptr.is_null() {
            return Err(YakushimaError::BadUsage("null value pointer with nonzero length"));
        }
        let _lock = self.write_lock.lock();
        let guard = unsafe { upin() };
        let layers = key::layer_count(key.len());
        let mut current_root = self.root.ld_acq(&guard);
        let mut depth = 0usize;
        loop {
            let (slice, length) = key::slice_at(key, depth);
            let border_shared = Self::descend_to_border(current_root, slice, length, &guard);
            let border = unsafe { border_shared.deref() };
            border.version.lock();
            border.version.set_inserting_deleting(true);
            // SAFETY: version lock held above
            let bn = unsafe { border.as_border_mut().unwrap() };
            let existing = bn.find_rank(slice, length);
            let is_last_layer = depth + 1 == layers;

            if !is_last_layer {
                match existing {
                    Some(rank) => {
                        let slot = bn.permutation().slot_at_rank(rank);
                        let next_shared = match &bn.lv[slot] {
                            LinkOrValue::NextLayer(next) => next.ld_acq(&guard),
                            _ => {
                                border.version.set_inserting_deleting(false);
                                border.version.unlock(false, false);
                                return Err(YakushimaError::Fatal(
                                    "expected next-layer link, found terminal value".into(),
                                ));
                            }
                        };
                        border.version.set_inserting_deleting(false);
                        border.version.unlock(false, false);
                        current_root = next_shared;
                        depth += 1;
                    }
                    None if bn.is_full() => {
                        self.split_border(border_shared, &guard);
                        border.version.set_inserting_deleting(false);
                        border.version.unlock(false, false);
                        // the split may have replaced the root; restart the whole descent
                        log::trace!(target: "yakushima::tree", "put retry from root after border split at depth {depth}");
                        current_root = self.root.ld_acq(&guard);
                        depth = 0;
                    }
                    None => {
                        let new_layer_atomic = Atomic::new_alloc(Node::new_border(true));
                        let new_layer_shared = new_layer_atomic.ld_rlx(&guard);
                        // invariant 6: a next-layer root's parent points back
                        // at the border slot that owns it.
                        unsafe {
                            new_layer_shared.deref().parent.store_shared(border_shared);
                        }
                        let rank = bn.lower_bound(slice, length);
                        unsafe {
                            bn.insert_at(rank, slice, length, LinkOrValue::NextLayer(new_layer_atomic));
                        }
                        border.version.set_inserting_deleting(false);
                        border.version.unlock(true, false);
                        current_root = new_layer_shared;
                        depth += 1;
                    }
                }
            } else {
                match existing {
                    Some(_) if unique_restriction => {
                        border.version.set_inserting_deleting(false);
                        border.version.unlock(false, false);
                        return Ok(Status::WarnUniqueRestriction);
                    }
                    Some(rank) => {
                        let slot = bn.permutation().slot_at_rank(rank);
                        let vb = unsafe { ValueBox::copy_from(value_ptr, value_len, align) };
                        let old = std::mem::replace(&mut bn.lv[slot], LinkOrValue::Value(vb));
                        border.version.set_inserting_deleting(false);
                        border.version.unlock(true, false);
                        if let LinkOrValue::Value(old_vb) = old {
                            sessions.retire_by_token(token, Garbage::new(move || drop(old_vb)));
                        }
                        return Ok(Status::WarnExist);
                    }
                    None if bn.is_full() => {
                        self.split_border(border_shared, &guard);
                        border.version.set_inserting_deleting(false);
                        border.version.unlock(false, false);
                        // the split may have replaced the root; restart the whole descent
                        log::trace!(target: "yakushima::tree", "put retry from root after border split at depth {depth}");
                        current_root = self.root.ld_acq(&guard);
                        depth = 0;
                    }
                    None => {
                        let rank = bn.lower_bound(slice, length);
                        let vb = unsafe { ValueBox::copy_from(value_ptr, value_len, align) };
                        unsafe {
                            bn.insert_at(rank, slice, length, LinkOrValue::Value(vb));
                        }
                        border.version.set_inserting_deleting(false);
                        border.version.unlock(true, false);
                        return Ok(Status::Ok);
                    }
                }
            }
        }
    }

    /// Splits a full border node in place: half its entries move to a
    /// freshly allocated right sibling, linked in via the sibling chain,
    /// and the median key is promoted into the parent interior node
    /// (allocating a new interior root if the border had none).
    ///
    /// Caller holds `write_lock` and the node's version lock; this
    /// function flips `splitting` for the duration so concurrent readers
    /// mid-descent can detect the change and restart from the tree root.
    fn split_border<'g>(&self, border_shared: Shared<'g, Node>, guard: &'g Guard) {
        let border = unsafe { border_shared.deref() };
        border.version.set_splitting(true);
        let bn = unsafe { border.as_border_mut().unwrap() };
        let perm = bn.permutation();
        let count = perm.count();
        let mid = count / 2;
        log::debug!(target: "yakushima::tree", "splitting full border ({count} entries) at rank {mid}");

        let mut right = Node::new_border(false);
        {
            // SAFETY: `right` is a local, not yet reachable from any other thread
            let right_bn_mut = unsafe { right.as_border_mut().unwrap() };
            let mut right_perm = crate::permutation::Permutation::empty();
            for rank in mid..count {
                let slot = perm.slot_at_rank(rank);
                let new_slot = rank - mid;
                right_bn_mut.key_slices[new_slot] = bn.key_slices[slot];
                right_bn_mut.key_lengths[new_slot] = bn.key_lengths[slot];
                right_bn_mut.lv[new_slot] = std::mem::replace(&mut bn.lv[slot], LinkOrValue::Empty);
                right_perm = right_perm.insert(new_slot, new_slot);
            }
            unsafe { right_bn_mut.set_permutation(right_perm) };
        }
        let median_slice = right.as_border().unwrap().key_slices[0];
        let median_length = right.as_border().unwrap().key_lengths[0];

        let mut left_perm = crate::permutation::Permutation::empty();
        for rank in 0..mid {
            let slot = perm.slot_at_rank(rank);
            left_perm = left_perm.insert(rank, slot);
        }
        unsafe { bn.set_permutation(left_perm) };

        let right_atomic = Atomic::new_alloc(right);
        let right_shared = right_atomic.ld_rlx(guard);

        // Every moved entry that points to a next-layer root must be
        // re-parented to the new right border (invariant 6).
        unsafe {
            let right_bn = right_shared.deref().as_border().unwrap();
            for lv in right_bn.lv.iter() {
                if let LinkOrValue::NextLayer(next) = lv {
                    next.ld_acq(guard).deref().parent.store_shared(right_shared);
                }
            }
        }

        let old_next = bn.next.ld_acq(guard);
        unsafe {
            let right_bn = right_shared.deref().as_border().unwrap();
            right_bn.next.store_shared(old_next);
            right_bn.prev.store_shared(border_shared);
            if !old_next.is_null() {
                old_next.deref().as_border().unwrap().prev.store_shared(right_shared);
            }
        }
        bn.next.store_shared(right_shared);

        self.insert_into_parent(border_shared, right_atomic, (median_slice, median_length), guard);
        border.version.set_splitting(false);
        log::debug!(target: "yakushima::tree", "border split complete, median promoted to parent");
    }

    /// Promotes `(sep, right)` into `left`'s parent, splitting the parent
    /// first if it is already full, and recursing up the parent chain as
    /// far as necessary. `left` may itself be a border or an interior
    /// node — the promotion logic is identical either way.
    fn insert_into_parent<'g>(
        &self,
        left_shared: Shared<'g, Node>,
        right: Atomic<Node>,
        sep: (u64, u8),
        guard: &'g Guard,
    ) {
        let left = unsafe { left_shared.deref() };
        let parent_shared = left.parent.ld_acq(guard);
        if parent_shared.is_null() {
            let mut new_root = Node::new_interior(true);
            {
                let i = unsafe { new_root.as_interior_mut().unwrap() };
                i.keys.push(sep);
                i.children.push(Atomic::from(left_shared));
                i.children.push(right);
            }
            let new_root_atomic = Atomic::new_alloc(new_root);
            let new_root_shared = new_root_atomic.ld_rlx(guard);
            unsafe {
                left.parent.store_shared(new_root_shared);
                new_root_shared.deref().as_interior().unwrap().children[1]
                    .ld_acq(guard)
                    .deref()
                    .parent
                    .store_shared(new_root_shared);
            }
            self.root.store_shared(new_root_shared);
            return;
        }

        let parent = unsafe { parent_shared.deref() };
        if parent.is_border() {
            // `left` was the root of a next layer reached through a
            // border's link-or-value cell. Build a new interior over
            // (left, right) and rewrite the owning border's cell to point
            // at it instead, under the owning border's lock.
            parent.version.lock();
            let obn = unsafe { parent.as_border_mut().unwrap() };
            let slot_rank = obn
                .find_next_layer_rank(left_shared.as_raw() as usize, guard)
                .expect("owning border lost its next-layer slot");
            let slot = obn.slot_of_rank(slot_rank);

            let mut new_root = Node::new_interior(true);
            {
                let i = unsafe { new_root.as_interior_mut().unwrap() };
                i.keys.push(sep);
                i.children.push(Atomic::from(left_shared));
                i.children.push(right);
            }
            let new_root_atomic = Atomic::new_alloc(new_root);
            let new_root_shared = new_root_atomic.ld_rlx(guard);
            unsafe {
                left.parent.store_shared(new_root_shared);
                new_root_shared.deref().as_interior().unwrap().children[1]
                    .ld_acq(guard)
                    .deref()
                    .parent
                    .store_shared(new_root_shared);
                new_root_shared.deref().parent.store_shared(parent_shared);
            }
            obn.lv[slot] = LinkOrValue::NextLayer(new_root_atomic);
            parent.version.unlock(false, false);
            return;
        }

        parent.version.lock();
        let pi_full = unsafe { parent.as_interior().unwrap() }.is_full();
        if pi_full {
            parent.version.set_splitting(true);
            let (mid_sep, new_right) = self.split_interior(parent_shared, sep, right, guard);
            parent.version.set_splitting(false);
            parent.version.unlock(false, true);
            self.insert_into_parent(parent_shared, new_right, mid_sep, guard);
        } else {
            let pi = unsafe { parent.as_interior_mut().unwrap() };
            let insert_idx = pi.keys.as_slice().iter().position(|&k| k >= sep).unwrap_or(pi.keys.len());
            unsafe {
                pi.insert_at(insert_idx, sep, right);
                pi.children[insert_idx + 1].ld_acq(guard).deref().parent.store_shared(parent_shared);
            }
            parent.version.unlock(false, true);
        }
    }

    /// Splits a full interior node, folding in the pending `(sep, right)`
    /// insert that triggered the split. Returns the promoted median
    /// separator and the freshly allocated right interior sibling; the
    /// caller (`insert_into_parent`) is responsible for promoting that
    /// pair into the grandparent.
    fn split_interior<'g>(
        &self,
        node_shared: Shared<'g, Node>,
        pending_sep: (u64, u8),
        pending_right: Atomic<Node>,
        guard: &'g Guard,
    ) -> ((u64, u8), Atomic<Node>) {
        let node = unsafe { node_shared.deref() };
        let ni = unsafe { node.as_interior_mut().unwrap() };
        log::debug!(target: "yakushima::tree", "splitting full interior ({} keys)", ni.keys.len());

        let keys_before: Vec<(u64, u8)> = ni.keys.as_slice().to_vec();
        let mut children: Vec<Atomic<Node>> = Vec::with_capacity(ni.children.len());
        while !ni.children.is_empty() {
            children.push(ni.children.remove(0));
        }
        ni.keys.clear();

        let insert_idx = keys_before.iter().position(|&k| k >= pending_sep).unwrap_or(keys_before.len());
        let mut keys = keys_before;
        keys.insert(insert_idx, pending_sep);
        children.insert(insert_idx + 1, pending_right);

        let mid = keys.len() / 2;
        let mid_sep = keys[mid];

        let mut children = children.into_iter();
        for k in keys[..mid].iter() {
            ni.keys.push(*k);
        }
        for c in children.by_ref().take(mid + 1) {
            ni.children.push(c);
        }

        let mut right_node = Node::new_interior(false);
        {
            let ri = unsafe { right_node.as_interior_mut().unwrap() };
            for k in keys[mid + 1..].iter() {
                ri.keys.push(*k);
            }
            for c in children {
                ri.children.push(c);
            }
        }
        let right_atomic = Atomic::new_alloc(right_node);
        let right_shared = right_atomic.ld_rlx(guard);
        unsafe {
            let ri = right_shared.deref().as_interior().unwrap();
            for c in ri.children.as_slice() {
                c.ld_acq(guard).deref().parent.store_shared(right_shared);
            }
        }
        log::debug!(target: "yakushima::tree", "interior split complete, median promoted to grandparent");
        (mid_sep, right_atomic)
    }

    /// Unlinks a doomed border from the leaf sibling chain. Safe to call
    /// unconditionally under `write_lock`, which already serializes every
    /// structural mutation in this tree instance.
    fn unlink_border<'g>(border_shared: Shared<'g, Node>, guard: &'g Guard) {
        let border = unsafe { border_shared.deref() };
        let bn = unsafe { border.as_border().unwrap() };
        let prev = bn.prev.ld_acq(guard);
        let next = bn.next.ld_acq(guard);
        unsafe {
            if !prev.is_null() {
                prev.deref().as_border().unwrap().next.store_shared(next);
            }
            if !next.is_null() {
                next.deref().as_border().unwrap().prev.store_shared(prev);
            }
        }
    }

    /// Removes `child_shared` from `interior_shared`. When only one child
    /// would remain, the interior itself collapses: it is replaced by that
    /// remaining child in its own parent (or promoted to the layer root),
    /// marked deleted, and retired.
    fn delete_child_from_interior<'g>(
        &self,
        interior_shared: Shared<'g, Node>,
        child_shared: Shared<'g, Node>,
        guard: &'g Guard,
        sessions: &SessionTable,
        token: Token,
    ) {
        let interior = unsafe { interior_shared.deref() };
        interior.version.lock();
        let ii = unsafe { interior.as_interior_mut().unwrap() };
        let idx = ii
            .children
            .as_slice()
            .iter()
            .position(|c| c.ld_acq(guard).as_raw() == child_shared.as_raw())
            .expect("child not found under its recorded parent");

        if ii.children.len() > 2 {
            let sep_idx = if idx == 0 { 0 } else { idx - 1 };
            ii.children.remove(idx);
            ii.keys.remove(sep_idx);
            interior.version.unlock(false, true);
        } else {
            let remaining_idx = 1 - idx;
            let remaining_shared = ii.children[remaining_idx].ld_acq(guard);
            interior.version.set_deleted();
            interior.version.unlock(false, true);
            let grandparent = interior.parent.ld_acq(guard);
            let remaining_node = unsafe { remaining_shared.deref() };
            if grandparent.is_null() {
                remaining_node.parent.store_shared(Shared::null());
                remaining_node.version.set_root(true);
                self.root.store_shared(remaining_shared);
                log::debug!(target: "yakushima::tree", "interior collapsed to 1 child, promoted to layer root");
            } else {
                remaining_node.parent.store_shared(grandparent);
                self.delete_child_from_interior(grandparent, interior_shared, guard, sessions, token);
                log::debug!(target: "yakushima::tree", "interior collapsed to 1 child, re-parented to grandparent");
            }
            // `remaining_shared` survives, re-parented above; only the
            // collapsing interior's own allocation may be freed.
            retire_node_shallow(sessions, token, interior_shared);
        }
    }

    /// Walks up from a border that just became empty, collapsing it (and
    /// any ancestor that becomes childless as a result) out of the tree.
    /// A border that is itself a layer root is left in place, empty — it
    /// represents "this layer currently has no keys", which is valid.
    fn after_remove_collapse<'g>(
        &self,
        border_shared: Shared<'g, Node>,
        guard: &'g Guard,
        sessions: &SessionTable,
        token: Token,
    ) {
        let border = unsafe { border_shared.deref() };
        let bn = unsafe { border.as_border().unwrap() };
        if bn.len() > 0 {
            return;
        }
        let parent_shared = border.parent.ld_acq(guard);
        if parent_shared.is_null() {
            // the true layer root of a storage: stays as an empty root
            return;
        }
        log::debug!(target: "yakushima::tree", "collapsing emptied border out of the tree");
        Self::unlink_border(border_shared, guard);
        border.version.set_deleted();
        let parent = unsafe { parent_shared.deref() };
        if parent.is_border() {
            parent.version.lock();
            let pbn = unsafe { parent.as_border_mut().unwrap() };
            if let Some(rank) = pbn.find_next_layer_rank(border_shared.as_raw() as usize, guard) {
                let _ = unsafe { pbn.remove_at(rank) };
            }
            parent.version.set_inserting_deleting(false);
            parent.version.unlock(true, false);
            retire_node(sessions, token, border_shared);
            self.after_remove_collapse(parent_shared, guard, sessions, token);
        } else {
            self.delete_child_from_interior(parent_shared, border_shared, guard, sessions, token);
            retire_node(sessions, token, border_shared);
        }
    }

    pub fn remove(&self, sessions: &SessionTable, token: Token, key: &[u8]) -> Result<Status> {
        let _lock = self.write_lock.lock();
        let guard = unsafe { upin() };
        match self.find_border_retrying(key, &guard) {
            None => Ok(Status::WarnNotExist),
            Some((border_shared, rank)) => {
                let border = unsafe { border_shared.deref() };
                border.version.lock();
                border.version.set_inserting_deleting(true);
                let bn = unsafe { border.as_border_mut().unwrap() };
                let removed = unsafe { bn.remove_at(rank) };
                border.version.set_inserting_deleting(false);
                border.version.unlock(true, false);
                if let LinkOrValue::Value(vb) = removed {
                    sessions.retire_by_token(token, Garbage::new(move || drop(vb)));
                }
                self.after_remove_collapse(border_shared, &guard, sessions, token);
                Ok(Status::Ok)
            }
        }
    }

    /// Range scan over `[l, r]` (or unbounded per `ScanEndpoint::Inf`).
    /// Composite (multi-layer) keys are followed transparently: a border
    /// slot tagged `CONTINUES_TAG` recurses into the next layer, composing
    /// the full key from every layer's slice as it unwinds.
    pub fn scan(
        &self,
        l_key: &[u8],
        l_end: ScanEndpoint,
        r_key: &[u8],
        r_end: ScanEndpoint,
        max_size: usize,
        mut versions: Option<&mut Vec<ScanVersion>>,
    ) -> Result<(Status, Vec<(Vec<u8>, Vec<u8>)>)> {
        if (matches!(l_end, ScanEndpoint::Exclusive) || matches!(r_end, ScanEndpoint::Exclusive)) && l_key == r_key {
            return Err(YakushimaError::BadUsage("empty range: equal keys with an exclusive endpoint"));
        }
        let backoff = Backoff::new();
        loop {
            if let Some(v) = versions.as_deref_mut() {
                v.clear();
            }
            let guard = unsafe { upin() };
            let root = self.layer_root(&guard);
            let mut out = Vec::new();
            match Self::scan_layer(
                root,
                &[],
                l_key,
                l_end,
                r_key,
                r_end,
                max_size,
                &mut out,
                versions.as_deref_mut(),
                &guard,
            ) {
                Ok(status) => return Ok((status, out)),
                Err(RetryFromRoot) => {
                    log::trace!(target: "yakushima::tree", "scan retry from root: version changed mid-scan");
                    backoff.snooze();
                    continue;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_layer<'g>(
        layer_root: Shared<'g, Node>,
        prefix: &[u8],
        l_key: &[u8],
        l_end: ScanEndpoint,
        r_key: &[u8],
        r_end: ScanEndpoint,
        max_size: usize,
        out: &mut Vec<(Vec<u8>, Vec<u8>)>,
        mut versions: Option<&mut Vec<ScanVersion>>,
        guard: &'g Guard,
    ) -> std::result::Result<Status, RetryFromRoot> {
        if layer_root.is_null() {
            return Ok(Status::OkScanEnd);
        }
        let depth = prefix.len() / key::SLICE_LEN;
        let (l_slice, l_len) = if matches!(l_end, ScanEndpoint::Inf) {
            (0, 0)
        } else {
            key::slice_at(l_key, depth)
        };
        let mut cur = TreeInstance::descend_to_border(layer_root, l_slice, l_len, guard);
        loop {
            let node = unsafe { cur.deref() };
            let before = node.version.stable();
            let bn = node.as_border().ok_or(RetryFromRoot)?;
            let perm = bn.permutation();
            let mut local_out = Vec::new();
            let mut stop_status = None;
            for rank in 0..perm.count() {
                let slot = perm.slot_at_rank(rank);
                let k = (bn.key_slices[slot], bn.key_lengths[slot]);
                let continues = k.1 == CONTINUES_TAG;

                // A continuation slot that ties the left bound's own slice
                // at this depth, where the bound itself also continues
                // (i.e. `l_key` has further bytes at this depth too), can't
                // be resolved by comparing this layer's slice alone — some
                // of its sub-keys are `< l_key`, some aren't. Defer the
                // decision to the recursive sub-scan instead of filtering
                // here.
                let l_tie = !matches!(l_end, ScanEndpoint::Inf)
                    && continues
                    && k.0 == l_slice
                    && l_len == CONTINUES_TAG;
                if !l_tie {
                    if matches!(l_end, ScanEndpoint::Exclusive) && k <= (l_slice, l_len) {
                        continue;
                    }
                    if matches!(l_end, ScanEndpoint::Inclusive) && k < (l_slice, l_len) {
                        continue;
                    }
                }

                let mut r_tie = false;
                if !matches!(r_end, ScanEndpoint::Inf) {
                    let (r_slice, r_len) = key::slice_at(r_key, depth);
                    r_tie = continues && k.0 == r_slice && r_len == CONTINUES_TAG;
                    if !r_tie {
                        let over = match r_end {
                            ScanEndpoint::Inclusive => k > (r_slice, r_len),
                            ScanEndpoint::Exclusive => k >= (r_slice, r_len),
                            ScanEndpoint::Inf => false,
                        };
                        if over {
                            stop_status = Some(Status::OkScanEnd);
                            break;
                        }
                    }
                }

                if continues {
                    if let LinkOrValue::NextLayer(next) = &bn.lv[slot] {
                        let budget = max_size.saturating_sub(out.len() + local_out.len());
                        if budget == 0 {
                            stop_status = Some(Status::OkScanContinue);
                            break;
                        }
                        let mut prefix_ext = prefix.to_vec();
                        prefix_ext.extend_from_slice(&bn.key_slices[slot].to_be_bytes());
                        let next_shared = next.ld_acq(guard);
                        let sub_l_end = if l_tie { l_end } else { ScanEndpoint::Inf };
                        let sub_r_end = if r_tie { r_end } else { ScanEndpoint::Inf };
                        let sub_status = Self::scan_layer(
                            next_shared,
                            &prefix_ext,
                            l_key,
                            sub_l_end,
                            r_key,
                            sub_r_end,
                            budget,
                            &mut local_out,
                            versions.as_deref_mut(),
                            guard,
                        )?;
                        if matches!(sub_status, Status::OkScanContinue) {
                            stop_status = Some(Status::OkScanContinue);
                            break;
                        }
                    }
                } else if let Some(vb) = bn.lv[slot].as_value() {
                    let mut kb = prefix.to_vec();
                    let mut tail = bn.key_slices[slot].to_be_bytes().to_vec();
                    tail.truncate(k.1 as usize);
                    kb.extend_from_slice(&tail);
                    local_out.push((kb, vb.as_slice().to_vec()));
                    if out.len() + local_out.len() >= max_size {
                        stop_status = Some(Status::OkScanContinue);
                        break;
                    }
                }
            }
            let after = node.version.load();
            if before.vsplit() != after.vsplit() || after.is_deleted() {
                return Err(RetryFromRoot);
            }
            if before.vinsert_delete() != after.vinsert_delete() {
                // this border's slot set moved under us; drop what we
                // collected from it and re-scan the same border.
                continue;
            }
            out.extend(local_out);
            if let Some(v) = versions.as_deref_mut() {
                v.push(ScanVersion { node: node as *const Node, snapshot: after });
            }
            if let Some(status) = stop_status {
                return Ok(status);
            }
            let next = bn.next.ld_acq(guard);
            if next.is_null() {
                return Ok(Status::OkScanEnd);
            }
            cur = next;
        }
    }

    /// Replaces this tree's contents with an empty layer root, freeing
    /// the old subtree outright. Destroy is documented as the caller's
    /// exclusive responsibility (no concurrent reader/writer), matching
    /// the specification's DDL-is-serialized-by-the-caller contract, so
    /// reclamation here does not need to go through the epoch GC.
    pub fn destroy(&self) -> Status {
        let _lock = self.write_lock.lock();
        let guard = unsafe { upin() };
        let old = self.root.ld_acq(&guard);
        let fresh = Node::new_border(true);
        self.root.store_owned(Owned::new(fresh));
        if !old.is_null() {
            unsafe { Node::destroy_subtree(old, &guard) };
        }
        Status::OkDestroyAll
    }
}

impl Default for TreeInstance {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for TreeInstance {}
unsafe impl Sync for TreeInstance {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochManager;
    use std::sync::Arc;

    fn session_table() -> SessionTable {
        SessionTable::new(8, Arc::new(EpochManager::new()))
    }

    fn put_str(tree: &TreeInstance, sessions: &SessionTable, token: Token, key: &str, value: &str) -> Status {
        tree.put(sessions, token, key.as_bytes(), value.as_ptr(), value.len(), 1, false)
            .unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        assert_eq!(put_str(&tree, &sessions, s.token(), "a", "v1"), Status::Ok);
        let (status, value) = tree.get(b"a").unwrap();
        assert_eq!(status, Status::Ok);
        assert_eq!(value.unwrap(), b"v1");
    }

    #[test]
    fn get_missing_is_not_exist() {
        let tree = TreeInstance::new();
        let (status, value) = tree.get(b"missing").unwrap();
        assert_eq!(status, Status::WarnNotExist);
        assert!(value.is_none());
    }

    #[test]
    fn overwrite_without_unique_restriction_replaces_value() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        put_str(&tree, &sessions, s.token(), "k", "v1");
        assert_eq!(put_str(&tree, &sessions, s.token(), "k", "v2"), Status::WarnExist);
        let (_, value) = tree.get(b"k").unwrap();
        assert_eq!(value.unwrap(), b"v2");
    }

    #[test]
    fn unique_restriction_rejects_overwrite() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        assert_eq!(tree.put(&sessions, s.token(), b"k", b"v1".as_ptr(), 2, 1, true).unwrap(), Status::Ok);
        assert_eq!(
            tree.put(&sessions, s.token(), b"k", b"v2".as_ptr(), 2, 1, true).unwrap(),
            Status::WarnUniqueRestriction
        );
        let (_, value) = tree.get(b"k").unwrap();
        assert_eq!(value.unwrap(), b"v1");
    }

    #[test]
    fn remove_then_get_reports_not_exist() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        put_str(&tree, &sessions, s.token(), "k", "v");
        assert_eq!(tree.remove(&sessions, s.token(), b"k").unwrap(), Status::Ok);
        let (status, _) = tree.get(b"k").unwrap();
        assert_eq!(status, Status::WarnNotExist);
    }

    #[test]
    fn remove_missing_key_is_not_exist() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        assert_eq!(tree.remove(&sessions, s.token(), b"missing").unwrap(), Status::WarnNotExist);
    }

    #[test]
    fn scan_returns_keys_in_order() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        for k in ["c", "a", "b"] {
            put_str(&tree, &sessions, s.token(), k, k);
        }
        let (status, tuples) = tree.scan(b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX, None).unwrap();
        assert_eq!(status, Status::OkScanEnd);
        let keys: Vec<Vec<u8>> = tuples.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn border_split_preserves_all_keys_in_order() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        for i in 0u8..40 {
            let key = [i];
            tree.put(&sessions, s.token(), &key, key.as_ptr(), 1, 1, false).unwrap();
        }
        let (status, tuples) = tree.scan(b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX, None).unwrap();
        assert_eq!(status, Status::OkScanEnd);
        assert_eq!(tuples.len(), 40);
        for (i, (k, v)) in tuples.iter().enumerate() {
            assert_eq!(k, &vec![i as u8]);
            assert_eq!(v, &vec![i as u8]);
        }
    }

    #[test]
    fn forces_interior_split_with_many_single_byte_keys() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        // 200 distinct two-byte keys comfortably exceeds one border-split
        // generation (fanout 15) and forces an interior split too.
        let mut keys: Vec<[u8; 2]> = Vec::new();
        for hi in 0u8..10 {
            for lo in 0u8..20 {
                keys.push([hi, lo]);
            }
        }
        for k in &keys {
            tree.put(&sessions, s.token(), k, k.as_ptr(), 2, 1, false).unwrap();
        }
        let (status, tuples) = tree.scan(b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX, None).unwrap();
        assert_eq!(status, Status::OkScanEnd);
        assert_eq!(tuples.len(), keys.len());
        let mut sorted = keys.clone();
        sorted.sort();
        for (tuple, expected) in tuples.iter().zip(sorted.iter()) {
            assert_eq!(tuple.0, expected.to_vec());
        }
    }

    #[test]
    fn layered_keys_sharing_a_prefix_round_trip() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        let keys: Vec<Vec<u8>> = (0u8..16)
            .map(|i| std::iter::repeat(0u8).take(i as usize).collect())
            .collect();
        for (i, k) in keys.iter().enumerate() {
            let v = [i as u8];
            tree.put(&sessions, s.token(), k, v.as_ptr(), 1, 1, false).unwrap();
        }
        for (i, k) in keys.iter().enumerate() {
            let (status, value) = tree.get(k).unwrap();
            assert_eq!(status, Status::Ok, "key of length {i}");
            assert_eq!(value.unwrap(), vec![i as u8]);
        }
        let (status, tuples) = tree.scan(b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX, None).unwrap();
        assert_eq!(status, Status::OkScanEnd);
        assert_eq!(tuples.len(), keys.len());
        let mut lengths: Vec<usize> = tuples.iter().map(|(k, _)| k.len()).collect();
        let mut expected: Vec<usize> = keys.iter().map(|k| k.len()).collect();
        lengths.sort();
        expected.sort();
        assert_eq!(lengths, expected);
    }

    #[test]
    fn remove_collapses_emptied_border_without_breaking_scan() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        let keys: Vec<[u8; 1]> = (0u8..30).map(|i| [i]).collect();
        for k in &keys {
            tree.put(&sessions, s.token(), k, k.as_ptr(), 1, 1, false).unwrap();
        }
        for k in keys.iter().take(8) {
            assert_eq!(tree.remove(&sessions, s.token(), k).unwrap(), Status::Ok);
        }
        let (status, tuples) = tree.scan(b"", ScanEndpoint::Inf, b"", ScanEndpoint::Inf, usize::MAX, None).unwrap();
        assert_eq!(status, Status::OkScanEnd);
        assert_eq!(tuples.len(), 22);
        let got: Vec<u8> = tuples.iter().map(|(k, _)| k[0]).collect();
        let expected: Vec<u8> = (8u8..30).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn empty_exclusive_exclusive_range_is_bad_usage() {
        let tree = TreeInstance::new();
        let err = tree
            .scan(b"same", ScanEndpoint::Exclusive, b"same", ScanEndpoint::Exclusive, usize::MAX, None)
            .unwrap_err();
        assert!(matches!(err, YakushimaError::BadUsage(_)));
    }

    #[test]
    fn empty_mixed_inclusive_exclusive_range_is_also_bad_usage() {
        let tree = TreeInstance::new();
        let err = tree
            .scan(b"same", ScanEndpoint::Exclusive, b"same", ScanEndpoint::Inclusive, usize::MAX, None)
            .unwrap_err();
        assert!(matches!(err, YakushimaError::BadUsage(_)));
        let err = tree
            .scan(b"same", ScanEndpoint::Inclusive, b"same", ScanEndpoint::Exclusive, usize::MAX, None)
            .unwrap_err();
        assert!(matches!(err, YakushimaError::BadUsage(_)));
    }

    #[test]
    fn destroy_resets_to_empty_tree() {
        let tree = TreeInstance::new();
        let sessions = session_table();
        let s = sessions.enter().unwrap();
        put_str(&tree, &sessions, s.token(), "a", "v");
        assert_eq!(tree.destroy(), Status::OkDestroyAll);
        let (status, _) = tree.get(b"a").unwrap();
        assert_eq!(status, Status::WarnNotExist);
    }
}
