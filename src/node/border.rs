// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Border (leaf) nodes: one trie layer's sorted array of key slices paired
//! with either a value or a pointer into the next layer, plus sibling
//! links for range scans.

use super::{LinkOrValue, Node};
use crate::permutation::Permutation;
use crate::sync::atm::Atomic;
use crate::FANOUT;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct BorderNode {
    pub key_slices: [u64; FANOUT],
    pub key_lengths: [u8; FANOUT],
    pub lv: Vec<LinkOrValue>,
    permutation: AtomicU64,
    pub next: Atomic<Node>,
    pub prev: Atomic<Node>,
}

impl BorderNode {
    pub fn new() -> Self {
        let mut lv = Vec::with_capacity(FANOUT);
        lv.resize_with(FANOUT, || LinkOrValue::Empty);
        Self {
            key_slices: [0; FANOUT],
            key_lengths: [0; FANOUT],
            lv,
            permutation: AtomicU64::new(Permutation::empty().into_raw()),
            next: Atomic::null(),
            prev: Atomic::null(),
        }
    }
    pub fn permutation(&self) -> Permutation {
        Permutation::from_raw(self.permutation.load(Ordering::Acquire))
    }
    /// # Safety
    /// The caller must hold the owning node's version lock.
    pub unsafe fn set_permutation(&self, p: Permutation) {
        self.permutation.store(p.into_raw(), Ordering::Release);
    }
    pub fn len(&self) -> usize {
        self.permutation().count()
    }
    pub fn is_full(&self) -> bool {
        self.len() == FANOUT
    }
    /// Finds the sorted rank whose `(slice, length)` matches, if any.
    pub fn find_rank(&self, slice: u64, length: u8) -> Option<usize> {
        let perm = self.permutation();
        (0..perm.count()).find(|&rank| {
            let slot = perm.slot_at_rank(rank);
            self.key_slices[slot] == slice && self.key_lengths[slot] == length
        })
    }
    /// Finds the sorted insertion point for `(slice, length)` when no exact
    /// match exists: the first rank whose key compares greater.
    pub fn lower_bound(&self, slice: u64, length: u8) -> usize {
        let perm = self.permutation();
        let key = (slice, length);
        for rank in 0..perm.count() {
            let slot = perm.slot_at_rank(rank);
            if (self.key_slices[slot], self.key_lengths[slot]) >= key {
                return rank;
            }
        }
        perm.count()
    }
    /// # Safety
    /// The caller must hold the owning node's version lock and the node
    /// must not already be full.
    pub unsafe fn insert_at(&mut self, rank: usize, slice: u64, length: u8, lv: LinkOrValue) {
        let perm = self.permutation();
        let slot = perm.empty_slot();
        self.key_slices[slot] = slice;
        self.key_lengths[slot] = length;
        self.lv[slot] = lv;
        self.set_permutation(perm.insert(rank, slot));
    }
    /// # Safety
    /// The caller must hold the owning node's version lock.
    pub unsafe fn remove_at(&mut self, rank: usize) -> LinkOrValue {
        let perm = self.permutation();
        let slot = perm.slot_at_rank(rank);
        self.set_permutation(perm.delete_rank(rank));
        std::mem::replace(&mut self.lv[slot], LinkOrValue::Empty)
    }
    /// Sorted rank of the live slot whose `lv` cell is a next-layer pointer
    /// targeting the node at address `raw` (a `Shared::as_raw()` value).
    /// Used when a next-layer root splits and needs to rewrite its owning
    /// border's link-or-value cell in place.
    pub fn find_next_layer_rank(&self, raw: usize, guard: &crate::sync::atm::Guard) -> Option<usize> {
        let perm = self.permutation();
        (0..perm.count()).find(|&rank| {
            let slot = perm.slot_at_rank(rank);
            match &self.lv[slot] {
                LinkOrValue::NextLayer(next) => next.ld_acq(guard).as_raw() as usize == raw,
                _ => false,
            }
        })
    }
    /// Physical slot index for sorted `rank`.
    pub fn slot_of_rank(&self, rank: usize) -> usize {
        self.permutation().slot_at_rank(rank)
    }
}

impl Default for BorderNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_sorted_order() {
        let mut n = BorderNode::new();
        unsafe {
            n.insert_at(0, 30, 1, LinkOrValue::Empty);
            let r = n.lower_bound(10, 1);
            n.insert_at(r, 10, 1, LinkOrValue::Empty);
            let r = n.lower_bound(20, 1);
            n.insert_at(r, 20, 1, LinkOrValue::Empty);
        }
        let perm = n.permutation();
        let ordered: Vec<u64> = (0..perm.count())
            .map(|rank| n.key_slices[perm.slot_at_rank(rank)])
            .collect();
        assert_eq!(ordered, vec![10, 20, 30]);
    }

    #[test]
    fn find_rank_locates_exact_key() {
        let mut n = BorderNode::new();
        unsafe {
            n.insert_at(0, 5, 1, LinkOrValue::Empty);
        }
        assert_eq!(n.find_rank(5, 1), Some(0));
        assert_eq!(n.find_rank(6, 1), None);
    }

    #[test]
    fn remove_at_drops_mapping() {
        let mut n = BorderNode::new();
        unsafe {
            n.insert_at(0, 5, 1, LinkOrValue::Empty);
            n.remove_at(0);
        }
        assert_eq!(n.len(), 0);
        assert_eq!(n.find_rank(5, 1), None);
    }
}
