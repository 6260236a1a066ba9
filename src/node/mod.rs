// Copyright (c) 2026 the yakushima authors
//
// Licensed under the Apache License, Version 2.0 or the MIT license,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Node layout: a tagged union of [`border::BorderNode`] and
//! [`interior::InteriorNode`], unified behind one [`Node`] so descent code
//! doesn't need virtual dispatch. Every node embeds its own
//! [`VersionWord`](crate::version::VersionWord) and a raw parent pointer
//! used to walk back up during split propagation.
//!
//! `body` is wrapped in `UnsafeCell` because readers hold only a shared
//! `&Node` (reached through a `crossbeam_epoch::Shared`) while a writer
//! holding the version lock mutates in place; the version word, not the
//! borrow checker, is what actually serializes access.

use crate::sync::atm::{Atomic, Guard, Pointer, Shared};
use crate::value::ValueBox;
use crate::version::VersionWord;
use border::BorderNode;
use core::cell::UnsafeCell;
use interior::InteriorNode;

pub mod border;
pub mod interior;

/// What a border slot's link-or-value cell holds: either a terminal value,
/// or a pointer to the next trie layer's root node.
pub enum LinkOrValue {
    Empty,
    Value(ValueBox),
    NextLayer(Atomic<Node>),
}

impl LinkOrValue {
    pub fn as_value(&self) -> Option<&ValueBox> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
    pub fn is_next_layer(&self) -> bool {
        matches!(self, Self::NextLayer(_))
    }
}

pub enum NodeBody {
    Border(BorderNode),
    Interior(InteriorNode),
}

pub struct Node {
    pub version: VersionWord,
    pub parent: Atomic<Node>,
    body: UnsafeCell<NodeBody>,
}

impl Node {
    pub fn new_border(is_root: bool) -> Self {
        Self {
            version: VersionWord::new_border(is_root),
            parent: Atomic::null(),
            body: UnsafeCell::new(NodeBody::Border(BorderNode::new())),
        }
    }
    pub fn new_interior(is_root: bool) -> Self {
        Self {
            version: VersionWord::new_interior(is_root),
            parent: Atomic::null(),
            body: UnsafeCell::new(NodeBody::Interior(InteriorNode::new())),
        }
    }
    pub fn is_border(&self) -> bool {
        matches!(unsafe { &*self.body.get() }, NodeBody::Border(_))
    }
    pub fn as_border(&self) -> Option<&BorderNode> {
        match unsafe { &*self.body.get() } {
            NodeBody::Border(b) => Some(b),
            NodeBody::Interior(_) => None,
        }
    }
    /// # Safety
    /// The caller must hold `self.version`'s lock, matching every other
    /// node mutation in this crate's write path.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_border_mut(&self) -> Option<&mut BorderNode> {
        match &mut *self.body.get() {
            NodeBody::Border(b) => Some(b),
            NodeBody::Interior(_) => None,
        }
    }
    pub fn as_interior(&self) -> Option<&InteriorNode> {
        match unsafe { &*self.body.get() } {
            NodeBody::Interior(i) => Some(i),
            NodeBody::Border(_) => None,
        }
    }
    /// # Safety
    /// The caller must hold `self.version`'s lock.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_interior_mut(&self) -> Option<&mut InteriorNode> {
        match &mut *self.body.get() {
            NodeBody::Interior(i) => Some(i),
            NodeBody::Border(_) => None,
        }
    }
    /// Recursively frees `shared` and everything reachable from it (child
    /// subtrees, next-layer subtrees behind border slots, value boxes).
    ///
    /// # Safety
    /// No reader or writer may still be able to reach any node in this
    /// subtree. [`crate::tree::TreeInstance::destroy`] upholds this by
    /// holding the tree's write lock for the duration and treating destroy
    /// as exclusive, matching the specification's "DDL is the caller's
    /// contract" stance on concurrent structural operations.
    pub unsafe fn destroy_subtree(shared: Shared<'_, Node>, guard: &Guard) {
        if shared.is_null() {
            return;
        }
        let raw = shared.as_raw() as usize;
        let node = shared.deref();
        match &*node.body.get() {
            NodeBody::Border(b) => {
                for lv in b.lv.iter() {
                    if let LinkOrValue::NextLayer(next) = lv {
                        Self::destroy_subtree(next.ld_acq(guard), guard);
                    }
                }
            }
            NodeBody::Interior(i) => {
                for c in i.children.as_slice() {
                    Self::destroy_subtree(c.ld_acq(guard), guard);
                }
            }
        }
        drop(Shared::<Node>::from_usize(raw).into_owned());
    }
}

unsafe impl Send for Node {}
unsafe impl Sync for Node {}
