// Copyright 2017 Gilad Naaman
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Intrusive circular doubly-linked list.
//!
//! One node type serves both as the waiter-list head embedded in a
//! descriptor record and as the entries threaded through it. Links are raw
//! pointers: waiter nodes live in the frames of suspended tasks and list
//! heads live in boxed descriptor records, so every linked node has a stable
//! address for as long as it stays linked.

use std::cell::Cell;
use std::ptr;

/// A node in a circular doubly-linked list.
///
/// `head` points at the neighbour toward the head of the list (where nodes
/// are inserted), `tail` at the neighbour toward the tail (where iteration
/// starts). A list head points at itself when empty; the pointers of an
/// unlinked node are null.
#[derive(Debug)]
pub(crate) struct List {
    head: Cell<*mut List>,
    tail: Cell<*mut List>,
}

impl Default for List {
    fn default() -> List {
        List::new()
    }
}

impl List {
    pub(crate) const fn new() -> List {
        List {
            head: Cell::new(ptr::null_mut()),
            tail: Cell::new(ptr::null_mut()),
        }
    }

    fn as_ptr(&self) -> *mut List {
        self as *const List as *mut List
    }

    pub(crate) fn is_linked(&self) -> bool {
        !self.head.get().is_null()
    }

    pub(crate) fn is_empty(&self) -> bool {
        let head = self.head.get();
        head.is_null() || head == self.as_ptr()
    }

    /// The node at the tail of the list, where iteration starts. Only
    /// meaningful on a non-empty list head.
    pub(crate) fn tail_ptr(&self) -> *mut List {
        self.tail.get()
    }

    /// Insert `node` adjacent to `self`, on the head side.
    ///
    /// With `self` a list head this places `node` at the head of the list,
    /// so tail-to-head iteration reaches the oldest entry first. Dispatch
    /// also calls it with an arbitrary entry as the anchor, to pin an
    /// iteration cursor next to the entry it is about to resume.
    ///
    /// # Safety
    /// `node` must be unlinked, and both nodes must stay at stable addresses
    /// while linked.
    pub(crate) unsafe fn prepend(&self, node: *mut List) {
        // Heads self-initialize lazily so the records that embed them can be
        // constructed with `Default`.
        if !self.is_linked() {
            self.head.set(self.as_ptr());
            self.tail.set(self.as_ptr());
        }

        debug_assert!(!(*node).is_linked());

        let head = self.head.get();
        (*node).head.set(head);
        (*node).tail.set(self.as_ptr());
        (*head).tail.set(node);
        self.head.set(node);
    }

    /// Unlink `node` from whatever list holds it and null its pointers.
    ///
    /// # Safety
    /// `node` must be linked.
    pub(crate) unsafe fn pop(node: *mut List) {
        debug_assert!((*node).is_linked());

        let head = (*node).head.get();
        let tail = (*node).tail.get();
        (*tail).head.set(head);
        (*head).tail.set(tail);
        (*node).head.set(ptr::null_mut());
        (*node).tail.set(ptr::null_mut());
    }
}
