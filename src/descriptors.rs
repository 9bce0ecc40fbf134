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

//! Sparse, index-addressed storage for per-descriptor records.

/// Maps a nonnegative descriptor id (a file descriptor, or a pid on the
/// kqueue backend's process waits) to a record of type `T`.
///
/// Slots materialize lazily on first lookup and live for the life of the
/// selector. Records are boxed so their addresses stay stable while the
/// slot table grows; the intrusive list heads embedded in them (and the
/// kqueue `udata` pointers) rely on that.
pub(crate) struct Descriptors<T> {
    slots: Vec<Option<Box<T>>>,
}

impl<T: Default> Descriptors<T> {
    pub(crate) fn new() -> Descriptors<T> {
        Descriptors { slots: Vec::new() }
    }

    /// The record for `index`, materializing its slot if needed.
    pub(crate) fn lookup(&mut self, index: usize) -> &mut T {
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index].get_or_insert_with(Box::default)
    }

    /// The record for `index`, if its slot has ever been used.
    pub(crate) fn get(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(|slot| slot.as_deref_mut())
    }
}
