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

//! Per-wait bookkeeping and the resumption walk shared by the backends.

use crate::list::List;
use crate::runtime::{Resume, Runtime};
use crate::Events;

/// One suspended task parked on one descriptor.
///
/// Lives in the wait primitive's stack frame; the frame stays suspended, not
/// unwound, for the duration of the wait, so the embedded node has a stable
/// address. Dropping the waiter unlinks it, which covers every exit path out
/// of a wait: normal resumption, cancellation, and unwinding.
#[repr(C)]
pub(crate) struct Waiter<T> {
    pub(crate) node: List,
    pub(crate) events: Events,
    pub(crate) task: T,
}

impl<T> Waiter<T> {
    pub(crate) fn new(task: T, events: Events) -> Waiter<T> {
        Waiter {
            node: List::new(),
            events,
            task,
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        if self.node.is_linked() {
            // SAFETY: the node is linked and about to disappear with this
            // frame.
            unsafe { List::pop(&mut self.node) };
        }
    }
}

/// Resume every waiter in `list` whose requested events intersect `fired`,
/// oldest first, passing each the intersection it matched.
///
/// Each resumed task runs inline to its next suspension point and may freely
/// unlink its own waiter or relink neighbours; a marker node spliced next to
/// the current entry pins the cursor against those mutations.
///
/// # Safety
/// `list` must head a list of `Waiter<R::Task>` nodes owned by suspended
/// frames, and the caller must not hold references into the list across the
/// call.
pub(crate) unsafe fn resume_matching<R: Runtime>(runtime: &R, list: *mut List, fired: Events) {
    let saved = List::new();
    let saved_ptr = &saved as *const List as *mut List;

    let mut node = if (*list).is_empty() {
        list
    } else {
        (*list).tail_ptr()
    };

    while node != list {
        let waiter = node as *mut Waiter<R::Task>;
        let matching = (*waiter).events & fired;

        if matching.is_empty() {
            node = (*node).tail_ptr();
            continue;
        }

        (*node).prepend(saved_ptr);

        let task = (*waiter).task.clone();
        runtime.resume(&task, Resume::Ready(matching));

        // The resumed task has unlinked its waiter by now; the marker's tail
        // neighbour is the next entry to visit.
        node = (*saved_ptr).tail_ptr();
        List::pop(saved_ptr);
    }
}

/// Union of the events requested by every waiter currently in `list`.
///
/// # Safety
/// As for [`resume_matching`].
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) unsafe fn requested_union<T>(list: *mut List) -> Events {
    let mut union = Events::empty();

    if (*list).is_empty() {
        return union;
    }

    let mut node = (*list).tail_ptr();
    while node != list {
        let waiter = node as *mut Waiter<T>;
        union |= (*waiter).events;
        node = (*node).tail_ptr();
    }

    union
}
