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

//! The contract between the selector and its host task runtime.

use std::io;

use crate::Events;

/// The value a suspended task is resumed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// The logical events that fired for the task's wait.
    Ready(Events),

    /// The task is resumed without events: either it is being cancelled, or
    /// it was queued for deferred resumption and the queue flushed. Wait
    /// primitives report this as an empty event set without touching the
    /// kernel.
    Cancel,
}

/// Host-runtime collaborator: task transfer, the deferred-resumption queue,
/// and child-status reaping.
///
/// One selector instance belongs to one runtime thread. Apart from waking a
/// blocked [`select`](crate::Selector::select) through a
/// [`Waker`](crate::Waker), no part of this contract is called concurrently.
pub trait Runtime {
    /// Handle to a suspended task, good for transferring control back into
    /// it.
    type Task: Clone;

    /// Suspend the calling task, transferring control to the host loop.
    /// Returns the value the task is later resumed with.
    fn suspend(&self) -> Resume;

    /// Transfer control to `task`, resuming it with `value`. Returns once
    /// the task suspends again or completes.
    fn resume(&self, task: &Self::Task, value: Resume);

    /// Queue `task` for deferred resumption by the next [`flush`].
    ///
    /// [`flush`]: Runtime::flush
    fn push(&self, task: Self::Task);

    /// Resume every queued task in order, each with [`Resume::Cancel`].
    /// Returns how many ran.
    fn flush(&self) -> usize;

    /// Whether tasks are queued for deferred resumption.
    fn is_ready(&self) -> bool;

    /// Reap the exit status of a terminated child without blocking.
    fn process_status(&self, pid: libc::pid_t) -> io::Result<i32>;

    /// Run `body` with the runtime's scheduler lock, if any, released. The
    /// selector calls this around blocking kernel waits so other threads can
    /// keep scheduling while it sleeps.
    fn blocking<T>(&self, body: impl FnOnce() -> T) -> T {
        body()
    }
}
