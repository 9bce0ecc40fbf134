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

//! Readiness multiplexing for cooperatively scheduled tasks.
//!
//! A task that has to wait for I/O readiness, a child process exit, or an
//! elapsed duration suspends itself through its host [`Runtime`]; the
//! selector parks it against the kernel readiness primitive (epoll on Linux,
//! kqueue on the BSDs and macOS), keeps running unrelated tasks, and later
//! resumes it with the events that actually fired.
//!
//! The host runtime stays in charge of task switching. The selector only
//! needs the small contract in [`Runtime`]: transferring control in and out
//! of tasks, a deferred-resumption queue, and child-status reaping.
//!
//! # Example
//!
//! ```ignore
//! // Inside a task, with the selector shared from the host loop:
//! let fired = selector.io_wait(&task, &socket, Events::READABLE)?;
//!
//! // In the host loop, whenever no task is runnable:
//! selector.select(Some(Duration::from_millis(10)))?;
//! ```

use bitflags::bitflags;

macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

mod descriptors;
mod io;
mod list;
pub mod runtime;
mod waiter;

#[cfg(test)]
mod harness;

pub use crate::runtime::{Resume, Runtime};

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        mod interrupt;
        pub use crate::epoll::{Selector, Waker};
    } else if #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly",
    ))] {
        mod kqueue;
        pub use crate::kqueue::{Selector, Waker};
    }
}

bitflags! {
    /// Logical readiness events, independent of the kernel's representation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Events: u32 {
        /// The descriptor has data, an end-of-file, or an error condition to
        /// read.
        const READABLE = 0b0001;

        /// Urgent out-of-band data is available.
        const PRIORITY = 0b0010;

        /// The descriptor accepts writes.
        const WRITABLE = 0b0100;

        /// A watched process exited. Only reported by the kqueue backend;
        /// the epoll backend observes process exits as `READABLE` on a
        /// process-handle descriptor.
        const EXIT     = 0b1000;
    }
}

impl Default for Events {
    fn default() -> Events {
        Events::empty()
    }
}
