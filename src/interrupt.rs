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

//! Out-of-band wakeup channel for a selector blocked in the kernel.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// A single-reader, any-writer signalling primitive, exposed to the selector
/// as a readable descriptor.
///
/// Backed by an eventfd; the kqueue backend has no need for it because
/// `EVFILT_USER` serves the same purpose there.
#[derive(Debug)]
pub(crate) struct Interrupt {
    fd: OwnedFd,
}

impl Interrupt {
    pub(crate) fn open() -> io::Result<Interrupt> {
        let fd = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
        // SAFETY: eventfd returned a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Interrupt { fd })
    }

    /// Wake the reader. Callable from any thread.
    pub(crate) fn signal(&self) {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        let _ = syscall!(write(
            self.fd.as_raw_fd(),
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
        ));
    }

    /// Drain a delivered signal so it is not reported again.
    pub(crate) fn clear(&self) {
        let mut buf = [0u8; 8];
        let _ = syscall!(read(
            self.fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        ));
    }
}

impl AsRawFd for Interrupt {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
