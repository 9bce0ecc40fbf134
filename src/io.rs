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

//! Buffered nonblocking I/O loops shared by the backends.
//!
//! The loops stitch nonblocking `read`/`write` calls to the backend's wait
//! primitive: a retry-class error parks the task until the descriptor is
//! ready again, anything else surfaces as the result.

use std::io;
use std::os::unix::io::RawFd;

use crate::Events;

/// Restores a descriptor's file status flags when dropped.
///
/// The loops put the descriptor into nonblocking mode for their duration;
/// the guard puts the original flags back on every exit path.
struct Nonblock {
    fd: RawFd,
    flags: libc::c_int,
}

impl Nonblock {
    fn set(fd: RawFd) -> io::Result<Nonblock> {
        let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
        if flags & libc::O_NONBLOCK == 0 {
            syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
        }
        Ok(Nonblock { fd, flags })
    }
}

impl Drop for Nonblock {
    fn drop(&mut self) {
        if self.flags & libc::O_NONBLOCK == 0 {
            let _ = syscall!(fcntl(self.fd, libc::F_SETFL, self.flags));
        }
    }
}

fn try_again(error: &io::Error) -> bool {
    error.raw_os_error().map_or(false, |errno| {
        errno == libc::EAGAIN || errno == libc::EWOULDBLOCK || errno == libc::EINTR
    })
}

/// Read `length` bytes into `buffer` starting at `offset`, calling `wait`
/// with `READABLE` whenever the descriptor has nothing to offer yet.
///
/// Stops early at end-of-file. Returns the cumulative byte count.
pub(crate) fn read_into<W>(
    fd: RawFd,
    buffer: &mut [u8],
    mut length: usize,
    mut offset: usize,
    mut wait: W,
) -> io::Result<usize>
where
    W: FnMut(Events) -> io::Result<Events>,
{
    let _guard = Nonblock::set(fd)?;
    let mut total = 0;

    loop {
        let available = buffer.len().saturating_sub(offset);
        let chunk = length.min(available);
        if chunk == 0 {
            break;
        }

        match syscall!(read(
            fd,
            buffer[offset..].as_mut_ptr() as *mut libc::c_void,
            chunk,
        )) {
            Ok(0) => break,
            Ok(count) => {
                let count = count as usize;
                total += count;
                offset += count;
                length -= count;
            }
            Err(error) if try_again(&error) => {
                wait(Events::READABLE)?;
            }
            Err(error) => return Err(error),
        }
    }

    Ok(total)
}

/// Write `length` bytes from `buffer` starting at `offset`, calling `wait`
/// with `WRITABLE` whenever the descriptor cannot take more yet.
///
/// A zero-length write result is terminal, like end-of-file on the read
/// side. Returns the cumulative byte count.
///
/// # Panics
/// When `length` exceeds the buffer size; that is a programmer error, not an
/// I/O condition.
pub(crate) fn write_from<W>(
    fd: RawFd,
    buffer: &[u8],
    mut length: usize,
    mut offset: usize,
    mut wait: W,
) -> io::Result<usize>
where
    W: FnMut(Events) -> io::Result<Events>,
{
    assert!(length <= buffer.len(), "length exceeds size of buffer");

    let _guard = Nonblock::set(fd)?;
    let mut total = 0;

    loop {
        let available = buffer.len().saturating_sub(offset);
        let chunk = length.min(available);
        if chunk == 0 {
            break;
        }

        match syscall!(write(
            fd,
            buffer[offset..].as_ptr() as *const libc::c_void,
            chunk,
        )) {
            Ok(0) => break,
            Ok(count) => {
                let count = count as usize;
                total += count;
                offset += count;
                length -= count;
            }
            Err(error) if try_again(&error) => {
                wait(Events::WRITABLE)?;
            }
            Err(error) => return Err(error),
        }
    }

    Ok(total)
}
