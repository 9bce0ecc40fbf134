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

//! Kqueue-backed selector (macOS, iOS, FreeBSD, DragonFly BSD).

use std::cell::RefCell;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::descriptors::Descriptors;
use crate::list::List;
use crate::runtime::{Resume, Runtime};
use crate::waiter::{resume_matching, Waiter};
use crate::Events;

const MAX_EVENTS: usize = 64;

/// Per-descriptor record: the waiter list and the events reported by the
/// last kernel poll that have not been delivered yet. Filters are armed
/// one-shot per waiter, so there is no armed mask to reconcile.
#[derive(Default)]
struct Record {
    waiters: List,
    ready: Events,
}

struct Wake {
    kq: OwnedFd,
    blocked: AtomicBool,
}

impl Wake {
    fn wakeup(&self) -> bool {
        if !self.blocked.load(Ordering::SeqCst) {
            return false;
        }

        // Arming and triggering stay two separate kevent calls; FreeBSD
        // rejects the combined form.
        let mut trigger: libc::kevent = unsafe { mem::zeroed() };
        trigger.filter = libc::EVFILT_USER;
        trigger.flags = libc::EV_ADD | libc::EV_CLEAR;

        if let Err(error) = syscall!(kevent(
            self.kq.as_raw_fd(),
            &trigger,
            1,
            ptr::null_mut(),
            0,
            ptr::null(),
        )) {
            log::debug!("wakeup: arming EVFILT_USER failed: {}", error);
            return false;
        }

        trigger.flags = 0;
        trigger.fflags = libc::NOTE_TRIGGER;

        match syscall!(kevent(
            self.kq.as_raw_fd(),
            &trigger,
            1,
            ptr::null_mut(),
            0,
            ptr::null(),
        )) {
            Ok(_) => true,
            Err(error) => {
                log::debug!("wakeup: NOTE_TRIGGER failed: {}", error);
                false
            }
        }
    }
}

/// Cloneable cross-thread handle that can interrupt a blocking
/// [`Selector::select`]. The only part of the selector that may be used from
/// another thread.
#[derive(Clone)]
pub struct Waker {
    wake: Arc<Wake>,
}

impl Waker {
    /// Trigger the user-event filter if the selector is blocked in the
    /// kernel. Returns whether a wakeup was delivered.
    pub fn wakeup(&self) -> bool {
        self.wake.wakeup()
    }
}

/// Readiness selector multiplexing suspended tasks over one kqueue instance.
pub struct Selector<R: Runtime> {
    runtime: R,
    wake: Arc<Wake>,
    descriptors: RefCell<Descriptors<Record>>,
}

impl<R: Runtime> Selector<R> {
    pub fn new(runtime: R) -> io::Result<Selector<R>> {
        let kq = syscall!(kqueue())?;
        // SAFETY: kqueue returned a fresh descriptor we now own.
        let kq = unsafe { OwnedFd::from_raw_fd(kq) };
        syscall!(ioctl(kq.as_raw_fd(), libc::FIOCLEX))?;

        log::trace!("new: kqueue_fd={}", kq.as_raw_fd());

        Ok(Selector {
            runtime,
            wake: Arc::new(Wake {
                kq,
                blocked: AtomicBool::new(false),
            }),
            descriptors: RefCell::new(Descriptors::new()),
        })
    }

    /// The host runtime this selector transfers through.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// A cross-thread wakeup handle.
    pub fn waker(&self) -> Waker {
        Waker {
            wake: self.wake.clone(),
        }
    }

    /// Transfer control to the host loop, returning the calling task's
    /// resume value.
    pub fn transfer(&self) -> Resume {
        self.runtime.suspend()
    }

    /// Resume `task` with `value`.
    pub fn resume(&self, task: &R::Task, value: Resume) {
        self.runtime.resume(task, value);
    }

    /// Resume `task` with the cancellation sentinel; its wait primitive
    /// returns empty-handed and unlinks itself.
    pub fn cancel(&self, task: &R::Task) {
        self.runtime.resume(task, Resume::Cancel);
    }

    /// Queue the calling `task` for deferred resumption and give up control.
    pub fn yield_now(&self, task: &R::Task) {
        self.runtime.push(task.clone());
        let _ = self.runtime.suspend();
    }

    /// Queue `task` for deferred resumption.
    pub fn push(&self, task: R::Task) {
        self.runtime.push(task);
    }

    /// Whether tasks are queued for deferred resumption.
    pub fn is_ready(&self) -> bool {
        self.runtime.is_ready()
    }

    /// Release the selector's kernel resources.
    pub fn close(self) {
        drop(self);
    }

    /// Trigger the user-event filter if a blocking kernel wait is in
    /// progress. Returns whether a wakeup was delivered.
    pub fn wakeup(&self) -> bool {
        self.wake.wakeup()
    }

    fn record(&self, index: usize) -> *mut Record {
        self.descriptors.borrow_mut().lookup(index) as *mut Record
    }

    /// Arm one one-shot kevent per requested bit, with the record behind
    /// `udata` so dispatch can find the waiter list without a table walk.
    fn arm(&self, ident: usize, record: *mut Record, events: Events) -> io::Result<()> {
        // SAFETY: a zeroed kevent array is a valid changelist to fill in.
        let mut changes: [libc::kevent; 3] = unsafe { mem::zeroed() };
        let mut count = 0;

        if events.contains(Events::READABLE) {
            changes[count] = change(ident, libc::EVFILT_READ, 0, record);
            count += 1;
        }
        if events.contains(Events::WRITABLE) {
            changes[count] = change(ident, libc::EVFILT_WRITE, 0, record);
            count += 1;
        }
        if events.contains(Events::EXIT) {
            changes[count] = change(ident, libc::EVFILT_PROC, libc::NOTE_EXIT, record);
            count += 1;
        }

        log::trace!("arm: ident={} events={:?}", ident, events);

        syscall!(kevent(
            self.wake.kq.as_raw_fd(),
            changes.as_ptr(),
            count as libc::c_int,
            ptr::null_mut(),
            0,
            ptr::null(),
        ))?;

        Ok(())
    }

    /// Park the calling `task` until one of `events` fires on `io`.
    ///
    /// Returns the events that actually fired, or the empty set when the
    /// task was resumed with the cancellation sentinel.
    pub fn io_wait(&self, task: &R::Task, io: &impl AsRawFd, events: Events) -> io::Result<Events> {
        let fd = io.as_raw_fd();
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        let record = self.record(fd as usize);
        self.arm(fd as usize, record, events)?;

        // SAFETY: records are boxed and live as long as the selector; no
        // reference into the record is held across a suspension.
        unsafe {
            let mut waiter = Waiter::new(task.clone(), events);
            (*record).waiters.prepend(&mut waiter.node);

            match self.runtime.suspend() {
                Resume::Ready(fired) => Ok(fired),
                Resume::Cancel => Ok(Events::empty()),
            }
        }
    }

    /// Wait for child `pid` to exit and return its wait status.
    ///
    /// Watches the pid with `EVFILT_PROC`; no descriptor is consumed.
    /// `flags` has no meaning here and must be zero. Cancellation surfaces
    /// as `ECANCELED`.
    pub fn process_wait(&self, task: &R::Task, pid: libc::pid_t, flags: i32) -> io::Result<i32> {
        if flags != 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        if pid < 0 {
            return Err(io::Error::from_raw_os_error(libc::ESRCH));
        }

        let record = self.record(pid as usize);
        self.arm(pid as usize, record, Events::EXIT)?;

        // SAFETY: as in `io_wait`.
        let resume = unsafe {
            let mut waiter = Waiter::new(task.clone(), Events::EXIT);
            (*record).waiters.prepend(&mut waiter.node);
            self.runtime.suspend()
        };

        match resume {
            Resume::Ready(_) => self.runtime.process_status(pid),
            Resume::Cancel => Err(io::Error::from_raw_os_error(libc::ECANCELED)),
        }
    }

    /// Read up to `length` bytes into `buffer` at `offset`, parking the task
    /// whenever the descriptor has nothing to read yet. Returns the
    /// cumulative byte count; zero means end-of-file.
    pub fn io_read(
        &self,
        task: &R::Task,
        io: &impl AsRawFd,
        buffer: &mut [u8],
        length: usize,
        offset: usize,
    ) -> io::Result<usize> {
        crate::io::read_into(io.as_raw_fd(), buffer, length, offset, |events| {
            self.io_wait(task, io, events)
        })
    }

    /// Write up to `length` bytes from `buffer` at `offset`, parking the
    /// task whenever the descriptor cannot take more yet.
    pub fn io_write(
        &self,
        task: &R::Task,
        io: &impl AsRawFd,
        buffer: &[u8],
        length: usize,
        offset: usize,
    ) -> io::Result<usize> {
        crate::io::write_from(io.as_raw_fd(), buffer, length, offset, |events| {
            self.io_wait(task, io, events)
        })
    }

    /// Advance the selector.
    ///
    /// Flushes the ready queue, sweeps the kernel without blocking, then --
    /// only if nothing was runnable and nothing fired -- blocks for up to
    /// `duration` (`None` blocks indefinitely, zero skips the blocking
    /// phase), and dispatches fired events to waiters. Returns the number of
    /// filter events dispatched; user-event wakeups are not counted.
    pub fn select(&self, duration: Option<Duration>) -> io::Result<usize> {
        let ready = self.runtime.flush();

        // SAFETY: a zeroed kevent array is a valid output buffer.
        let mut events: [libc::kevent; MAX_EVENTS] = unsafe { mem::zeroed() };

        // Nonblocking sweep first: when events are already pending this
        // avoids releasing and reacquiring the runtime lock around the
        // kernel wait.
        let mut count = self.poll(&mut events, Some(Duration::ZERO))?;

        if ready == 0 && count == 0 && !self.runtime.is_ready() && duration != Some(Duration::ZERO)
        {
            self.wake.blocked.store(true, Ordering::SeqCst);
            let result = self.runtime.blocking(|| self.poll(&mut events, duration));
            self.wake.blocked.store(false, Ordering::SeqCst);
            count = result?;
        }

        // Accumulate every fired filter before dispatching, so that several
        // filters firing for one descriptor in the same wakeup are all
        // visible to its waiters in a single pass.
        let mut fired = 0;
        for event in events.iter().take(count) {
            if event.udata.is_null() {
                continue;
            }
            let record = event.udata as *mut Record;
            // SAFETY: udata points at a boxed record owned by this selector.
            unsafe { (*record).ready |= filter_events(event) };
            fired += 1;
        }

        for event in events.iter().take(count) {
            if event.udata.is_null() {
                continue;
            }
            let record = event.udata as *mut Record;
            // SAFETY: as above; the first dispatch for a record consumes its
            // whole accumulator, later ones see it empty.
            unsafe { self.dispatch(record) };
        }

        Ok(fired)
    }

    fn poll(&self, events: &mut [libc::kevent], timeout: Option<Duration>) -> io::Result<usize> {
        let storage = timeout.map(timespec);
        let ts = storage
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);

        match syscall!(kevent(
            self.wake.kq.as_raw_fd(),
            ptr::null(),
            0,
            events.as_mut_ptr(),
            events.len() as libc::c_int,
            ts,
        )) {
            Ok(count) => Ok(count as usize),
            Err(error) if error.raw_os_error() == Some(libc::EINTR) => Ok(0),
            Err(error) => Err(error),
        }
    }

    unsafe fn dispatch(&self, record: *mut Record) {
        let fired = (*record).ready;
        if fired.is_empty() {
            return;
        }
        (*record).ready = Events::empty();

        log::trace!("dispatch: fired={:?}", fired);

        let list = &(*record).waiters as *const List as *mut List;
        resume_matching(&self.runtime, list, fired);
    }
}

fn change(ident: usize, filter: libc::c_short, fflags: u32, record: *mut Record) -> libc::kevent {
    // SAFETY: a zeroed kevent is a valid all-clear change to fill in.
    let mut change: libc::kevent = unsafe { mem::zeroed() };
    change.ident = ident as libc::uintptr_t;
    change.filter = filter;
    change.flags = libc::EV_ADD | libc::EV_ENABLE | libc::EV_ONESHOT;
    change.fflags = fflags;
    change.udata = record as *mut libc::c_void;
    change
}

fn filter_events(event: &libc::kevent) -> Events {
    let mut events = match event.filter {
        libc::EVFILT_READ => Events::READABLE,
        libc::EVFILT_WRITE => Events::WRITABLE,
        libc::EVFILT_PROC => Events::EXIT,
        _ => Events::empty(),
    };

    // Error results wake a reader so the next syscall surfaces the errno.
    if event.flags & libc::EV_ERROR != 0 {
        events |= Events::READABLE;
    }

    events
}

fn timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}
