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

//! Epoll-backed selector (Linux, Android).

use std::cell::RefCell;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::descriptors::Descriptors;
use crate::interrupt::Interrupt;
use crate::list::List;
use crate::runtime::{Resume, Runtime};
use crate::waiter::{requested_union, resume_matching, Waiter};
use crate::Events;

const MAX_EVENTS: usize = 64;

/// Kernel event payload reserved for the interrupt channel; real descriptors
/// are nonnegative.
const INTERRUPT_KEY: u64 = u64::MAX;

/// Per-descriptor record: the waiter list and the union of events the
/// kernel registration is currently armed for. Arming is level-triggered and
/// lazily widened; dispatch narrows it back once events fire that no
/// remaining waiter asks for.
#[derive(Default)]
struct Record {
    waiters: List,
    armed: Events,
}

struct Wake {
    interrupt: Interrupt,
    blocked: AtomicBool,
}

impl Wake {
    fn wakeup(&self) -> bool {
        if self.blocked.load(Ordering::SeqCst) {
            self.interrupt.signal();
            true
        } else {
            false
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
    /// Signal the interrupt channel if the selector is blocked in the
    /// kernel. Returns whether a wakeup was delivered.
    pub fn wakeup(&self) -> bool {
        self.wake.wakeup()
    }
}

/// Readiness selector multiplexing suspended tasks over one epoll instance.
pub struct Selector<R: Runtime> {
    runtime: R,
    fd: OwnedFd,
    wake: Arc<Wake>,
    descriptors: RefCell<Descriptors<Record>>,
}

impl<R: Runtime> Selector<R> {
    pub fn new(runtime: R) -> io::Result<Selector<R>> {
        let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        // SAFETY: epoll_create1 returned a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let interrupt = Interrupt::open()?;
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: INTERRUPT_KEY,
        };
        syscall!(epoll_ctl(
            fd.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            interrupt.as_raw_fd(),
            &mut event,
        ))?;

        log::trace!("new: epoll_fd={}", fd.as_raw_fd());

        Ok(Selector {
            runtime,
            fd,
            wake: Arc::new(Wake {
                interrupt,
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

    /// Signal the interrupt channel if a blocking kernel wait is in
    /// progress. Returns whether a wakeup was delivered.
    pub fn wakeup(&self) -> bool {
        self.wake.wakeup()
    }

    fn record(&self, index: usize) -> *mut Record {
        self.descriptors.borrow_mut().lookup(index) as *mut Record
    }

    /// Park the calling `task` until one of `events` fires on `io`.
    ///
    /// Returns the events that actually fired, or the empty set when the
    /// task was resumed with the cancellation sentinel. Descriptors epoll
    /// refuses to watch (regular files report `EPERM`) are treated as always
    /// ready: the task yields once and resumes with the requested events.
    pub fn io_wait(&self, task: &R::Task, io: &impl AsRawFd, events: Events) -> io::Result<Events> {
        let fd = io.as_raw_fd();
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }

        let record = self.record(fd as usize);

        // SAFETY: records are boxed and live as long as the selector; no
        // reference into the record is held across a suspension.
        unsafe {
            let armed = (*record).armed;
            if !armed.contains(events) {
                let mut event = libc::epoll_event {
                    events: epoll_flags(armed | events),
                    u64: fd as u64,
                };
                let op = if armed.is_empty() {
                    libc::EPOLL_CTL_ADD
                } else {
                    libc::EPOLL_CTL_MOD
                };

                log::trace!("io_wait: fd={} arm {:?} over {:?}", fd, events, armed);

                if let Err(error) = syscall!(epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event)) {
                    if error.raw_os_error() == Some(libc::EPERM) {
                        // Not pollable; the descriptor is always ready.
                        self.yield_now(task);
                        return Ok(events);
                    }
                    return Err(error);
                }

                (*record).armed = armed | events;
            }

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
    /// The process is watched through a process-handle descriptor, so no
    /// signal handling is involved. `flags` has no meaning here and must be
    /// zero. Cancellation surfaces as `ECANCELED`; the process handle is
    /// closed on every path.
    pub fn process_wait(&self, task: &R::Task, pid: libc::pid_t, flags: i32) -> io::Result<i32> {
        if flags != 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

        let pidfd = syscall!(syscall(libc::SYS_pidfd_open, pid, 0))?;
        // SAFETY: pidfd_open returned a fresh descriptor we now own.
        let pidfd = unsafe { OwnedFd::from_raw_fd(pidfd as RawFd) };
        let raw = pidfd.as_raw_fd();

        let mut event = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLONESHOT) as u32,
            u64: raw as u64,
        };
        syscall!(epoll_ctl(
            self.fd.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            raw,
            &mut event,
        ))?;

        let record = self.record(raw as usize);

        // SAFETY: as in `io_wait`.
        let resume = unsafe {
            (*record).armed = Events::READABLE;

            let mut waiter = Waiter::new(task.clone(), Events::READABLE);
            (*record).waiters.prepend(&mut waiter.node);

            let resume = self.runtime.suspend();

            // The one-shot registration dies with the handle; the slot must
            // not pretend to be armed when the descriptor number returns.
            (*record).armed = Events::empty();
            resume
        };

        drop(pidfd);

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
    /// descriptor events dispatched; interrupt wakeups are cleared, not
    /// counted.
    pub fn select(&self, duration: Option<Duration>) -> io::Result<usize> {
        let ready = self.runtime.flush();

        // SAFETY: a zeroed epoll_event array is a valid output buffer.
        let mut events: [libc::epoll_event; MAX_EVENTS] = unsafe { mem::zeroed() };

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

        let mut fired = 0;
        for event in events.iter().take(count) {
            let key = event.u64 as i64;
            if key >= 0 {
                self.dispatch(key as RawFd, event.events);
                fired += 1;
            } else {
                self.wake.interrupt.clear();
            }
        }

        Ok(fired)
    }

    fn poll(&self, events: &mut [libc::epoll_event], timeout: Option<Duration>) -> io::Result<usize> {
        let storage = timeout.map(timespec);
        let ts = storage
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);

        // Raw syscall: the libc wrapper for epoll_pwait2 is newer than some
        // supported C libraries, and kernels without the syscall report
        // ENOSYS below.
        let mut result = syscall!(syscall(
            libc::SYS_epoll_pwait2,
            self.fd.as_raw_fd(),
            events.as_mut_ptr(),
            events.len() as libc::c_int,
            ts,
            ptr::null::<libc::sigset_t>(),
        ));

        if let Err(error) = &result {
            if error.raw_os_error() == Some(libc::ENOSYS) {
                result = syscall!(epoll_wait(
                    self.fd.as_raw_fd(),
                    events.as_mut_ptr(),
                    events.len() as libc::c_int,
                    timeout_ms(timeout),
                ))
                .map(libc::c_long::from);
            }
        }

        match result {
            Ok(count) => Ok(count as usize),
            Err(error) if error.raw_os_error() == Some(libc::EINTR) => Ok(0),
            Err(error) => Err(error),
        }
    }

    fn dispatch(&self, fd: RawFd, flags: u32) {
        let record = match self.descriptors.borrow_mut().get(fd as usize) {
            Some(record) => record as *mut Record,
            None => return,
        };

        let fired = epoll_events(flags);
        log::trace!("dispatch: fd={} fired={:?}", fd, fired);

        // SAFETY: the record outlives the selector's descriptor table;
        // resumed tasks mutate the waiter list only through their own nodes,
        // which the resumption walk is built to tolerate.
        unsafe {
            let list = &(*record).waiters as *const List as *mut List;

            resume_matching(&self.runtime, list, fired);

            // Narrow the registration when events fired that no remaining
            // waiter asks for, otherwise a still-ready descriptor would spin
            // the level-triggered poll.
            let remaining = requested_union::<R::Task>(list);
            if !remaining.contains(fired) {
                let result = if remaining.is_empty() {
                    syscall!(epoll_ctl(
                        self.fd.as_raw_fd(),
                        libc::EPOLL_CTL_DEL,
                        fd,
                        ptr::null_mut(),
                    ))
                } else {
                    let mut event = libc::epoll_event {
                        events: epoll_flags(remaining),
                        u64: fd as u64,
                    };
                    syscall!(epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event))
                };
                // The descriptor may already be closed (process handles go
                // away mid-dispatch); its registration died with it.
                let _ = result;
                (*record).armed = remaining;
            }
        }
    }
}

fn epoll_flags(events: Events) -> u32 {
    // HUP and ERR are always armed; epoll reports them regardless and the
    // mapping below needs them folded into READABLE.
    let mut flags = libc::EPOLLHUP | libc::EPOLLERR;

    if events.contains(Events::READABLE) {
        flags |= libc::EPOLLIN;
    }
    if events.contains(Events::PRIORITY) {
        flags |= libc::EPOLLPRI;
    }
    if events.contains(Events::WRITABLE) {
        flags |= libc::EPOLLOUT;
    }

    flags as u32
}

/// Epoll has no dedicated closure event, so HUP and ERR fold into READABLE;
/// the next read observes the condition as end-of-file or an errno.
fn epoll_events(flags: u32) -> Events {
    let flags = flags as libc::c_int;
    let mut events = Events::empty();

    if flags & (libc::EPOLLIN | libc::EPOLLHUP | libc::EPOLLERR) != 0 {
        events |= Events::READABLE;
    }
    if flags & libc::EPOLLPRI != 0 {
        events |= Events::PRIORITY;
    }
    if flags & libc::EPOLLOUT != 0 {
        events |= Events::WRITABLE;
    }

    events
}

fn timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        // Round up so a sub-millisecond timeout does not become a busy poll.
        Some(duration) => duration
            .checked_add(Duration::from_nanos(999_999))
            .unwrap_or(duration)
            .as_millis()
            .try_into()
            .unwrap_or(libc::c_int::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{Exclusive, TaskHandle, TestRuntime};
    use std::sync::mpsc::channel;
    use std::thread;

    struct Fd(RawFd);

    impl AsRawFd for Fd {
        fn as_raw_fd(&self) -> RawFd {
            self.0
        }
    }

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn close(fd: RawFd) {
        unsafe { libc::close(fd) };
    }

    fn write_byte(fd: RawFd) {
        assert_eq!(
            unsafe { libc::write(fd, b"x".as_ptr() as *const libc::c_void, 1) },
            1
        );
    }

    fn setup() -> (TestRuntime, Arc<Exclusive<Selector<TestRuntime>>>) {
        let runtime = TestRuntime::new();
        let selector = Selector::new(runtime.clone()).unwrap();
        (runtime, Arc::new(Exclusive(selector)))
    }

    fn start(runtime: &TestRuntime, task: &TaskHandle) {
        runtime.resume(task, Resume::Cancel);
    }

    #[test]
    fn read_task_gets_pipe_contents() {
        let (runtime, selector) = setup();
        let (reader_fd, writer_fd) = pipe();

        let (result_tx, result_rx) = channel();
        let shared = selector.clone();
        let reader = runtime.spawn(move |task| {
            let mut buffer = [0u8; 16];
            let count = shared
                .0
                .io_read(&task, &Fd(reader_fd), &mut buffer, 5, 0)
                .unwrap();
            result_tx.send((count, buffer[..count].to_vec())).unwrap();
        });
        start(&runtime, &reader);

        let shared = selector.clone();
        let writer = runtime.spawn(move |task| {
            let count = shared
                .0
                .io_write(&task, &Fd(writer_fd), b"hello", 5, 0)
                .unwrap();
            assert_eq!(count, 5);
        });
        start(&runtime, &writer);

        assert_eq!(selector.0.select(Some(Duration::ZERO)).unwrap(), 1);

        let (count, bytes) = result_rx.recv().unwrap();
        assert_eq!(count, 5);
        assert_eq!(bytes, b"hello");

        close(reader_fd);
        close(writer_fd);
    }

    #[test]
    fn only_matching_waiters_resume() {
        let (runtime, selector) = setup();
        let (reader_fd, writer_fd) = pipe();

        // Two waiters on the write end of the pipe: reading it never fires,
        // writing it fires immediately.
        let (a_tx, a_rx) = channel();
        let shared = selector.clone();
        let task_a = runtime.spawn(move |task| {
            let fired = shared.0.io_wait(&task, &Fd(writer_fd), Events::READABLE).unwrap();
            a_tx.send(fired).unwrap();
        });
        start(&runtime, &task_a);

        let (b_tx, b_rx) = channel();
        let shared = selector.clone();
        let task_b = runtime.spawn(move |task| {
            let fired = shared.0.io_wait(&task, &Fd(writer_fd), Events::WRITABLE).unwrap();
            b_tx.send(fired).unwrap();
        });
        start(&runtime, &task_b);

        assert_eq!(selector.0.select(Some(Duration::ZERO)).unwrap(), 1);

        assert_eq!(b_rx.recv().unwrap(), Events::WRITABLE);
        assert!(a_rx.try_recv().is_err());

        // The skipped waiter is still parked; cancelling it returns the
        // empty set and empties the list.
        selector.0.cancel(&task_a);
        assert_eq!(a_rx.recv().unwrap(), Events::empty());

        close(reader_fd);
        close(writer_fd);
    }

    #[test]
    fn repeated_waits_rearm_from_scratch() {
        let (runtime, selector) = setup();
        let (reader_fd, writer_fd) = pipe();

        for _ in 0..3 {
            let (tx, rx) = channel();
            let shared = selector.clone();
            let task = runtime.spawn(move |task| {
                let fired = shared.0.io_wait(&task, &Fd(reader_fd), Events::READABLE).unwrap();
                tx.send(fired).unwrap();
            });
            start(&runtime, &task);

            write_byte(writer_fd);
            assert_eq!(selector.0.select(Some(Duration::ZERO)).unwrap(), 1);
            assert_eq!(rx.recv().unwrap(), Events::READABLE);

            // Drain the pipe; the registration was dropped once no waiter
            // was left, so nothing fires until the next wait re-arms.
            let mut byte = [0u8; 1];
            assert_eq!(
                unsafe { libc::read(reader_fd, byte.as_mut_ptr() as *mut libc::c_void, 1) },
                1
            );
            assert_eq!(selector.0.select(Some(Duration::ZERO)).unwrap(), 0);
        }

        close(reader_fd);
        close(writer_fd);
    }

    #[test]
    fn timer_descriptor_fires_after_expiry() {
        let (runtime, selector) = setup();
        let timer = syscall!(timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_CLOEXEC)).unwrap();

        let (tx, rx) = channel();
        let shared = selector.clone();
        let task = runtime.spawn(move |task| {
            let fired = shared.0.io_wait(&task, &Fd(timer), Events::READABLE).unwrap();
            tx.send(fired).unwrap();
        });
        start(&runtime, &task);

        let spec = libc::itimerspec {
            it_interval: libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            it_value: libc::timespec {
                tv_sec: 0,
                tv_nsec: 10_000_000,
            },
        };
        assert_eq!(
            unsafe { libc::timerfd_settime(timer, 0, &spec, ptr::null_mut()) },
            0
        );

        let mut fired = 0;
        for _ in 0..50 {
            fired = selector.0.select(Some(Duration::from_millis(100))).unwrap();
            if fired > 0 {
                break;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(rx.recv().unwrap(), Events::READABLE);

        close(timer);
    }

    #[test]
    fn process_wait_reports_exit_status() {
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0);
        if pid == 0 {
            // Child: exit immediately, before the selector even arms.
            unsafe { libc::_exit(7) };
        }

        let (runtime, selector) = setup();
        let (tx, rx) = channel();
        let shared = selector.clone();
        let task = runtime.spawn(move |task| {
            let status = shared.0.process_wait(&task, pid, 0).unwrap();
            tx.send(status).unwrap();
        });
        start(&runtime, &task);

        let mut fired = 0;
        for _ in 0..50 {
            fired = selector.0.select(Some(Duration::from_millis(100))).unwrap();
            if fired > 0 {
                break;
            }
        }
        assert_eq!(fired, 1);

        let status = rx.recv().unwrap();
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 7);
    }

    #[test]
    fn process_wait_rejects_flags() {
        let (runtime, selector) = setup();
        let (tx, rx) = channel();
        let shared = selector.clone();
        let task = runtime.spawn(move |task| {
            let error = shared.0.process_wait(&task, 1, libc::WNOHANG).unwrap_err();
            tx.send(error.raw_os_error()).unwrap();
        });
        start(&runtime, &task);

        assert_eq!(rx.recv().unwrap(), Some(libc::EINVAL));
    }

    #[test]
    fn wakeup_interrupts_a_blocking_select() {
        let (_runtime, selector) = setup();

        // Not blocked yet: a no-op.
        assert!(!selector.0.wakeup());

        let waker = selector.0.waker();
        let spinner = thread::spawn(move || {
            while !waker.wakeup() {
                thread::yield_now();
            }
        });

        // No waiters: only the interrupt can end this, and it reports zero
        // events.
        assert_eq!(selector.0.select(None).unwrap(), 0);
        spinner.join().unwrap();

        // The channel was drained; nothing lingers for the next sweep.
        assert_eq!(selector.0.select(Some(Duration::ZERO)).unwrap(), 0);
    }

    #[test]
    fn regular_files_are_always_ready() {
        let (runtime, selector) = setup();
        let file = std::fs::File::open("Cargo.toml").unwrap();

        let (tx, rx) = channel();
        let shared = selector.clone();
        let task = runtime.spawn(move |task| {
            let fired = shared.0.io_wait(&task, &file, Events::READABLE).unwrap();
            tx.send(fired).unwrap();
        });
        start(&runtime, &task);

        // The task yielded after EPERM; flushing the ready queue resumes it
        // with the requested events and no kernel registration exists.
        assert!(runtime.is_ready());
        assert_eq!(selector.0.select(Some(Duration::ZERO)).unwrap(), 0);
        assert_eq!(rx.recv().unwrap(), Events::READABLE);
    }

    #[test]
    fn cancelled_waiter_never_resumes_again() {
        let (runtime, selector) = setup();
        let (reader_fd, writer_fd) = pipe();

        let (tx, rx) = channel();
        let shared = selector.clone();
        let task = runtime.spawn(move |task| {
            let fired = shared.0.io_wait(&task, &Fd(reader_fd), Events::READABLE).unwrap();
            tx.send(fired).unwrap();
        });
        start(&runtime, &task);

        selector.0.cancel(&task);
        assert_eq!(rx.recv().unwrap(), Events::empty());

        // The descriptor becomes ready afterwards: the kernel still reports
        // it once, nobody is resumed, and the registration is dropped.
        write_byte(writer_fd);
        assert_eq!(selector.0.select(Some(Duration::ZERO)).unwrap(), 1);
        assert_eq!(selector.0.select(Some(Duration::ZERO)).unwrap(), 0);

        close(reader_fd);
        close(writer_fd);
    }
}
