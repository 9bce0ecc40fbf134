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

//! Thread-backed cooperative runtime for the selector tests.
//!
//! Each task runs on its own OS thread, but a strict handoff protocol keeps
//! exactly one of the loop (the test thread) and the tasks runnable at any
//! moment, which reproduces the inline resumption order of a fiber runtime:
//! `resume` returns only once the task has suspended again or completed.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::runtime::{Resume, Runtime};

/// Sent by a task thread when it suspends or completes, returning control to
/// the loop.
struct Yielded;

struct Inner {
    control_tx: Sender<Yielded>,
    control_rx: Mutex<Receiver<Yielded>>,
    queue: Mutex<VecDeque<TaskHandle>>,
}

#[derive(Clone)]
pub(crate) struct TestRuntime {
    inner: Arc<Inner>,
}

/// Handle to a spawned task; resuming it sends the value to the task thread.
#[derive(Clone)]
pub(crate) struct TaskHandle {
    resume_tx: Sender<Resume>,
}

thread_local! {
    static ENDPOINTS: RefCell<Option<(Sender<Yielded>, Receiver<Resume>)>> =
        const { RefCell::new(None) };
}

impl TestRuntime {
    pub(crate) fn new() -> TestRuntime {
        let (control_tx, control_rx) = channel();
        TestRuntime {
            inner: Arc::new(Inner {
                control_tx,
                control_rx: Mutex::new(control_rx),
                queue: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Spawn a task. It stays parked until its first resume, which starts
    /// the body; the resume value that starts it is discarded.
    pub(crate) fn spawn<F>(&self, body: F) -> TaskHandle
    where
        F: FnOnce(TaskHandle) + Send + 'static,
    {
        let (resume_tx, resume_rx) = channel();
        let handle = TaskHandle { resume_tx };
        let task = handle.clone();
        let control_tx = self.inner.control_tx.clone();

        thread::spawn(move || {
            if resume_rx.recv().is_err() {
                return;
            }
            ENDPOINTS.with(|endpoints| {
                *endpoints.borrow_mut() = Some((control_tx.clone(), resume_rx));
            });

            body(task);

            // Drop the resume endpoint first so later resume attempts see a
            // completed task, then hand control back.
            ENDPOINTS.with(|endpoints| *endpoints.borrow_mut() = None);
            let _ = control_tx.send(Yielded);
        });

        handle
    }
}

impl Runtime for TestRuntime {
    type Task = TaskHandle;

    fn suspend(&self) -> Resume {
        ENDPOINTS.with(|endpoints| {
            let endpoints = endpoints.borrow();
            let (control_tx, resume_rx) = endpoints
                .as_ref()
                .expect("suspend called outside a task");
            control_tx.send(Yielded).unwrap();
            resume_rx.recv().unwrap()
        })
    }

    fn resume(&self, task: &TaskHandle, value: Resume) {
        if task.resume_tx.send(value).is_err() {
            // The task already completed.
            return;
        }
        let control_rx = self.inner.control_rx.lock().unwrap();
        let _ = control_rx.recv();
    }

    fn push(&self, task: TaskHandle) {
        self.inner.queue.lock().unwrap().push_back(task);
    }

    fn flush(&self) -> usize {
        let mut count = 0;
        loop {
            let task = self.inner.queue.lock().unwrap().pop_front();
            match task {
                Some(task) => {
                    self.resume(&task, Resume::Cancel);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    fn is_ready(&self) -> bool {
        !self.inner.queue.lock().unwrap().is_empty()
    }

    fn process_status(&self, pid: libc::pid_t) -> io::Result<i32> {
        let mut status = 0;
        syscall!(waitpid(pid, &mut status, 0))?;
        Ok(status)
    }
}

/// Shares a selector with task threads.
///
/// The handoff protocol guarantees at most one thread touches the wrapped
/// value at a time, which is the same exclusivity a fiber runtime provides
/// on a single thread.
pub(crate) struct Exclusive<T>(pub T);

unsafe impl<T> Send for Exclusive<T> {}
unsafe impl<T> Sync for Exclusive<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Events;

    #[test]
    fn resume_runs_a_task_to_its_next_suspension() {
        let runtime = TestRuntime::new();
        let (tx, rx) = channel();

        let observer = runtime.clone();
        let task = runtime.spawn(move |_| {
            let value = observer.suspend();
            tx.send(value).unwrap();
        });

        // First resume starts the body, which immediately suspends.
        runtime.resume(&task, Resume::Cancel);
        assert!(rx.try_recv().is_err());

        runtime.resume(&task, Resume::Ready(Events::WRITABLE));
        assert_eq!(rx.recv().unwrap(), Resume::Ready(Events::WRITABLE));
    }

    #[test]
    fn flush_resumes_queued_tasks_with_cancel() {
        let runtime = TestRuntime::new();
        let (tx, rx) = channel();

        let observer = runtime.clone();
        let task = runtime.spawn(move |_| {
            let value = observer.suspend();
            tx.send(value).unwrap();
        });

        runtime.resume(&task, Resume::Cancel);
        runtime.push(task);
        assert!(runtime.is_ready());

        assert_eq!(runtime.flush(), 1);
        assert!(!runtime.is_ready());
        assert_eq!(rx.recv().unwrap(), Resume::Cancel);
    }
}
