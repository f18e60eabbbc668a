//! Main execution context.
//!
//! Disposal never runs inline: stores hand `on_cleared` calls to a
//! [`MainDispatcher`], and the host runs them on its main/UI thread.
//! [`MainQueue`] is the provided dispatcher; the host's event loop calls
//! [`MainQueue::run_pending`] once per turn, the way a looper drains its
//! message queue.

use std::collections::VecDeque;

use parking_lot::Mutex;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait MainDispatcher: Send + Sync {
    /// Schedules `task` on the main context. Must not run it before
    /// returning.
    fn dispatch(&self, task: Task);
}

#[derive(Default)]
pub struct MainQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl MainQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every task queued so far on the calling thread, in FIFO order.
    ///
    /// Tasks enqueued while draining are left for the next call. Returns the
    /// number of tasks run.
    pub fn run_pending(&self) -> usize {
        let batch = std::mem::take(&mut *self.tasks.lock());
        let n = batch.len();
        for task in batch {
            task();
        }
        if n > 0 {
            log::trace!("main queue ran {n} task(s)");
        }
        n
    }

    /// Drains until no task is left, including tasks queued by tasks.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let n = self.run_pending();
            if n == 0 {
                return total;
            }
            total += n;
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl MainDispatcher for MainQueue {
    fn dispatch(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }
}

impl std::fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainQueue").field("pending", &self.len()).finish()
    }
}
