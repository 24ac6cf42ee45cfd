//! Callback dispatch onto a [`ThreadPool`] with a declared ordering.

use std::{
    collections::VecDeque,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::ThreadPool;

type Job = Box<dyn FnOnce() + Send>;

/// Marshals callbacks onto a pool, either concurrently or in enqueued order.
///
/// A dispatcher never drops a callback: when the pool no longer accepts work the
/// callback runs on the caller's thread instead.
#[derive(Clone)]
pub struct Dispatcher {
    pool: ThreadPool,
    name: &'static str,
    strand: Arc<Strand>,
}

/// FIFO queue with at most one active drainer.
#[derive(Default)]
struct Strand {
    queue: Mutex<StrandQueue>,
}

#[derive(Default)]
struct StrandQueue {
    jobs: VecDeque<Job>,
    draining: bool,
}

impl Strand {
    /// Pushes a job and reports whether the caller must start draining.
    fn push(&self, job: Job) -> bool {
        let mut queue = self.queue.lock();
        queue.jobs.push_back(job);
        !std::mem::replace(&mut queue.draining, true)
    }

    /// Runs queued jobs until the queue is empty. A panicking job is logged and
    /// the strand moves on, so later jobs are never stranded behind it.
    fn drain(&self, name: &'static str) {
        loop {
            let job = {
                let mut queue = self.queue.lock();
                match queue.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                warn!(dispatcher = name, "ordered job panicked");
            }
        }
    }
}

impl Dispatcher {
    pub fn new(pool: ThreadPool, name: &'static str) -> Self {
        Self {
            pool,
            name,
            strand: Arc::default(),
        }
    }

    /// Runs `job` on any worker, with no ordering relative to other jobs.
    pub fn concurrent<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(job) = self.pool.execute(job) {
            trace!(dispatcher = self.name, "pool stopped, running job inline");
            job();
        }
    }

    /// Runs `job` after every job previously ordered on this dispatcher.
    pub fn ordered<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.strand.push(Box::new(job)) {
            return;
        }

        let strand = Arc::clone(&self.strand);
        let name = self.name;
        if let Err(drain) = self.pool.execute(move || strand.drain(name)) {
            trace!(dispatcher = self.name, "pool stopped, draining strand inline");
            drain();
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
