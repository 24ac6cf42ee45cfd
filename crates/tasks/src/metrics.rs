//! Thread pool metrics.

use core::fmt;
use metrics::Counter;

/// Counters for work accepted and completed by a [`ThreadPool`](crate::ThreadPool).
#[derive(Clone, Debug)]
pub(crate) struct PoolMetrics {
    /// Number of callbacks accepted by the pool
    pub(crate) jobs_total: Counter,
    /// Number of accepted callbacks that ran to completion or unwound
    pub(crate) finished_jobs_total: Counter,
    /// Number of futures accepted by the pool
    pub(crate) futures_total: Counter,
    /// Number of accepted futures that resolved or were dropped
    pub(crate) finished_futures_total: Counter,
}

impl PoolMetrics {
    pub(crate) fn new(pool: &str) -> Self {
        let pool = pool.to_owned();
        Self {
            jobs_total: metrics::counter!("pool.jobs_total", "pool" => pool.clone()),
            finished_jobs_total: metrics::counter!(
                "pool.finished_jobs_total",
                "pool" => pool.clone()
            ),
            futures_total: metrics::counter!("pool.futures_total", "pool" => pool.clone()),
            finished_futures_total: metrics::counter!(
                "pool.finished_futures_total",
                "pool" => pool
            ),
        }
    }

    pub(crate) fn inc_jobs(&self) -> IncCounterOnDrop {
        self.jobs_total.increment(1);
        IncCounterOnDrop::new(self.finished_jobs_total.clone())
    }

    pub(crate) fn inc_futures(&self) -> IncCounterOnDrop {
        self.futures_total.increment(1);
        IncCounterOnDrop::new(self.finished_futures_total.clone())
    }
}

/// Increments a counter when dropped, so unwinding work is still counted as finished.
pub(crate) struct IncCounterOnDrop(Counter);

impl fmt::Debug for IncCounterOnDrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IncCounterOnDrop").finish()
    }
}

impl IncCounterOnDrop {
    pub(crate) const fn new(counter: Counter) -> Self {
        Self(counter)
    }
}

impl Drop for IncCounterOnDrop {
    fn drop(&mut self) {
        self.0.increment(1);
    }
}
