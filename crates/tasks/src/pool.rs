//! Sized worker pool backed by a multi-threaded tokio runtime.

use std::{cell::Cell, fmt, future::Future, io, sync::Arc};

use parking_lot::{Condvar, Mutex};
use tokio::{
    runtime::{Builder, Handle, Runtime},
    sync::watch,
};
use tracing::{debug, warn};

use crate::metrics::PoolMetrics;

thread_local! {
    /// Identity of the pool owning the current thread, zero for foreign threads.
    static POOL_THREAD: Cell<usize> = const { Cell::new(0) };
}

/// A restartable set of worker threads.
///
/// Work is accepted between [`spawn`](Self::spawn) and [`shutdown`](Self::shutdown).
/// [`join`](Self::join) waits for every accepted job and future to finish before
/// releasing the threads, after which the pool may be spawned again. Cloning yields
/// another handle to the same pool.
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    work: Arc<Outstanding>,
    shutdown: watch::Sender<bool>,
    metrics: PoolMetrics,
}

#[derive(Default)]
struct State {
    runtime: Option<Runtime>,
    accepting: bool,
}

/// Count of accepted work that has not yet been dropped.
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn begin(self: &Arc<Self>) -> WorkGuard {
        *self.count.lock() += 1;
        WorkGuard(Arc::clone(self))
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Releases one unit of outstanding work when dropped.
struct WorkGuard(Arc<Outstanding>);

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl ThreadPool {
    /// Creates a pool with no threads. Nothing is accepted until [`spawn`](Self::spawn).
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (shutdown, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                metrics: PoolMetrics::new(&name),
                name,
                state: Mutex::default(),
                work: Arc::default(),
                shutdown,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Starts `threads` workers (at least one).
    ///
    /// Spawning a running pool is a no-op. Spawning a pool that was shut down but not
    /// yet joined fails, since its previous generation may still be draining.
    pub fn spawn(&self, threads: usize) -> io::Result<()> {
        let mut state = self.inner.state.lock();
        if state.runtime.is_some() {
            if state.accepting {
                return Ok(());
            }
            return Err(io::Error::other(format!(
                "thread pool {} has not been joined",
                self.inner.name
            )));
        }

        let id = self.id();
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(self.inner.name.clone())
            .on_thread_start(move || POOL_THREAD.with(|owner| owner.set(id)))
            .enable_all()
            .build()?;

        state.runtime = Some(runtime);
        state.accepting = true;
        self.inner.shutdown.send_replace(false);
        debug!(pool = %self.inner.name, threads, "thread pool started");
        Ok(())
    }

    /// Whether the pool currently accepts work.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().accepting
    }

    /// Runs `job` on a worker thread.
    ///
    /// The job is handed back when the pool does not accept work.
    pub fn execute<F>(&self, job: F) -> Result<(), F>
    where
        F: FnOnce() + Send + 'static,
    {
        let state = self.inner.state.lock();
        let runtime = match state.runtime.as_ref() {
            Some(runtime) if state.accepting => runtime,
            _ => return Err(job),
        };

        let work = self.inner.work.begin();
        let finished = self.inner.metrics.inc_jobs();
        runtime.spawn(async move {
            let _work = work;
            let _finished = finished;
            job();
        });
        Ok(())
    }

    /// Drives `future` to completion on the pool.
    ///
    /// The future is handed back when the pool does not accept work. Long-running
    /// futures must observe [`shutdown_signal`](Self::shutdown_signal), otherwise
    /// [`join`](Self::join) waits for them indefinitely.
    pub fn spawn_future<F>(&self, future: F) -> Result<(), F>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.inner.state.lock();
        let runtime = match state.runtime.as_ref() {
            Some(runtime) if state.accepting => runtime,
            _ => return Err(future),
        };

        let work = self.inner.work.begin();
        let finished = self.inner.metrics.inc_futures();
        runtime.spawn(async move {
            let _work = work;
            let _finished = finished;
            future.await;
        });
        Ok(())
    }

    /// Stops accepting work and fires the shutdown signal. Accepted work keeps running.
    pub fn shutdown(&self) {
        let was_accepting = std::mem::replace(&mut self.inner.state.lock().accepting, false);
        self.inner.shutdown.send_replace(true);
        if was_accepting {
            debug!(pool = %self.inner.name, "thread pool shutting down");
        }
    }

    /// Shuts down, waits for outstanding work to drain, then releases the threads.
    ///
    /// From one of the pool's own threads waiting would never end, so the runtime is
    /// released in the background without draining.
    pub fn join(&self) {
        self.shutdown();

        if POOL_THREAD.with(Cell::get) == self.id() {
            let runtime = self.inner.state.lock().runtime.take();
            if let Some(runtime) = runtime {
                warn!(pool = %self.inner.name, "thread pool joined from its own worker, releasing in background");
                runtime.shutdown_background();
            }
            return;
        }

        self.inner.work.wait_idle();

        let runtime = self.inner.state.lock().runtime.take();
        if let Some(runtime) = runtime {
            // Dropping a runtime blocks, which another runtime's context forbids.
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            } else {
                drop(runtime);
            }
            debug!(pool = %self.inner.name, "thread pool joined");
        }
    }

    /// A signal that resolves once the pool stops accepting work.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown(self.inner.shutdown.subscribe())
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.inner.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Shutdown notification handed to long-running futures.
#[derive(Clone, Debug)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    /// Resolves once the pool has been shut down.
    pub async fn wait(&mut self) {
        let _ = self.0.wait_for(|stopped| *stopped).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}
