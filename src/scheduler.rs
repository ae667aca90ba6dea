//! Background Execution
//!
//! The engine owns two kinds of background machinery, both daemonic in
//! spirit (they die with the engine) and both torn down explicitly by
//! `shutdown`:
//!
//! - [`WorkerPool`]: a small fixed pool of worker threads fed by an
//!   unbounded channel. Refresh reloads and parallel `get_all` fallback
//!   loads run here so caller threads are never blocked by background
//!   work.
//! - [`Periodic`]: one thread per fixed-rate task (expiration sweep,
//!   refresh pass). The thread sleeps on a condvar with a timeout, so
//!   shutdown wakes it immediately instead of waiting out the period.

use core::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of worker threads draining a job channel.
pub(crate) struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers named `{name}-{i}`.
    pub(crate) fn new(name: &str, threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || {
                        // Runs until the channel closes at shutdown.
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                        trace!("worker exiting");
                    })
                    .expect("spawn worker thread")
            })
            .collect();
        WorkerPool {
            sender: Some(sender),
            workers,
        }
    }

    /// Queues a job. Jobs submitted after shutdown are dropped.
    pub(crate) fn execute<F: FnOnce() + Send + 'static>(&self, job: F) {
        if let Some(sender) = &self.sender {
            if sender.send(Box::new(job)).is_err() {
                debug!("worker pool is shut down, dropping job");
            }
        }
    }

    /// Closes the channel and joins every worker. Queued jobs finish
    /// first; this is what makes shutdown graceful rather than abortive.
    pub(crate) fn shutdown(&mut self) {
        if self.sender.take().is_some() {
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("running", &self.sender.is_some())
            .finish()
    }
}

struct StopFlag {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// A fixed-rate background task on its own named thread.
pub(crate) struct Periodic {
    stop: Arc<StopFlag>,
    handle: Option<JoinHandle<()>>,
}

impl Periodic {
    /// Spawns a thread running `task` every `period` until shutdown. The
    /// first run happens one period after the spawn, not immediately.
    pub(crate) fn spawn<F>(name: &str, period: Duration, task: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(StopFlag {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                let mut stopped = thread_stop.stopped.lock();
                if !*stopped {
                    thread_stop.wake.wait_for(&mut stopped, period);
                }
                if *stopped {
                    trace!("periodic task exiting");
                    return;
                }
                drop(stopped);
                task();
            })
            .expect("spawn periodic thread");
        Periodic {
            stop,
            handle: Some(handle),
        }
    }

    /// Cancels the task and joins its thread.
    pub(crate) fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            *self.stop.stopped.lock() = true;
            self.stop.wake.notify_all();
            let _ = handle.join();
        }
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Periodic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Periodic")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_pool_runs_jobs() {
        let pool = WorkerPool::new("test-worker", 4);
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = unbounded();
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            let done = done_tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::Relaxed);
                let _ = done.send(());
            });
        }
        for _ in 0..32 {
            done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("job completed");
        }
        assert_eq!(counter.load(Ordering::Relaxed), 32);
    }

    #[test]
    fn test_pool_shutdown_drains_queue() {
        let mut pool = WorkerPool::new("drain-worker", 1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.execute(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 8);
        // Post-shutdown submissions are dropped, not panicking.
        pool.execute(|| unreachable!("job after shutdown"));
    }

    #[test]
    fn test_periodic_ticks_and_stops() {
        let counter = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::clone(&counter);
        let mut periodic = Periodic::spawn("test-tick", Duration::from_millis(10), move || {
            ticks.fetch_add(1, Ordering::Relaxed);
        });
        std::thread::sleep(Duration::from_millis(200));
        periodic.shutdown();
        let observed = counter.load(Ordering::Relaxed);
        assert!(observed >= 3, "expected several ticks, got {observed}");

        // No more ticks after shutdown.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::Relaxed), observed);
    }

    #[test]
    fn test_periodic_shutdown_is_prompt() {
        let mut periodic = Periodic::spawn("slow-tick", Duration::from_secs(3_600), || {});
        let start = std::time::Instant::now();
        periodic.shutdown();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
