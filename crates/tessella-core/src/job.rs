//! Job System
//!
//! Worker-thread pool used by the asynchronous page provider. Jobs are
//! closures pushed onto a shared injector queue; idle workers park on a
//! condition variable and are woken per submission. Threads are joined when
//! the system is dropped.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Injector<Job>,
    pending: AtomicUsize,
    shutdown: AtomicBool,
    signal: Mutex<()>,
    job_available: Condvar,
}

/// A fixed pool of worker threads executing submitted closures.
pub struct JobSystem {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Spawn a job system with the given number of worker threads (at least
    /// one).
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        let shared = Arc::new(Shared {
            queue: Injector::new(),
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            signal: Mutex::new(()),
            job_available: Condvar::new(),
        });

        let workers = (0..num_workers)
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("tessella-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        log::info!("New job system created with {} workers", num_workers);
        Self { shared, workers }
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Submit a closure for execution on a worker thread.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.queue.push(Box::new(job));
        self.shared.job_available.notify_one();
    }

    /// Jobs submitted but not yet finished.
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Block the calling thread until every submitted job has finished.
    pub fn wait_idle(&self) {
        while self.shared.pending.load(Ordering::Acquire) > 0 {
            std::thread::yield_now();
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.job_available.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        match shared.queue.steal() {
            Steal::Success(job) => {
                job();
                shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
            Steal::Retry => continue,
            Steal::Empty => {
                // Park with a timeout so a missed notification cannot hang
                // the worker past shutdown.
                let mut guard = shared.signal.lock();
                let _ = shared
                    .job_available
                    .wait_for(&mut guard, Duration::from_millis(20));
            }
        }
    }
}
