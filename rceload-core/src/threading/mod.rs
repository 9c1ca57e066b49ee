//! Threading runtime
//!
//! Uses native OS threads (std::thread). Each worker runs one dispatcher and
//! returns its own statistics; nothing is shared between workers while they
//! run.

use crate::Result;
use std::sync::{Arc, Barrier};
use std::thread;

/// Spawns a fixed number of workers that start together
pub struct ThreadingRuntime {
    num_threads: usize,
}

impl ThreadingRuntime {
    pub fn new(num_threads: usize) -> Self {
        Self { num_threads: num_threads.max(1) }
    }

    /// Run `worker_factory(thread_id)` on every thread and collect the results
    ///
    /// All threads wait on a barrier before running, so they start at the
    /// same moment. Results are returned in thread id order; the first worker
    /// error or panic fails the whole call after every thread has finished.
    pub fn run_workers<T, F>(&self, worker_factory: F) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(usize) -> Result<T> + Send + Sync + Clone + 'static,
    {
        let barrier = Arc::new(Barrier::new(self.num_threads));
        let mut handles = Vec::with_capacity(self.num_threads);

        for thread_id in 0..self.num_threads {
            let worker_factory = worker_factory.clone();
            let barrier = barrier.clone();

            let handle = thread::Builder::new()
                .name(format!("rceload-worker-{thread_id}"))
                .spawn(move || {
                    barrier.wait();
                    worker_factory(thread_id)
                })?;
            handles.push(handle);
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(crate::Error::Other(format!("Thread panicked: {e:?}")));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}
