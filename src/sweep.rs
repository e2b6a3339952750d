//! Independent simulation runs on a pool of worker threads.
//!
//! Every job builds and owns its own [`Network`](crate::network::network::Network); nothing mutable is shared
//! between jobs, and results are only collected once a job is complete.
use std::sync::mpsc::{self, Receiver, TryRecvError};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::SimError;

/// A pool of worker threads executing independent jobs.
pub struct JobServer {
    pool: ThreadPool,
}

impl JobServer {
    /// Create a job server with the given number of workers (0 for one per logical core).
    pub fn new(num_threads: usize) -> Result<Self, SimError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("sim-worker-{}", i))
            .panic_handler(|_| log::error!("A simulation job panicked"))
            .build()
            .map_err(|e| SimError::JobFailed(e.to_string()))?;
        Ok(JobServer { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Submit a job to the pool, returning immediately.
    pub fn submit<F, R>(&self, job: F) -> Job<R>
    where
        F: FnOnce() -> Result<R, SimError> + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        self.pool.spawn(move || {
            // The receiver may have been dropped, in which case nobody waits for the result
            let _ = sender.send(job());
        });
        Job { receiver }
    }

    /// Run `f` on every parameter with the workers of the pool. See [`sweep`].
    pub fn sweep<P, R, F>(&self, params: &[P], f: F) -> Vec<Result<R, SimError>>
    where
        P: Sync,
        R: Send,
        F: Fn(&P) -> Result<R, SimError> + Send + Sync,
    {
        self.pool.install(|| sweep(params, f))
    }
}

impl std::fmt::Debug for JobServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobServer")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

/// The pending result of a submitted job.
#[derive(Debug)]
pub struct Job<R> {
    receiver: Receiver<Result<R, SimError>>,
}

impl<R> Job<R> {
    /// Block until the job is complete and return its result.
    /// Returns an error if the job failed or terminated without a result (e.g., it panicked).
    pub fn wait(self) -> Result<R, SimError> {
        self.receiver.recv().map_err(|_| {
            SimError::JobFailed("The job terminated without a result".to_string())
        })?
    }

    /// Returns the result of the job if it is complete, without blocking.
    pub fn try_wait(&self) -> Option<Result<R, SimError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SimError::JobFailed(
                "The job terminated without a result".to_string(),
            ))),
        }
    }
}

/// Run `f` on every parameter in parallel, on the global pool.
/// The results are returned in the order of the parameters, whatever the order of completion.
pub fn sweep<P, R, F>(params: &[P], f: F) -> Vec<Result<R, SimError>>
where
    P: Sync,
    R: Send,
    F: Fn(&P) -> Result<R, SimError> + Send + Sync,
{
    params.par_iter().map(|p| f(p)).collect()
}
