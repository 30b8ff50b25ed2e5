//! Fixed-size coroutine pool rendering prerender jobs.
//!
//! Workers share one job queue; every job produces exactly one message on the
//! results queue, a caught panic included, so the coordinator can count
//! outstanding jobs without timeouts.

use crate::pipeline::panic_message;
use may::sync::mpsc;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of one job: the worker's output, or the panic message.
pub(crate) type JobResult<J, R> = (J, Result<R, String>);

pub(crate) struct RenderPool<J, R> {
    sender: Option<mpsc::Sender<J>>,
    results: mpsc::Receiver<JobResult<J, R>>,
    workers: usize,
}

impl<J, R> RenderPool<J, R>
where
    J: Clone + Send + 'static,
    R: Send + 'static,
{
    /// Spawn `workers` coroutines running `work` on every submitted job.
    ///
    /// Fails only when no worker could be spawned at all.
    pub(crate) fn start<F>(workers: usize, stack_size: usize, work: F) -> io::Result<Self>
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::channel::<J>();
        let (result_tx, result_rx) = mpsc::channel::<JobResult<J, R>>();
        let rx = Arc::new(rx);
        let work = Arc::new(work);

        info!(workers, stack_size, "Starting prerender workers");

        let mut spawned = 0;
        let mut last_error = None;
        for worker_id in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let work = Arc::clone(&work);
            let result_tx = result_tx.clone();

            // SAFETY: the worker owns its queue handles and the shared closure;
            // nothing borrowed from this stack frame escapes into it.
            #[allow(unsafe_code)]
            let spawn_result = unsafe {
                may::coroutine::Builder::new()
                    .name(format!("prerender-{worker_id}"))
                    .stack_size(stack_size)
                    .spawn(move || {
                        debug!(worker_id, "Prerender worker started");
                        while let Ok(job) = rx.recv() {
                            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                                || work(job.clone()),
                            ))
                            .map_err(|panic| panic_message(panic.as_ref()));
                            if let Err(message) = &outcome {
                                error!(worker_id, panic_message = %message, "Prerender job panicked");
                            }
                            if result_tx.send((job, outcome)).is_err() {
                                break;
                            }
                        }
                        debug!(worker_id, "Prerender worker exiting");
                    })
            };
            match spawn_result {
                Ok(_) => spawned += 1,
                Err(e) => {
                    error!(worker_id, error = %e, "Failed to spawn prerender worker");
                    last_error = Some(e);
                }
            }
        }

        if spawned == 0 {
            return Err(last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no prerender workers")));
        }

        Ok(Self {
            sender: Some(tx),
            results: result_rx,
            workers: spawned,
        })
    }

    #[must_use]
    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a job. Returns false once the pool has been shut down.
    pub(crate) fn submit(&self, job: J) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|tx| tx.send(job).is_ok())
    }

    /// Block until a worker finishes a job. `None` when every worker has exited.
    pub(crate) fn next_result(&self) -> Option<JobResult<J, R>> {
        self.results.recv().ok()
    }

    /// Close the job queue; idle workers exit.
    pub(crate) fn shutdown(&mut self) {
        self.sender.take();
    }
}

impl<J, R> Drop for RenderPool<J, R> {
    fn drop(&mut self) {
        self.sender.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_job_yields_one_result() {
        let mut pool = RenderPool::start(3, 0x10000, |n: u32| n * 2).unwrap();
        assert_eq!(pool.workers(), 3);
        for n in 0..10 {
            assert!(pool.submit(n));
        }
        let mut doubled: Vec<u32> = (0..10)
            .map(|_| pool.next_result().unwrap().1.unwrap())
            .collect();
        doubled.sort_unstable();
        assert_eq!(doubled, (0..10).map(|n| n * 2).collect::<Vec<_>>());
        pool.shutdown();
        assert!(!pool.submit(1));
    }

    #[test]
    fn test_panicking_job_reports_message() {
        let pool = RenderPool::start(1, 0x10000, |n: u32| {
            if n == 1 {
                panic!("bad page");
            }
            n
        })
        .unwrap();
        pool.submit(1);
        pool.submit(2);
        let first = pool.next_result().unwrap();
        assert_eq!(first.0, 1);
        assert_eq!(first.1.unwrap_err(), "bad page");
        assert_eq!(pool.next_result().unwrap().1.unwrap(), 2);
    }
}
