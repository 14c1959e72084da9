//! Bounded-concurrency scheduler for opaque async jobs, shared across every upload in the
//! process.
use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// A unit of scheduled work. Jobs take no arguments and report nothing back through their
/// return value — all error handling is the job's own responsibility, matching the spec's
/// fire-and-forget job contract.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Default)]
struct Inner {
    pending: VecDeque<Job>,
    running: usize,
}

/// Bounds the number of concurrently running jobs. `enqueue` never blocks or rejects; jobs queue
/// up and run FIFO as capacity frees up.
///
/// One `JobQueue` is meant to be shared (via [`Arc`]) across every concurrent
/// [`UploadController`](crate::controller::UploadController) in the process: the queue is the
/// only process-wide mutable resource the engine introduces.
#[derive(Debug)]
pub struct JobQueue {
    concurrency: NonZeroUsize,
    inner: Mutex<Inner>,
}

impl JobQueue {
    /// Create a new queue bounding concurrently-running jobs to `concurrency`. `NonZeroUsize`
    /// makes the "reject values less than 1" requirement a type-level guarantee rather than a
    /// runtime check.
    pub fn new(concurrency: NonZeroUsize) -> Arc<Self> {
        Arc::new(Self {
            concurrency,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// The configured concurrency bound.
    pub fn concurrency(&self) -> NonZeroUsize {
        self.concurrency
    }

    /// Record `job` and attempt to start it (and any other pending jobs) immediately.
    pub fn enqueue<F>(self: &Arc<Self>, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        {
            let mut inner = self.inner.lock().expect("JobQueue mutex poisoned");
            inner.pending.push_back(Box::pin(job));
        }
        self.drain();
    }

    /// Pop and spawn as many pending jobs as `concurrency` allows. Called after every enqueue and
    /// after every job settlement, so `running` never exceeds `concurrency` and every enqueued
    /// job is eventually started exactly once.
    fn drain(self: &Arc<Self>) {
        loop {
            let job = {
                let mut inner = self.inner.lock().expect("JobQueue mutex poisoned");
                if inner.running >= self.concurrency.get() {
                    return;
                }
                let Some(job) = inner.pending.pop_front() else {
                    return;
                };
                inner.running += 1;
                job
            };

            let queue = Arc::clone(self);
            tokio::spawn(async move {
                job.await;
                let mut inner = queue.inner.lock().expect("JobQueue mutex poisoned");
                inner.running -= 1;
                drop(inner);
                queue.drain();
            });
        }
    }
}
