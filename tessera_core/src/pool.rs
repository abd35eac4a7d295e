use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::Receiver;
use rayon::prelude::*;

use crate::error::{Error, Result};

/// Fixed-size worker pool owned by a single context.
///
/// Dropping the pool waits until every worker thread has run its exit
/// handler, so no worker outlives the context that created it.
pub(crate) struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
    exited: Receiver<()>,
    nthreads: usize,
}

impl WorkerPool {
    pub fn new(nthreads: usize) -> Result<Self> {
        let (tx, exited) = crossbeam_channel::unbounded();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .thread_name(|i| format!("tessera-worker-{i}"))
            .exit_handler(move |_| {
                let _ = tx.send(());
            })
            .build()
            .map_err(|e| Error::InvalidParameter(format!("cannot start {nthreads} workers: {e}")))?;
        log::debug!("started worker pool with {nthreads} threads");
        Ok(Self { pool: Some(pool), exited, nthreads })
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    fn install<R: Send>(&self, job: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(job),
            None => job(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.pool.take());
        // The exit handler owns the only sender; once every worker is gone
        // the channel disconnects and recv() errors out.
        for _ in 0..self.nthreads {
            if self.exited.recv().is_err() {
                break;
            }
        }
        log::trace!("joined {} pool workers", self.nthreads);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `job(i)` for every `i` in `0..n` and return the results in index order.
///
/// Jobs run on `pool` when one is given, inline otherwise. The first error,
/// or a panic converted by `on_panic`, becomes the result of the whole call.
pub(crate) fn run_indexed<T, F, P>(pool: Option<&WorkerPool>, n: usize, job: F, on_panic: P) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync + Send,
    P: Fn(usize, String) -> Error + Sync + Send,
{
    let guarded = |i: usize| -> Result<T> {
        panic::catch_unwind(AssertUnwindSafe(|| job(i)))
            .unwrap_or_else(|payload| Err(on_panic(i, panic_message(payload))))
    };
    match pool {
        Some(pool) if n > 1 => pool.install(|| (0..n).into_par_iter().map(guarded).collect()),
        _ => (0..n).map(guarded).collect(),
    }
}
