//! Update Scheduler
//!
//! Writes to reactive state happen synchronously, but watchers do not run
//! at write time. A notified watcher queues itself here and runs during the
//! next [`Scheduler::flush`], so several writes in a row cost one re-run.
//!
//! # Algorithm
//!
//! 1. Notified jobs are queued, keyed by subscriber ID. Queuing a job that is
//!    already pending is a no-op.
//! 2. A flush pops the pending job with the smallest ID (the one registered
//!    first) and runs it, until the queue is empty. Jobs queued while the
//!    flush runs are picked up by the same flush.
//! 3. A job that keeps re-queuing itself is dropped for the rest of the
//!    flush after [`RECURSION_LIMIT`] runs.
//!
//! Asynchronous trigger reactions are parked here as well; [`Scheduler::settle`]
//! drives them to completion.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::subscriber::SubscriberId;

/// Maximum number of times one job may run within a single flush.
pub const RECURSION_LIMIT: usize = 100;

/// A unit of work the scheduler can run.
pub trait Job: Send + Sync {
    /// Identifies the job; also its position in the run order.
    fn job_id(&self) -> SubscriberId;

    /// Whether the job still wants to run. Stopped jobs are skipped.
    fn is_active(&self) -> bool;

    /// Run the job.
    fn run(&self);
}

/// Queue of pending jobs plus the reactions they left in flight.
///
/// Cloning a scheduler yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    queue: Mutex<BTreeMap<SubscriberId, Arc<dyn Job>>>,
    flushing: AtomicBool,
    reactions: Mutex<Vec<BoxFuture<'static, ()>>>,
    in_flight: AtomicUsize,
}

impl Scheduler {
    /// Create a scheduler with an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job for the next flush.
    pub fn queue(&self, job: Arc<dyn Job>) {
        self.inner.queue.lock().entry(job.job_id()).or_insert(job);
    }

    /// Number of jobs waiting for a flush.
    pub fn pending_jobs(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Number of asynchronous reactions that have not completed yet.
    pub fn pending_reactions(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Run queued jobs until the queue is empty.
    ///
    /// Calling `flush` from inside a running job does nothing; the outer
    /// flush picks up whatever the job queued.
    pub fn flush(&self) {
        if self.inner.flushing.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut runs: HashMap<SubscriberId, usize> = HashMap::new();
        let mut total = 0usize;

        loop {
            let next = self.inner.queue.lock().pop_first();
            let Some((id, job)) = next else {
                break;
            };

            let count = runs.entry(id).or_insert(0);
            *count += 1;
            if *count > RECURSION_LIMIT {
                if *count == RECURSION_LIMIT + 1 {
                    warn!(
                        job = id.raw(),
                        limit = RECURSION_LIMIT,
                        "job keeps re-queuing itself; skipping it for the rest of this flush"
                    );
                }
                continue;
            }
            if !job.is_active() {
                continue;
            }

            trace!(job = id.raw(), "running job");
            guarded("watcher", || job.run());
            total += 1;
        }

        self.inner.flushing.store(false, Ordering::SeqCst);
        if total > 0 {
            debug!(jobs = total, "flush complete");
        }
    }

    /// Park an asynchronous reaction until the next [`settle`](Self::settle).
    pub fn spawn<F>(&self, reaction: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let wrapped = async move {
            if let Err(payload) = AssertUnwindSafe(reaction).catch_unwind().await {
                error!(panic = %panic_message(&*payload), "reaction panicked");
            }
            inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        };
        self.inner.reactions.lock().push(wrapped.boxed());
    }

    /// Flush, then drive every parked reaction to completion, repeating
    /// until no job is queued and no reaction is in flight.
    pub async fn settle(&self) {
        loop {
            self.flush();
            let batch = std::mem::take(&mut *self.inner.reactions.lock());
            if batch.is_empty() {
                break;
            }
            debug!(reactions = batch.len(), "awaiting reactions");
            future::join_all(batch).await;
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending_jobs", &self.pending_jobs())
            .field("pending_reactions", &self.pending_reactions())
            .finish()
    }
}

/// Run a user callback, logging a panic instead of propagating it.
///
/// Returns `None` if the callback panicked.
pub(crate) fn guarded<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            error!(callback = what, panic = %panic_message(&*payload), "callback panicked");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    struct Recorder {
        id: SubscriberId,
        log: Arc<Mutex<Vec<u64>>>,
        runs: AtomicI32,
        active: AtomicBool,
        requeue: Option<Scheduler>,
    }

    impl Recorder {
        fn new(log: &Arc<Mutex<Vec<u64>>>) -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                log: Arc::clone(log),
                runs: AtomicI32::new(0),
                active: AtomicBool::new(true),
                requeue: None,
            })
        }
    }

    impl Job for Recorder {
        fn job_id(&self) -> SubscriberId {
            self.id
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(self.id.raw());
            if let Some(scheduler) = &self.requeue {
                scheduler.queue(Arc::new(Recorder {
                    id: self.id,
                    log: Arc::clone(&self.log),
                    runs: AtomicI32::new(0),
                    active: AtomicBool::new(true),
                    requeue: Some(scheduler.clone()),
                }));
            }
        }
    }

    #[test]
    fn flush_runs_jobs_in_registration_order() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Recorder::new(&log);
        let second = Recorder::new(&log);

        scheduler.queue(second.clone());
        scheduler.queue(first.clone());
        scheduler.flush();

        assert_eq!(*log.lock(), vec![first.id.raw(), second.id.raw()]);
    }

    #[test]
    fn queue_deduplicates_pending_jobs() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let job = Recorder::new(&log);

        scheduler.queue(job.clone());
        scheduler.queue(job.clone());
        assert_eq!(scheduler.pending_jobs(), 1);

        scheduler.flush();
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    #[test]
    fn flush_skips_inactive_jobs() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let job = Recorder::new(&log);
        job.active.store(false, Ordering::SeqCst);

        scheduler.queue(job.clone());
        scheduler.flush();

        assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn flush_stops_runaway_jobs() {
        let scheduler = Scheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let job = Arc::new(Recorder {
            id: SubscriberId::new(),
            log: Arc::clone(&log),
            runs: AtomicI32::new(0),
            active: AtomicBool::new(true),
            requeue: Some(scheduler.clone()),
        });

        scheduler.queue(job);
        scheduler.flush();

        assert_eq!(log.lock().len(), RECURSION_LIMIT);
        assert_eq!(scheduler.pending_jobs(), 0);
    }

    #[test]
    fn guarded_reports_panics() {
        assert_eq!(guarded("test", || 7), Some(7));
        assert_eq!(guarded("test", || -> i32 { panic!("boom") }), None);
    }

    #[tokio::test]
    async fn settle_drives_spawned_reactions() {
        let scheduler = Scheduler::new();
        let done = Arc::new(AtomicI32::new(0));
        let done_clone = done.clone();

        scheduler.spawn(async move {
            done_clone.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.spawn(async {
            panic!("reaction failed");
        });
        assert_eq!(scheduler.pending_reactions(), 2);

        scheduler.settle().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_reactions(), 0);
    }
}
