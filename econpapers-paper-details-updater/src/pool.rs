use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, PoisonError,
    },
    thread,
};

use econpapers_common::{
    http::PageSource,
    retry::{RetryError, RetryPolicy, SleepRange},
    FetchError, PaperKey,
};
use indicatif::ProgressBar;
use log::{debug, error, info, warn};

use crate::{
    detail::parse_detail,
    plan::WorkItem,
    shared::{Merge, SharedStore},
};

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub threads: usize,
    pub pacing: SleepRange,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedItem {
    pub key: PaperKey,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct PoolReport {
    pub merged: usize,
    /// Merged, but the page had no abstract; queued again on the next run.
    pub without_abstract: usize,
    pub kept_existing: usize,
    pub failed: Vec<FailedItem>,
    /// Items never finished because the stop flag was raised.
    pub left_queued: usize,
}

struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
}

impl WorkQueue {
    fn new(items: Vec<WorkItem>) -> Self {
        WorkQueue {
            items: Mutex::new(items.into()),
        }
    }

    fn pop(&self) -> Option<WorkItem> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }

    fn push_back(&self, item: WorkItem) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).push_back(item);
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct Worker<'a, S: PageSource + ?Sized> {
    source: &'a S,
    queue: &'a WorkQueue,
    shared: &'a SharedStore,
    stop: &'a AtomicBool,
    config: &'a PoolConfig,
    report: &'a Mutex<PoolReport>,
    progress: &'a ProgressBar,
}

enum Outcome {
    Merged { has_abstract: bool },
    KeptExisting,
    Failed(FailedItem),
    Cancelled,
}

impl<S: PageSource + ?Sized> Worker<'_, S> {
    fn run(&self, id: usize) {
        debug!("Worker {} started", id);
        while !self.stop.load(Ordering::SeqCst) {
            let Some(item) = self.queue.pop() else {
                break;
            };
            if self.shared.is_done(&item.key) {
                self.record(Outcome::KeptExisting);
                continue;
            }
            if !self.config.pacing.pause(Some(self.stop)) {
                self.queue.push_back(item);
                break;
            }
            let outcome = self.process(item);
            self.record(outcome);
        }
        debug!("Worker {} finished", id);
    }

    fn process(&self, item: WorkItem) -> Outcome {
        let WorkItem { key, record } = item;
        let label = format!("paper {}", key);
        let result = self.config.retry.run(&label, Some(self.stop), |attempt| {
            debug!("Fetching {} (attempt {})", key, attempt);
            self.source
                .fetch_page(key.as_str())
                .and_then(|html| parse_detail(&html).map_err(FetchError::Parse))
        });

        match result {
            Ok(details) => {
                let enriched = details.into_record(record);
                let has_abstract = enriched.is_done();
                if !has_abstract {
                    warn!("No abstract found for {}", key);
                }
                match self.shared.merge(key, enriched) {
                    Merge::Inserted => Outcome::Merged { has_abstract },
                    Merge::KeptExisting => Outcome::KeptExisting,
                }
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!("Failed to fetch {} after {} attempts: {}", key, attempts, last);
                if last.is_rate_limited() {
                    warn!("The catalog is rate limiting requests; consider a longer --min-sleep.");
                }
                Outcome::Failed(FailedItem {
                    key,
                    attempts,
                    error: last.to_string(),
                })
            }
            Err(RetryError::Cancelled { attempts, .. }) => {
                info!(
                    "Stopped {} after {} attempts; it stays queued for the next run.",
                    key, attempts
                );
                Outcome::Cancelled
            }
        }
    }

    fn record(&self, outcome: Outcome) {
        let mut report = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Outcome::Merged { has_abstract } => {
                report.merged += 1;
                if !has_abstract {
                    report.without_abstract += 1;
                }
            }
            Outcome::KeptExisting => report.kept_existing += 1,
            Outcome::Failed(item) => report.failed.push(item),
            Outcome::Cancelled => {
                report.left_queued += 1;
                return;
            }
        }
        self.progress.inc(1);
        self.progress.set_message(format!(
            "merged: {}, failed: {}",
            report.merged,
            report.failed.len()
        ));
    }
}

pub fn run_pool<S: PageSource + ?Sized>(
    source: &S,
    items: Vec<WorkItem>,
    shared: &SharedStore,
    stop: &AtomicBool,
    config: &PoolConfig,
    progress: &ProgressBar,
) -> PoolReport {
    let queue = WorkQueue::new(items);
    let report = Mutex::new(PoolReport::default());
    let worker = Worker {
        source,
        queue: &queue,
        shared,
        stop,
        config,
        report: &report,
        progress,
    };

    thread::scope(|scope| {
        let mut started = 0;
        for id in 0..config.threads.max(1) {
            let worker = &worker;
            let spawned = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn_scoped(scope, move || worker.run(id));
            match spawned {
                Ok(_) => started += 1,
                Err(e) => error!("Failed to start worker {}: {}", id, e),
            }
        }
        if started == 0 {
            warn!("No worker threads could be started; processing on the main thread.");
            worker.run(0);
        }
    });

    let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.left_queued += queue.len();
    report
}
