use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use econpapers_common::{store, Result};
use log::{debug, error, info};

use crate::shared::{SharedStore, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    MergeCount,
    Interval,
    Final,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reason::MergeCount => "merge count",
            Reason::Interval => "interval",
            Reason::Final => "final",
        })
    }
}

/// Writes snapshots of the shared store with backup rotation. Saves are
/// serialised so the `.bak` file always trails the output by exactly one save.
pub struct Checkpointer {
    path: PathBuf,
    save_lock: Mutex<()>,
    saves: AtomicUsize,
}

impl Checkpointer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Checkpointer {
            path: path.into(),
            save_lock: Mutex::new(()),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn save(&self, shared: &SharedStore, reason: Reason) -> Result<usize> {
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let start = Instant::now();
        let snapshot = shared.snapshot(&self.path)?;
        if let Err(e) = store::save_with_backup(&self.path, &snapshot.bytes) {
            shared.restore_unsaved(snapshot.merges);
            return Err(e);
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        info!(
            "Checkpoint ({}): saved {} records ({} new) to {} in {:.2}s",
            reason,
            snapshot.records,
            snapshot.merges,
            self.path.display(),
            start.elapsed().as_secs_f64()
        );
        Ok(snapshot.records)
    }
}

/// Failed saves are logged and retried at the next trigger.
pub fn run_coordinator(shared: &SharedStore, checkpointer: &Checkpointer, interval: Duration) {
    let mut deadline = Instant::now() + interval;
    loop {
        let reason = match shared.wait_for_trigger(deadline) {
            Trigger::Closed => break,
            Trigger::Count => Reason::MergeCount,
            Trigger::Interval => Reason::Interval,
        };
        if reason == Reason::Interval && shared.unsaved() == 0 {
            debug!("Checkpoint interval reached with nothing new to save.");
        } else if let Err(e) = checkpointer.save(shared, reason) {
            error!("Checkpoint failed, will retry at the next trigger: {}", e);
        }
        deadline = Instant::now() + interval;
    }
    debug!("Checkpoint coordinator stopped.");
}
