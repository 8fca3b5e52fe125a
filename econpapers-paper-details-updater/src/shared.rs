use std::{
    path::Path,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use econpapers_common::{store, EnrichedRecord, EnrichmentStore, PaperKey, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Inserted,
    KeptExisting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Count,
    Interval,
    Closed,
}

pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub records: usize,
    pub merges: usize,
}

struct State {
    records: EnrichmentStore,
    unsaved: usize,
    closed: bool,
}

/// One lock covers both the map and the unsaved-merge count, so a snapshot
/// always matches the count it resets.
pub struct SharedStore {
    state: Mutex<State>,
    wake: Condvar,
    checkpoint_every: usize,
}

impl SharedStore {
    pub fn new(records: EnrichmentStore, checkpoint_every: usize) -> Self {
        SharedStore {
            state: Mutex::new(State {
                records,
                unsaved: 0,
                closed: false,
            }),
            wake: Condvar::new(),
            checkpoint_every: checkpoint_every.max(1),
        }
    }

    // Poisoning is ignored: the final checkpoint has to read the map anyway.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_done(&self, key: &PaperKey) -> bool {
        self.lock().records.get(key).map_or(false, EnrichedRecord::is_done)
    }

    pub fn merge(&self, key: PaperKey, record: EnrichedRecord) -> Merge {
        let mut state = self.lock();
        if state.records.get(&key).map_or(false, EnrichedRecord::is_done) {
            return Merge::KeptExisting;
        }
        state.records.insert(key, record);
        state.unsaved += 1;
        if state.unsaved >= self.checkpoint_every {
            self.wake.notify_all();
        }
        Merge::Inserted
    }

    pub fn snapshot(&self, path: &Path) -> Result<Snapshot> {
        let mut state = self.lock();
        let bytes = store::to_pretty_json(&state.records, path)?;
        let merges = std::mem::take(&mut state.unsaved);
        Ok(Snapshot {
            bytes,
            records: state.records.len(),
            merges,
        })
    }

    pub fn restore_unsaved(&self, merges: usize) {
        self.lock().unsaved += merges;
    }

    pub fn unsaved(&self) -> usize {
        self.lock().unsaved
    }

    pub fn wait_for_trigger(&self, deadline: Instant) -> Trigger {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Trigger::Closed;
            }
            if state.unsaved >= self.checkpoint_every {
                return Trigger::Count;
            }
            let now = Instant::now();
            if now >= deadline {
                return Trigger::Interval;
            }
            state = self
                .wake
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.wake.notify_all();
    }

    pub fn into_records(self) -> EnrichmentStore {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .records
    }
}
