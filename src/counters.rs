//! Run-wide progress counters, shared by every ingestion worker.

use std::sync::Mutex;

/// A mutex-guarded integer cell. Contention is negligible next to the
/// database round-trips the workers spend their time on.
#[derive(Debug, Default)]
pub struct SharedCounter {
    value: Mutex<u64>,
}

impl SharedCounter {
    pub fn increment(&self) {
        *self.value.lock().expect("counter mutex poisoned") += 1;
    }

    pub fn value(&self) -> u64 {
        *self.value.lock().expect("counter mutex poisoned")
    }
}

/// The three counters a run reports progress with.
#[derive(Debug, Default)]
pub struct IngestCounters {
    /// Blocks drained from the queue, whether or not they produced rows.
    pub blocks_processed: SharedCounter,
    /// Blocks with no extractable range.
    pub blocks_skipped: SharedCounter,
    /// Inserts lost to another worker in a check-then-insert race.
    pub duplicates: SharedCounter,
}
