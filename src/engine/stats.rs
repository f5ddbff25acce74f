//! Progress counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of engine progress.
///
/// Built from independent atomic reads, so the fields are not mutually
/// consistent. `queued` is an upper bound: it includes pending retries and
/// producers currently blocked on a full channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub queued: u64,
    pub in_flight: u64,
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl Stats {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.in_flight == 0
    }
}

/// Lock-free counters shared by producers, workers and timers.
///
/// `outstanding` counts live items wherever they are (channel, worker or
/// retry timer). Each stage increments before the previous one decrements,
/// and `outstanding` only drops when an item is retired, so a zero reading
/// is exact even though the per-stage counters are read independently.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    outstanding: AtomicI64,
    buffered: AtomicI64,
    in_flight: AtomicI64,
    processed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Counters {
    /// A new item entered the engine and is headed for the channel.
    pub fn admitted(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.buffered.fetch_add(1, Ordering::SeqCst);
    }

    /// A live item is headed back into the channel.
    pub fn readmitted(&self) {
        self.buffered.fetch_add(1, Ordering::SeqCst);
    }

    /// A send into the channel did not happen.
    pub fn unbuffered(&self) {
        self.buffered.fetch_sub(1, Ordering::SeqCst);
    }

    /// Moves one item from buffered to in-flight.
    pub fn dequeued(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.buffered.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn succeeded(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.retired();
    }

    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::SeqCst);
    }

    /// An item left the engine for good.
    pub fn retired(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, pending_timers: usize) -> Stats {
        let buffered = self.buffered.load(Ordering::SeqCst).max(0) as u64;
        Stats {
            queued: buffered + pending_timers as u64,
            in_flight: self.in_flight.load(Ordering::SeqCst).max(0) as u64,
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
        }
    }
}
