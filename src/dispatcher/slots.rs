//! Admission control for concurrent job workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts live workers against a fixed ceiling.
#[derive(Debug)]
pub struct SlotTracker {
    active: AtomicUsize,
    max: usize,
}

impl SlotTracker {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            max,
        })
    }

    /// Claim a slot if one is free. The slot is returned when the guard drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<WorkerSlot> {
        loop {
            let current = self.active.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(WorkerSlot {
                        tracker: Arc::clone(self),
                    });
                }
                Err(_) => continue, // Retry on spurious CAS failure
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// One claimed worker slot.
///
/// Held by the worker task for its whole life, so the slot frees on every exit
/// path, including a panic.
#[derive(Debug)]
pub struct WorkerSlot {
    tracker: Arc<SlotTracker>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::Release);
    }
}
