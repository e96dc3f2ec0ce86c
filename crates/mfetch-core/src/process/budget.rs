//! Global ceiling on simultaneous external processes.
//!
//! Every worker reserves a slot from this budget before spawning a tool and
//! releases it when the tool exits, so total concurrency stays under the
//! configured limit even if several stages of different jobs overlap.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};

/// Shared process budget with an in-use gauge and a high-water mark.
#[derive(Debug)]
pub struct ProcessBudget {
    max_total: usize,
    slots: Semaphore,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl ProcessBudget {
    /// Create a budget with the given maximum simultaneous processes (e.g. worker count).
    pub fn new(max_total: usize) -> Self {
        let max_total = max_total.max(1);
        Self {
            max_total,
            slots: Semaphore::new(max_total),
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    /// Number of processes currently holding a slot.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Highest `in_use` value observed since creation.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Waits for a free slot. Returns `None` once the budget is closed.
    pub async fn acquire(&self) -> Option<ProcessPermit<'_>> {
        let permit = self.slots.acquire().await.ok()?;
        let now = self.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        Some(ProcessPermit {
            budget: self,
            _permit: permit,
        })
    }

    /// Stop handing out slots; pending and future `acquire` calls return `None`.
    pub fn close(&self) {
        self.slots.close();
    }
}

/// Releases the reserved slot when dropped.
pub struct ProcessPermit<'a> {
    budget: &'a ProcessBudget,
    _permit: SemaphorePermit<'a>,
}

impl Drop for ProcessPermit<'_> {
    fn drop(&mut self) {
        self.budget.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}
