//! In-process collaborators: broker, backup log, storage, copy and job
//! services kept in memory. Every one can be told to fail its next calls.

mod backup;
mod broker;
mod job;

use std::sync::atomic::{AtomicU32, Ordering};

use cirrus_api::error::ServiceError;

pub use backup::{MemoryBackupLog, MemoryCopyService, MemoryStorage};
pub use broker::MemoryBroker;
pub use job::MemoryJobService;

/// Countdown of injected transient failures.
#[derive(Debug, Default)]
struct Faults {
    remaining: AtomicU32,
}

impl Faults {
    fn arm(&self, count: u32) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Fail with a transient error while armed.
    fn check(&self, operation: &str) -> Result<(), ServiceError> {
        let armed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(ServiceError::transient(format!("{operation}: injected failure")));
        }
        Ok(())
    }
}
