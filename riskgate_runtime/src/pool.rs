//! Worker pool bounding concurrent stage invocations.
//!
//! A single semaphore is shared by every workflow driven by one coordinator,
//! so the global number of in-flight stages never exceeds its capacity.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of worker permits.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Semaphore-based worker pool.
///
/// # Examples
///
/// ```no_run
/// use riskgate_runtime::pool::WorkerPool;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let pool = WorkerPool::new(4);
///
/// let _permit = pool.acquire("analyze").await?;
/// // invoke the stage while holding the permit
/// #     Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Creates a pool with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a free worker.
    ///
    /// The permit is released when dropped. Fails only after [`close`](Self::close).
    pub async fn acquire(&self, holder: impl Into<String>) -> anyhow::Result<WorkerPermit> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(WorkerPermit {
            _permit: permit,
            holder: holder.into(),
        })
    }

    /// Tries to take a worker without waiting.
    pub fn try_acquire(&self, holder: impl Into<String>) -> Option<WorkerPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| WorkerPermit {
                _permit: permit,
                holder: holder.into(),
            })
    }

    /// Number of free workers.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Total number of workers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Closes the pool; pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

/// A held worker slot, returned to the pool on drop.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    holder: String,
}

impl WorkerPermit {
    /// Name of whatever holds the permit (usually a stage id).
    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl std::fmt::Debug for WorkerPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPermit")
            .field("holder", &self.holder)
            .finish()
    }
}
