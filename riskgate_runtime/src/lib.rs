//! riskgate runtime layer - state storage, worker pool and metrics.
//!
//! This crate provides the runtime services the execution coordinator is
//! built on:
//!
//! - [`store`]: versioned, atomic workflow state storage
//! - [`pool`]: global worker pool bounding concurrent stage invocations
//! - [`metrics`]: lock-free engine counters

pub mod metrics;
pub mod pool;
pub mod store;

pub use metrics::{EngineMetrics, MetricKind, MetricsSummary};
pub use pool::{WorkerPermit, WorkerPool, DEFAULT_MAX_CONCURRENCY};
pub use store::{InMemoryStateStore, StateStore, StoreError, StoreResult};
