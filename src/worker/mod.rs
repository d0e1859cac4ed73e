//! Job execution machinery
//!
//! - [`WorkerPool`]: fixed-size pool over one bounded queue
//! - [`BatchProcessor`]: named job groups with aggregate status
//! - [`TransactionStats`]: lock-free counters updated by workers
//! - [`CancelToken`]: caller-side cancellation for submit and wait

pub mod batch;
pub mod cancel;
pub mod job;
pub mod pool;
pub mod stats;

pub use batch::{Batch, BatchProcessor, BatchStatus, BatchTicket};
pub use cancel::CancelToken;
pub use job::{Job, JobExecutor, JobResult};
pub use pool::{JobTicket, WorkerPool};
pub use stats::{JobCounts, TransactionStats, TransactionStatsSnapshot};
