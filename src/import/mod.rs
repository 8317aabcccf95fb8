//! Batched CSV import pipeline.
//!
//! # Architecture
//!
//! ```text
//! RowSource -> RowValidator -> strategy build -> UpsertResolver -> BatchWriter -> store
//!                                                  |  ReferenceCache
//!                                                  |  DuplicateKeyIndex
//! ```
//!
//! - [`source`]: lazy CSV reader with header mapping and cancellation
//! - [`validate`]: trimming, required fields, max lengths, typed parsers
//! - [`cache`]: per-run foreign-key verdicts and claimed composite keys
//! - [`resolver`]: insert / update / skip decisions
//! - [`batch`]: staged writes and transactional flushes
//! - [`coordinator`]: the run loop and progress accounting
//! - [`dispatcher`]: entity name lookup
//!
//! One entity is imported per run. Rows are processed strictly in file
//! order so that cache state from one row is visible to the next.

pub mod batch;
pub mod cache;
pub mod coordinator;
pub mod dispatcher;
pub mod resolver;
pub mod source;
pub mod stats;
pub mod strategy;
pub mod validate;

pub use batch::{BatchWriter, PendingWrites};
pub use coordinator::{ImportPipeline, PipelineOptions};
pub use dispatcher::Dispatcher;
pub use stats::{ImportReport, RunCounters};

use tokio_util::sync::CancellationToken;

use crate::error::{ImportError, ImportResult};

pub(crate) fn ensure_live(cancel: &CancellationToken) -> ImportResult<()> {
    if cancel.is_cancelled() {
        return Err(ImportError::Cancelled);
    }
    Ok(())
}
