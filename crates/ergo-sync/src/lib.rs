//! Incremental and realtime synchronization of tenant sources into the reporting store.

use ergo_adapters::ExtractError;
use ergo_core::{Domain, RecordFamily};
use ergo_storage::StorageError;
use thiserror::Error;

pub mod config;
pub mod driver;
pub mod fanout;
pub mod orchestrator;
pub mod transform;
pub mod window;

pub use config::{SourceMode, SyncConfig, TenantSource};
pub use driver::{Driver, PassReport};
pub use fanout::{extract_all, ExtractMode, ExtractedBatch};
pub use orchestrator::{CycleOutcome, DomainOrchestrator, RealtimeOutcome};
pub use transform::{transform_batches, RowRejected, TransformOutput};
pub use window::{next_window, should_skip, OffsetUnit, WindowOffset, WindowOverflow};

pub const CRATE_NAME: &str = "ergo-sync";

/// Failure of one domain cycle. Nothing after the failing step is written.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("extracting {family} for tenant {tenant}: {source}")]
    Source {
        tenant: String,
        family: RecordFamily,
        #[source]
        source: ExtractError,
    },
    #[error("next {domain} window: {source}")]
    Window {
        domain: Domain,
        #[source]
        source: WindowOverflow,
    },
    #[error("extraction task panicked: {0}")]
    TaskPanicked(String),
    #[error("writing {domain} documents: {source}")]
    Sink {
        domain: Domain,
        #[source]
        source: StorageError,
    },
    #[error("checkpoint store for {domain}: {source}")]
    Checkpoint {
        domain: Domain,
        #[source]
        source: StorageError,
    },
}
