//! Per-domain cycle: checkpoint, window, fan-out, transform, sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ergo_adapters::SourceAdapter;
use ergo_core::{Checkpoint, Domain, Window};
use ergo_storage::{CheckpointStore, DocumentSink};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::fanout::{extract_all, ExtractMode};
use crate::transform::transform_batches;
use crate::window::{next_window, should_skip, WindowOffset};
use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Window end is too recent; nothing was read or written.
    Skipped { window: Window },
    Completed {
        window: Window,
        rows: u64,
        rejected: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeOutcome {
    pub rows: u64,
    pub rejected: usize,
}

pub struct DomainOrchestrator {
    domain: Domain,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn DocumentSink>,
    offset: WindowOffset,
}

impl DomainOrchestrator {
    pub fn new(
        domain: Domain,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn DocumentSink>,
        offset: WindowOffset,
    ) -> Self {
        Self {
            domain,
            adapters,
            checkpoints,
            sink,
            offset,
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub async fn run_incremental(&self) -> Result<CycleOutcome, SyncError> {
        self.run_incremental_at(Utc::now()).await
    }

    /// One incremental cycle evaluated at `now`, which also becomes `extracted_at`.
    ///
    /// The checkpoint is written last, so any failure leaves the watermark untouched
    /// and the same window is retried next cycle.
    pub async fn run_incremental_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("incremental", %run_id, domain = %self.domain);
        self.incremental_cycle(now).instrument(span).await
    }

    async fn incremental_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, SyncError> {
        let domain = self.domain;
        let last = self
            .checkpoints
            .get_last(domain)
            .await
            .map_err(|source| SyncError::Checkpoint { domain, source })?;

        let window = next_window(last.as_ref(), domain.bootstrap_window(), self.offset)
            .map_err(|source| SyncError::Window { domain, source })?;
        if should_skip(window.end_date, now) {
            info!(%window, "window end is less than five minutes old; skipping");
            return Ok(CycleOutcome::Skipped { window });
        }

        info!(%window, tenants = self.adapters.len(), "incremental cycle started");
        let batches = extract_all(
            &self.adapters,
            &domain.families(),
            ExtractMode::Window(window),
        )
        .await?;
        let output = transform_batches(domain, batches);

        let rows = self
            .sink
            .upsert(domain, &output.documents)
            .await
            .map_err(|source| SyncError::Sink { domain, source })?;

        self.checkpoints
            .put(domain, &Checkpoint::for_window(window, now, rows))
            .await
            .map_err(|source| SyncError::Checkpoint { domain, source })?;

        info!(%window, rows, rejected = output.rejected, "incremental cycle completed");
        Ok(CycleOutcome::Completed {
            window,
            rows,
            rejected: output.rejected,
        })
    }

    /// Rebuilds the domain's realtime mirror from the tenants' recent rows.
    pub async fn run_realtime(&self) -> Result<RealtimeOutcome, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("realtime", %run_id, domain = %self.domain);
        self.realtime_cycle().instrument(span).await
    }

    async fn realtime_cycle(&self) -> Result<RealtimeOutcome, SyncError> {
        let domain = self.domain;
        let batches = extract_all(&self.adapters, &domain.families(), ExtractMode::Recent).await?;
        let output = transform_batches(domain, batches);

        let rows = self
            .sink
            .replace_all(domain, &output.documents)
            .await
            .map_err(|source| SyncError::Sink { domain, source })?;

        info!(rows, rejected = output.rejected, "realtime mirror refreshed");
        Ok(RealtimeOutcome {
            rows,
            rejected: output.rejected,
        })
    }
}
