//! Concurrent extraction across every (tenant, family) pair of a domain.

use std::sync::Arc;

use ergo_adapters::SourceAdapter;
use ergo_core::{RawRecord, RecordFamily, Window};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Window(Window),
    Recent,
}

#[derive(Debug, Clone)]
pub struct ExtractedBatch {
    pub tenant: String,
    pub family: RecordFamily,
    pub rows: Vec<RawRecord>,
}

type TaskOutput = (usize, Result<ExtractedBatch, SyncError>);

/// Runs one task per (tenant, family) and joins them.
///
/// Results come back tenant-major, family-major regardless of completion order.
/// The first failure aborts the remaining tasks and discards finished ones.
pub async fn extract_all(
    adapters: &[Arc<dyn SourceAdapter>],
    families: &[RecordFamily],
    mode: ExtractMode,
) -> Result<Vec<ExtractedBatch>, SyncError> {
    let mut join_set: JoinSet<TaskOutput> = JoinSet::new();
    let mut slots = 0usize;

    for adapter in adapters {
        for &family in families {
            let adapter = Arc::clone(adapter);
            let slot = slots;
            slots += 1;
            join_set.spawn(async move {
                let fetched = match mode {
                    ExtractMode::Window(window) => adapter.fetch_window(family, &window).await,
                    ExtractMode::Recent => adapter.fetch_recent(family).await,
                };
                let tenant = adapter.tenant().to_string();
                let result = match fetched {
                    Ok(rows) => Ok(ExtractedBatch {
                        tenant,
                        family,
                        rows,
                    }),
                    Err(source) => Err(SyncError::Source {
                        tenant,
                        family,
                        source,
                    }),
                };
                (slot, result)
            });
        }
    }

    let mut ordered: Vec<Option<ExtractedBatch>> = (0..slots).map(|_| None).collect();
    let mut first_error: Option<SyncError> = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((slot, Ok(batch))) if first_error.is_none() => ordered[slot] = Some(batch),
            Ok((_, Ok(_))) => {}
            Ok((_, Err(err))) => {
                error!(error = %err, "extraction task failed");
                if first_error.is_none() {
                    first_error = Some(err);
                    join_set.abort_all();
                }
            }
            Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {}
            Err(join_err) => {
                join_set.abort_all();
                return Err(SyncError::TaskPanicked(join_err.to_string()));
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    let batches: Vec<ExtractedBatch> = ordered.into_iter().flatten().collect();
    for batch in &batches {
        info!(
            tenant = %batch.tenant,
            family = %batch.family,
            rows = batch.rows.len(),
            "extracted"
        );
    }
    Ok(batches)
}
