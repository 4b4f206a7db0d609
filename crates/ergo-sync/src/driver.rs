//! Long-running loops over every domain orchestrator.

use std::time::Duration;

use ergo_core::Domain;
use tracing::{error, info};

use crate::orchestrator::{CycleOutcome, DomainOrchestrator};
use crate::SyncError;

/// Result of one sequential pass over the domains.
#[derive(Debug, Default)]
pub struct PassReport {
    pub completed: Vec<Domain>,
    pub skipped: Vec<Domain>,
    pub failed: Vec<(Domain, SyncError)>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Driver {
    orchestrators: Vec<DomainOrchestrator>,
    incremental_interval: Duration,
    realtime_interval: Duration,
}

impl Driver {
    pub fn new(
        orchestrators: Vec<DomainOrchestrator>,
        incremental_interval: Duration,
        realtime_interval: Duration,
    ) -> Self {
        Self {
            orchestrators,
            incremental_interval,
            realtime_interval,
        }
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.orchestrators.iter().map(|o| o.domain()).collect()
    }

    /// Runs each domain once, in order. A failing domain does not stop the others.
    pub async fn run_incremental_pass(&self) -> PassReport {
        let mut report = PassReport::default();
        for orchestrator in &self.orchestrators {
            let domain = orchestrator.domain();
            match orchestrator.run_incremental().await {
                Ok(CycleOutcome::Completed { .. }) => report.completed.push(domain),
                Ok(CycleOutcome::Skipped { .. }) => report.skipped.push(domain),
                Err(err) => {
                    error!(%domain, error = %err, "incremental cycle failed");
                    report.failed.push((domain, err));
                }
            }
        }
        report
    }

    pub async fn run_realtime_pass(&self) -> PassReport {
        let mut report = PassReport::default();
        for orchestrator in &self.orchestrators {
            let domain = orchestrator.domain();
            match orchestrator.run_realtime().await {
                Ok(_) => report.completed.push(domain),
                Err(err) => {
                    error!(%domain, error = %err, "realtime cycle failed");
                    report.failed.push((domain, err));
                }
            }
        }
        report
    }

    pub async fn run_incremental_loop(&self) {
        loop {
            let report = self.run_incremental_pass().await;
            info!(
                completed = report.completed.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                sleep_secs = self.incremental_interval.as_secs(),
                "incremental pass finished"
            );
            tokio::time::sleep(self.incremental_interval).await;
        }
    }

    pub async fn run_realtime_loop(&self) {
        loop {
            let report = self.run_realtime_pass().await;
            info!(
                completed = report.completed.len(),
                failed = report.failed.len(),
                sleep_secs = self.realtime_interval.as_secs(),
                "realtime pass finished"
            );
            tokio::time::sleep(self.realtime_interval).await;
        }
    }

    /// Drives both loops concurrently until the returned future is dropped.
    pub async fn run(&self) {
        tokio::join!(self.run_incremental_loop(), self.run_realtime_loop());
    }
}
