//! Startup recovery sweep and integrity check.
//!
//! Jobs still `queued` or `processing` past the staleness threshold belong to
//! a process that no longer exists; the sweep fails them so pollers get a
//! terminal state. The integrity check only counts and logs.

use std::sync::Arc;

use tracing::{info, warn};

use crate::Result;
use crate::database::models::ProgressUpdate;
use crate::database::repositories::GenerationJobRepository;
use crate::database::time::ms_ago;
use crate::generation::providers::CatalogIntegrity;

/// Error message written to jobs orphaned by a restart.
pub const INTERRUPTED_MESSAGE: &str = "generation interrupted — service restart detected";

/// Outcome of the sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale jobs found.
    pub found: usize,
    /// Jobs transitioned to `failed`.
    pub recovered: Vec<String>,
    /// Jobs whose transition was rejected or errored.
    pub skipped: usize,
}

/// Read-only findings. Nothing here is repaired automatically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub orphaned_catalog_links: u64,
    pub stale_jobs: u64,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_catalog_links == 0 && self.stale_jobs == 0
    }
}

pub struct RecoverySweep {
    jobs: Arc<dyn GenerationJobRepository>,
    catalog: Option<Arc<dyn CatalogIntegrity>>,
    stale_after: chrono::Duration,
}

impl RecoverySweep {
    pub fn new(
        jobs: Arc<dyn GenerationJobRepository>,
        catalog: Option<Arc<dyn CatalogIntegrity>>,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            jobs,
            catalog,
            stale_after,
        }
    }

    /// Fail every active job created before `now - stale_after`.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let cutoff = ms_ago(self.stale_after);
        let stale = self.jobs.find_stale_before(cutoff).await?;

        let mut report = SweepReport {
            found: stale.len(),
            ..SweepReport::default()
        };

        for job in stale {
            match self
                .jobs
                .mark_failed(&job.id, INTERRUPTED_MESSAGE, &ProgressUpdate::default())
                .await
            {
                Ok(()) => {
                    info!(
                        job_id = %job.id,
                        owner_id = %job.owner_id,
                        previous_status = %job.status,
                        "Recovered interrupted generation job"
                    );
                    report.recovered.push(job.id);
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Could not recover generation job");
                    report.skipped += 1;
                }
            }
        }

        if report.found > 0 {
            info!(
                recovered = report.recovered.len(),
                skipped = report.skipped,
                "Recovery sweep finished"
            );
        }
        Ok(report)
    }

    /// Count orphaned catalog rows and still-stale jobs.
    pub async fn check_integrity(&self) -> Result<IntegrityReport> {
        let stale_jobs = self
            .jobs
            .count_stale_before(ms_ago(self.stale_after))
            .await?;
        let orphaned_catalog_links = match &self.catalog {
            Some(catalog) => catalog.count_orphaned_links().await?,
            None => 0,
        };

        let report = IntegrityReport {
            orphaned_catalog_links,
            stale_jobs,
        };
        if report.is_clean() {
            info!("Integrity check passed");
        } else {
            warn!(
                orphaned_catalog_links,
                stale_jobs, "Integrity check found inconsistencies (not repaired)"
            );
        }
        Ok(report)
    }
}
