//! Accumulated progress of one running job.
//!
//! The pipeline owns the accumulation; the store only ever receives the full
//! current view through a [`ProgressUpdate`].

use std::collections::BTreeSet;

use crate::database::models::{ItemResult, JobPhase, ProgressUpdate};

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u32,
    current: u32,
    successful: u32,
    failed: u32,
    results: Vec<ItemResult>,
    generated_languages: BTreeSet<String>,
    failed_languages: BTreeSet<String>,
}

impl ProgressTracker {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            current: 0,
            successful: 0,
            failed: 0,
            results: Vec::with_capacity(total as usize),
            generated_languages: BTreeSet::new(),
            failed_languages: BTreeSet::new(),
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Mark the 1-based unit `index` as in progress.
    pub fn begin_unit(&mut self, index: u32) {
        self.current = self.current.max(index.min(self.total));
    }

    /// Record a finished unit. A second result for the same unit id is ignored.
    pub fn record(&mut self, result: ItemResult) -> bool {
        if self.attempted() >= self.total
            || self.results.iter().any(|r| r.item_id == result.item_id)
        {
            return false;
        }

        if let Some(language) = &result.language {
            if result.success {
                self.generated_languages.insert(language.clone());
            } else {
                self.failed_languages.insert(language.clone());
            }
        }
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
        true
    }

    pub fn attempted(&self) -> u32 {
        self.successful + self.failed
    }

    pub fn successful(&self) -> u32 {
        self.successful
    }

    pub fn failed(&self) -> u32 {
        self.failed
    }

    pub fn results(&self) -> &[ItemResult] {
        &self.results
    }

    /// `floor(100 * attempted / total)`; 100 only once every unit was attempted.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((u64::from(self.attempted()) * 100) / u64::from(self.total)).min(100) as u8
    }

    /// Full current view for the store.
    pub fn snapshot(&self, phase: JobPhase, sub_phase: Option<String>) -> ProgressUpdate {
        ProgressUpdate {
            phase: Some(phase),
            sub_phase,
            current_item: Some(self.current),
            successful_items: Some(self.successful),
            failed_items: Some(self.failed),
            percent_complete: Some(self.percent()),
            item_results: Some(self.results.clone()),
            generated_languages: Some(self.generated_languages.clone()),
            failed_languages: Some(self.failed_languages.clone()),
        }
    }
}
