//! Eligibility evaluation: which files may be archived, which may be
//! deleted, and which are already archived.
//!
//! Archival eligibility is fail-closed: a file whose category or policy
//! cannot be resolved is never copied. Deletion eligibility is age-based and
//! propagates probe errors so the pipeline can tell "vanished mid-scan"
//! apart from "very old".

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::PolicySet;
use crate::core::errors::Result;
use crate::logger::events::ActivityLoggerHandle;
use crate::logger::jsonl::{EventKind, LogEntry, Severity};
use crate::monitor::prober::StorageProber;
use crate::store::sqlite::ArchiveIndex;

/// Why a file is (or is not) deletion-eligible. Carries the age so the
/// pipeline can log it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeletionVerdict {
    /// Older than the retention window of its matched policy.
    Expired { age_hours: f64 },
    /// Tracked but still within retention.
    Retained { age_hours: f64 },
    /// No category or no enabled policy matches; never deleted.
    Untracked,
}

impl DeletionVerdict {
    #[must_use]
    pub const fn is_expired(self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

/// Per-file decision logic shared by both pipelines.
pub struct EligibilityEvaluator {
    policies: Arc<PolicySet>,
    prober: Arc<dyn StorageProber>,
    index: Arc<dyn ArchiveIndex>,
    logger: ActivityLoggerHandle,
}

impl EligibilityEvaluator {
    #[must_use]
    pub fn new(
        policies: Arc<PolicySet>,
        prober: Arc<dyn StorageProber>,
        index: Arc<dyn ArchiveIndex>,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            policies,
            prober,
            index,
            logger,
        }
    }

    #[must_use]
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Whether the file's matched policy opts it into archival. Unresolvable
    /// category or missing policy means not eligible.
    #[must_use]
    pub fn archival_eligible(&self, path: &Path) -> bool {
        self.policies
            .policy_for(path)
            .is_some_and(|(_, policy)| policy.archive_enabled)
    }

    /// Whether the file is past its retention window.
    pub fn deletion_verdict(&self, path: &Path) -> Result<DeletionVerdict> {
        let Some((_, policy)) = self.policies.policy_for(path) else {
            return Ok(DeletionVerdict::Untracked);
        };
        let age_hours = self.prober.file_age_hours(path)?;
        if age_hours > f64::from(policy.retention_hours) {
            Ok(DeletionVerdict::Expired { age_hours })
        } else {
            Ok(DeletionVerdict::Retained { age_hours })
        }
    }

    /// Whether the file has already been archived.
    ///
    /// Datastore-tracked categories consult the archive index; a lookup
    /// failure reads as "not archived" (safe: at worst the file is copied
    /// again) and is logged. Other categories check for the file at its
    /// mapped destination.
    #[must_use]
    pub fn archived_already(&self, path: &Path) -> bool {
        let tracked = self
            .policies
            .policy_for(path)
            .is_some_and(|(_, policy)| policy.category.tracked_in_datastore());

        if tracked {
            match self.index.archive_location(path) {
                Ok(location) => location.is_some(),
                Err(err) => {
                    self.logger.log(
                        LogEntry::new(EventKind::Error, Severity::Warning)
                            .with_path(path)
                            .with_error(&err)
                            .with_details("archive index lookup failed, assuming unarchived"),
                    );
                    false
                }
            }
        } else {
            self.destination_path(path)
                .is_ok_and(|dst| self.prober.is_accessible(&dst))
        }
    }

    /// Map the file to its destination under secondary storage.
    pub fn destination_path(&self, path: &Path) -> Result<PathBuf> {
        self.policies.destination_path(path)
    }

    /// Record a completed copy. Only datastore-tracked categories get an
    /// index row; the rest are found by destination existence checks.
    pub fn record_archive(&self, path: &Path, destination: &Path) -> Result<()> {
        let tracked = self
            .policies
            .policy_for(path)
            .is_some_and(|(_, policy)| policy.category.tracked_in_datastore());
        if tracked {
            self.index.record_archive(path, destination)?;
        }
        Ok(())
    }
}
