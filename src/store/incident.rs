//! Incident reporting: deduplicated PENDING rows in the datastore.
//!
//! Reporting is best-effort and never returns an error to the caller — a
//! broken datastore must not take down a cleanup run.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::logger::events::ActivityLoggerHandle;
use crate::logger::jsonl::{EventKind, LogEntry, Severity};
use crate::store::sqlite::SqliteStore;

/// Sink the controllers hand their fatal-error reports to.
pub trait IncidentSink: Send + Sync {
    /// Report an incident. When an unresolved incident with the same message
    /// already exists for this process, no new row is stored.
    fn report(&self, message: &str, details: Option<&str>);
}

/// Datastore-backed reporter with an activity-log trail.
pub struct IncidentReporter {
    store: Arc<SqliteStore>,
    logger: ActivityLoggerHandle,
}

impl IncidentReporter {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, logger: ActivityLoggerHandle) -> Self {
        Self { store, logger }
    }
}

impl IncidentSink for IncidentReporter {
    fn report(&self, message: &str, details: Option<&str>) {
        match self.store.has_pending_incident(message) {
            Ok(true) => return, // still unresolved, keep the original row
            Ok(false) => {}
            Err(err) => {
                self.logger.log(
                    LogEntry::new(EventKind::Error, Severity::Warning)
                        .with_error(&err)
                        .with_details("incident dedup query failed"),
                );
                return;
            }
        }

        match self.store.insert_incident(message, details) {
            Ok(()) => {
                self.logger.log(
                    LogEntry::new(EventKind::IncidentReported, Severity::Warning)
                        .with_details(message),
                );
            }
            Err(err) => {
                self.logger.log(
                    LogEntry::new(EventKind::Error, Severity::Warning)
                        .with_error(&err)
                        .with_details("incident insert failed"),
                );
            }
        }
    }
}
