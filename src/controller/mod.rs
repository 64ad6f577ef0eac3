//! Controllers driving the pipeline engine on behalf of the scheduler.

pub mod archival;
pub mod retention;

use std::sync::Arc;

use crate::core::errors::{EfmsError, Result};
use crate::logger::events::ActivityLoggerHandle;
use crate::logger::jsonl::{EventKind, LogEntry, Severity};
use crate::scanner::pipeline::{EngineMode, PipelineEngine, RunReport};
use crate::store::incident::IncidentSink;

/// Shared apply-policy flow: run the engine, log the outcome, and turn a
/// fatal error into a deduplicated incident.
fn apply_policy(
    name: &'static str,
    engine: &PipelineEngine,
    mode: EngineMode,
    incidents: &Arc<dyn IncidentSink>,
    logger: &ActivityLoggerHandle,
) -> Result<RunReport> {
    match engine.run(mode) {
        Ok(report) => {
            let mut entry = LogEntry::new(EventKind::RunCompleted, Severity::Info);
            entry.details = Some(format!("{name} ({})", report.pipeline.label()));
            entry.utilization_pct = Some(report.utilization_pct);
            entry.files_archived = Some(report.files_archived);
            entry.files_deleted = Some(report.files_deleted);
            entry.dirs_removed = Some(report.dirs_removed);
            entry.duration_ms = Some(u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX));
            entry.ok = Some(true);
            logger.log(entry);
            Ok(report)
        }
        Err(err) => {
            logger.log(
                LogEntry::new(EventKind::Error, Severity::Critical)
                    .with_error(&err)
                    .with_details(format!("{name} run aborted")),
            );
            incidents.report(&incident_message(name, &err), Some(&incident_details(&err)));
            Err(err)
        }
    }
}

fn incident_message(name: &str, err: &EfmsError) -> String {
    format!("{name} run failed: {}", err.code())
}

fn incident_details(err: &EfmsError) -> String {
    serde_json::json!({
        "code": err.code(),
        "error": err.to_string(),
        "retryable": err.is_retryable(),
    })
    .to_string()
}
