//! Retention controller: age-based deletion, no copying. Shares the
//! pipeline engine with the archival controller, including the switch to
//! the delete-only max-utilization speed under disk pressure.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::config::PolicySet;
use crate::core::errors::Result;
use crate::logger::events::ActivityLoggerHandle;
use crate::monitor::prober::StorageProber;
use crate::scanner::copier::Copier;
use crate::scanner::pipeline::{EngineMode, PipelineEngine, RunReport};
use crate::store::incident::IncidentSink;
use crate::store::sqlite::ArchiveIndex;

pub struct RetentionController {
    engine: PipelineEngine,
    incidents: Arc<dyn IncidentSink>,
    logger: ActivityLoggerHandle,
}

impl RetentionController {
    #[must_use]
    pub fn new(
        policies: Arc<PolicySet>,
        prober: Arc<dyn StorageProber>,
        copier: Arc<dyn Copier>,
        index: Arc<dyn ArchiveIndex>,
        incidents: Arc<dyn IncidentSink>,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            engine: PipelineEngine::new(policies, prober, copier, index, logger.clone()),
            incidents,
            logger,
        }
    }

    /// One scheduled retention pass.
    pub fn apply_policy(&self) -> Result<RunReport> {
        super::apply_policy(
            "retention",
            &self.engine,
            EngineMode::DeleteOnly,
            &self.incidents,
            &self.logger,
        )
    }
}
