//! Archival controller: copy-then-delete at normal speed, delete-only when
//! disk utilization is past the threshold.

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

pub struct ArchivalController {
    engine: PipelineEngine,
    incidents: Arc<dyn IncidentSink>,
    logger: ActivityLoggerHandle,
}

impl ArchivalController {
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

    /// One scheduled archival pass.
    pub fn apply_policy(&self) -> Result<RunReport> {
        super::apply_policy(
            "archival",
            &self.engine,
            EngineMode::ArchiveAndDelete,
            &self.incidents,
            &self.logger,
        )
    }
}
