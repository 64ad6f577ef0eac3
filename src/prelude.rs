//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use efms::prelude::*;
//! ```

// Core
pub use crate::core::config::{Category, CategoryPolicy, PolicySet, PolicyStore};
pub use crate::core::errors::{EfmsError, Result};

// Monitor
pub use crate::monitor::prober::{FsProber, StorageProber};

// Scanner
pub use crate::scanner::copier::{Copier, RsyncCopier};
pub use crate::scanner::eligibility::{DeletionVerdict, EligibilityEvaluator};
pub use crate::scanner::pipeline::{EngineMode, PipelineEngine, PipelineKind, RunReport};

// Controllers
pub use crate::controller::archival::ArchivalController;
pub use crate::controller::retention::RetentionController;

// Store
pub use crate::store::incident::{IncidentReporter, IncidentSink};
pub use crate::store::sqlite::{ArchiveIndex, SqliteStore};

// Logger
pub use crate::logger::events::{ActivityLogger, ActivityLoggerHandle};
pub use crate::logger::jsonl::{EventKind, LogEntry, Severity};
