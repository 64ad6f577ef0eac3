#![forbid(unsafe_code)]

//! Edge File Management Service (efms) — periodic retention and archival of
//! recorded appliance data.
//!
//! Two controllers share a two-speed pipeline:
//! 1. **Archival** — copies archive-eligible files to secondary storage with
//!    a bandwidth cap, then deletes files past their retention window.
//! 2. **Retention** — deletes files past their retention window.
//!
//! When disk utilization on the monitored mount exceeds the configured
//! threshold, both switch to a delete-only max-utilization pipeline that
//! re-probes the disk before every delete and stops as soon as the reading
//! is back under the threshold.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use efms::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use efms::core::config::PolicyStore;
//! use efms::scanner::pipeline::{EngineMode, PipelineEngine};
//! ```

pub mod prelude;

pub mod controller;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod scanner;
pub mod store;
