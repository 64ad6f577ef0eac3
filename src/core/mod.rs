//! Core types: errors and policy configuration.

pub mod config;
pub mod errors;
