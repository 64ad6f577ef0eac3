//! Storage monitoring: disk-utilization and file-age probing.

pub mod prober;
