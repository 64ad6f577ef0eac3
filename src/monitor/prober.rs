//! Storage prober: disk-utilization and file-age readings behind a trait so
//! controllers and tests can substitute fakes.

#![allow(missing_docs)]

use std::path::Path;
use std::time::SystemTime;

use crate::core::errors::{EfmsError, Result};

/// Read-only view of the storage layer used by the eligibility evaluator and
/// the pipeline engine.
pub trait StorageProber: Send + Sync {
    /// Percentage of the filesystem holding `path` that is in use (0–100).
    fn disk_utilization(&self, path: &Path) -> Result<f64>;

    /// Age of the file at `path` in hours, measured from its mtime.
    ///
    /// A file that vanished mid-scan yields `PathNotFound`, never a
    /// fabricated age.
    fn file_age_hours(&self, path: &Path) -> Result<f64>;

    /// Whether a mount point (or any path) currently exists and is readable.
    fn is_accessible(&self, path: &Path) -> bool;
}

/// Compute a used-percentage from raw block counts. A filesystem reporting
/// zero total capacity is an invalid reading, not a full disk.
#[allow(clippy::cast_precision_loss)]
fn utilization_pct(total_bytes: u64, available_bytes: u64, path: &Path) -> Result<f64> {
    if total_bytes == 0 {
        return Err(EfmsError::DiskInfo {
            path: path.to_path_buf(),
            details: "filesystem reports zero total capacity".to_string(),
        });
    }
    let used = total_bytes.saturating_sub(available_bytes);
    Ok(used as f64 / total_bytes as f64 * 100.0)
}

/// Real filesystem prober backed by statvfs and file metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProber;

impl FsProber {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StorageProber for FsProber {
    #[cfg(unix)]
    fn disk_utilization(&self, path: &Path) -> Result<f64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| EfmsError::DiskInfo {
            path: path.to_path_buf(),
            details: format!("statvfs failed: {errno}"),
        })?;
        let frag = u64::from(stat.fragment_size());
        let total = u64::from(stat.blocks()) * frag;
        let available = u64::from(stat.blocks_available()) * frag;
        utilization_pct(total, available, path)
    }

    #[cfg(not(unix))]
    fn disk_utilization(&self, path: &Path) -> Result<f64> {
        Err(EfmsError::DiskInfo {
            path: path.to_path_buf(),
            details: "disk utilization probing is only supported on unix".to_string(),
        })
    }

    fn file_age_hours(&self, path: &Path) -> Result<f64> {
        let metadata = std::fs::metadata(path).map_err(|e| EfmsError::io(path, e))?;
        let mtime = metadata.modified().map_err(|e| EfmsError::io(path, e))?;
        let elapsed = SystemTime::now()
            .duration_since(mtime)
            .unwrap_or(std::time::Duration::ZERO);
        Ok(elapsed.as_secs_f64() / 3600.0)
    }

    fn is_accessible(&self, path: &Path) -> bool {
        path.exists()
    }
}
