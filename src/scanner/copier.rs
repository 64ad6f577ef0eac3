//! File copier: external rsync with a bandwidth cap, behind a trait so the
//! pipeline can be tested without shelling out.

#![allow(missing_docs)]

use std::path::Path;
use std::process::Command;

use crate::core::errors::{EfmsError, Result};

/// Copy mechanism used by the archival path of the pipeline.
pub trait Copier: Send + Sync {
    /// Copy `src` to `dst`, creating parent directories as needed. Must not
    /// remove or modify `src`.
    fn copy(&self, src: &Path, dst: &Path) -> Result<()>;
}

/// rsync-backed copier. Archive-grade attributes are preserved (`-a`) and
/// throughput is capped so copies never starve the recording workload.
pub struct RsyncCopier {
    bandwidth_kbps: u32,
}

impl RsyncCopier {
    #[must_use]
    pub fn new(bandwidth_kbps: u32) -> Self {
        Self { bandwidth_kbps }
    }

    fn args(&self, src: &Path, dst: &Path) -> Vec<String> {
        vec![
            "-a".to_string(),
            format!("--bwlimit={}", self.bandwidth_kbps),
            src.display().to_string(),
            dst.display().to_string(),
        ]
    }
}

impl Copier for RsyncCopier {
    fn copy(&self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EfmsError::io(parent, e))?;
        }

        let output = Command::new("rsync")
            .args(self.args(src, dst))
            .output()
            .map_err(|e| EfmsError::CopyFailed {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
                details: format!("failed to launch rsync: {e}"),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EfmsError::CopyFailed {
                src: src.to_path_buf(),
                dst: dst.to_path_buf(),
                details: format!(
                    "rsync exited with {}: {}",
                    output.status,
                    stderr.trim().chars().take(512).collect::<String>()
                ),
            })
        }
    }
}
