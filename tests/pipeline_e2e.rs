//! End-to-end scenarios: policy file on disk, real files in a temp tree,
//! scripted disk-utilization readings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use efms::prelude::*;

// ──────────────────── test doubles ────────────────────

/// Prober with real file ages (from mtime) and a scripted utilization
/// sequence; the probe fails once the script runs out.
struct ScriptedProber {
    utilization: Mutex<Vec<f64>>,
    inaccessible: Mutex<Vec<PathBuf>>,
}

impl ScriptedProber {
    fn new(utilization: &[f64]) -> Self {
        Self {
            utilization: Mutex::new(utilization.to_vec()),
            inaccessible: Mutex::new(Vec::new()),
        }
    }
}

impl StorageProber for ScriptedProber {
    fn disk_utilization(&self, path: &Path) -> Result<f64> {
        let mut seq = self.utilization.lock();
        if seq.is_empty() {
            return Err(EfmsError::DiskInfo {
                path: path.to_path_buf(),
                details: "scripted probe exhausted".to_string(),
            });
        }
        Ok(seq.remove(0))
    }

    fn file_age_hours(&self, path: &Path) -> Result<f64> {
        FsProber::new().file_age_hours(path)
    }

    fn is_accessible(&self, path: &Path) -> bool {
        !self.inaccessible.lock().iter().any(|p| p == path) && path.exists()
    }
}

/// In-process copier so the suite does not depend on an rsync binary.
struct LocalCopier {
    copies: Mutex<Vec<PathBuf>>,
}

impl LocalCopier {
    fn new() -> Self {
        Self {
            copies: Mutex::new(Vec::new()),
        }
    }
}

impl Copier for LocalCopier {
    fn copy(&self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EfmsError::io(parent, e))?;
        }
        std::fs::copy(src, dst).map_err(|e| EfmsError::io(src, e))?;
        self.copies.lock().push(src.to_path_buf());
        Ok(())
    }
}

// ──────────────────── fixture ────────────────────

struct Appliance {
    _dir: tempfile::TempDir,
    root: PathBuf,
    videos: PathBuf,
    logs: PathBuf,
    policies: Arc<PolicySet>,
    store: Arc<SqliteStore>,
}

impl Appliance {
    /// Build a mount tree with Videos (96h retention, archived) and Logs
    /// (48h retention, delete-only), threshold 80%.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let videos = root.join("Spatial/Videos");
        let logs = root.join("Spatial/Logs");
        std::fs::create_dir_all(&videos).unwrap();
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::create_dir_all(root.join("dds")).unwrap();

        let config_path = root.join("policy.json");
        let document = serde_json::json!({
            "mount_path": root,
            "secondary_path": root.join("dds"),
            "utilization_threshold_pct": 80.0,
            "categories": {
                "videos": {
                    "category": "videos",
                    "path": videos,
                    "enabled": true,
                    "retention_hours": 96,
                    "file_extensions": ["mp4"],
                    "archive_enabled": true
                },
                "logs": {
                    "category": "logs",
                    "path": logs,
                    "enabled": true,
                    "retention_hours": 48,
                    "file_extensions": ["log"],
                    "archive_enabled": false
                }
            }
        });
        std::fs::write(&config_path, document.to_string()).unwrap();
        let policies = PolicyStore::new(&config_path).load().unwrap();

        Self {
            _dir: dir,
            root,
            videos,
            logs,
            policies,
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
        }
    }

    fn write_aged(&self, path: &Path, age_hours: u64) {
        std::fs::write(path, b"payload").unwrap();
        let mtime =
            std::time::SystemTime::now() - std::time::Duration::from_secs(age_hours * 3600);
        filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime)).unwrap();
    }

    fn archival(
        &self,
        prober: Arc<ScriptedProber>,
        copier: Arc<LocalCopier>,
    ) -> ArchivalController {
        ArchivalController::new(
            Arc::clone(&self.policies),
            prober,
            copier,
            Arc::clone(&self.store) as Arc<dyn ArchiveIndex>,
            self.sink(),
            ActivityLoggerHandle::null(),
        )
    }

    fn retention(&self, prober: Arc<ScriptedProber>) -> RetentionController {
        RetentionController::new(
            Arc::clone(&self.policies),
            prober,
            Arc::new(LocalCopier::new()),
            Arc::clone(&self.store) as Arc<dyn ArchiveIndex>,
            self.sink(),
            ActivityLoggerHandle::null(),
        )
    }

    fn sink(&self) -> Arc<dyn IncidentSink> {
        Arc::new(IncidentReporter::new(
            Arc::clone(&self.store),
            ActivityLoggerHandle::null(),
        ))
    }
}

// ──────────────────── scenarios ────────────────────

#[test]
fn normal_pass_copies_records_and_deletes_in_one_run() {
    let fx = Appliance::new();
    let old_video = fx.videos.join("cam0/old.mp4");
    std::fs::create_dir_all(old_video.parent().unwrap()).unwrap();
    fx.write_aged(&old_video, 200);

    let prober = Arc::new(ScriptedProber::new(&[60.0]));
    let copier = Arc::new(LocalCopier::new());
    let report = fx
        .archival(prober, Arc::clone(&copier))
        .apply_policy()
        .unwrap();

    assert_eq!(report.pipeline, PipelineKind::Normal);
    assert_eq!(report.files_archived, 1);
    assert_eq!(report.files_deleted, 1);

    let archived_copy = fx.root.join("dds/Spatial/Videos/cam0/old.mp4");
    assert!(archived_copy.exists(), "copy reached secondary storage");
    assert!(!old_video.exists(), "source deleted after the copy");
    assert_eq!(
        fx.store.archive_location(&old_video).unwrap(),
        Some(archived_copy)
    );
    // The now-empty cam0 directory is swept at the end of the root.
    assert!(!fx.videos.join("cam0").exists());
}

#[test]
fn second_pass_never_copies_the_same_file_again() {
    let fx = Appliance::new();
    let young = fx.videos.join("young.mp4");
    fx.write_aged(&young, 10);

    let copier = Arc::new(LocalCopier::new());
    fx.archival(Arc::new(ScriptedProber::new(&[60.0])), Arc::clone(&copier))
        .apply_policy()
        .unwrap();
    fx.archival(Arc::new(ScriptedProber::new(&[60.0])), Arc::clone(&copier))
        .apply_policy()
        .unwrap();

    assert_eq!(copier.copies.lock().len(), 1, "at most one copy per file");
    assert!(young.exists(), "young file stays within retention");
}

#[test]
fn max_utilization_deletes_oldest_first_until_probe_drops() {
    let fx = Appliance::new();
    let mut ages: HashMap<&str, u64> = HashMap::new();
    ages.insert("a.log", 500);
    ages.insert("b.log", 400);
    ages.insert("c.log", 10);
    for (name, age) in &ages {
        fx.write_aged(&fx.logs.join(name), *age);
    }

    // Roots are scanned in key order: logs first, then videos (empty). The
    // first reading selects the pipeline, the rest gate each delete.
    let prober = Arc::new(ScriptedProber::new(&[92.0, 90.0, 85.0, 79.0]));
    let report = fx.retention(prober).apply_policy().unwrap();

    assert_eq!(report.pipeline, PipelineKind::MaxUtilization);
    assert_eq!(report.files_deleted, 2);
    assert!(!fx.logs.join("a.log").exists());
    assert!(!fx.logs.join("b.log").exists());
    assert!(
        fx.logs.join("c.log").exists(),
        "deletion stops once the probe is at or below threshold"
    );
}

#[test]
fn retention_pass_ignores_untracked_and_young_files() {
    let fx = Appliance::new();
    let stale = fx.logs.join("stale.log");
    let fresh = fx.logs.join("fresh.log");
    fx.write_aged(&stale, 100);
    fx.write_aged(&fresh, 1);
    // Old file outside every policy root.
    let stray = fx.root.join("scratch.bin");
    fx.write_aged(&stray, 9000);

    let report = fx
        .retention(Arc::new(ScriptedProber::new(&[60.0])))
        .apply_policy()
        .unwrap();

    assert_eq!(report.files_deleted, 1);
    assert!(!stale.exists());
    assert!(fresh.exists());
    assert!(stray.exists(), "untracked files are never deleted");
}

#[test]
fn repeated_fatal_failures_store_a_single_pending_incident() {
    let fx = Appliance::new();
    fx.write_aged(&fx.videos.join("old.mp4"), 200);

    // Empty script: every probe fails before any work happens.
    for _ in 0..3 {
        let result = fx
            .archival(
                Arc::new(ScriptedProber::new(&[])),
                Arc::new(LocalCopier::new()),
            )
            .apply_policy();
        assert!(result.is_err());
    }

    let rows = fx.store.recent_incidents(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].recovery_status, "PENDING");
    assert!(fx.videos.join("old.mp4").exists(), "no work after a fatal probe");
}

#[test]
fn unreachable_secondary_storage_aborts_before_any_delete() {
    let fx = Appliance::new();
    let old_video = fx.videos.join("old.mp4");
    fx.write_aged(&old_video, 200);

    let prober = Arc::new(ScriptedProber::new(&[60.0]));
    prober
        .inaccessible
        .lock()
        .push(fx.root.join("dds"));

    let err = fx
        .archival(prober, Arc::new(LocalCopier::new()))
        .apply_policy()
        .unwrap_err();

    assert_eq!(err.code(), "EFMS-2003");
    assert!(old_video.exists());
    let rows = fx.store.recent_incidents(10).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].message.contains("EFMS-2003"));
}
