//! Two-speed pipeline engine.
//!
//! Normal speed walks each policy root oldest-first, archiving and/or
//! deleting per file. MaxUtilization speed is delete-only and re-probes disk
//! utilization before every delete, stopping within a root as soon as the
//! reading is back at or below the threshold.
//!
//! Failure containment: per-file errors are logged and the walk continues; a
//! failed root enumeration skips that root; a failed utilization probe or an
//! unreachable archival destination aborts the whole run.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::PolicySet;
use crate::core::errors::{EfmsError, Result};
use crate::logger::events::ActivityLoggerHandle;
use crate::logger::jsonl::{EventKind, LogEntry, Severity};
use crate::monitor::prober::StorageProber;
use crate::scanner::copier::Copier;
use crate::scanner::eligibility::{DeletionVerdict, EligibilityEvaluator};
use crate::scanner::walker;
use crate::store::sqlite::ArchiveIndex;

/// What the controller wants done at normal speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Copy archive-eligible files to secondary storage, then delete
    /// expired ones.
    ArchiveAndDelete,
    /// Delete expired files only.
    DeleteOnly,
}

/// Which pipeline the utilization probe selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Normal,
    MaxUtilization,
}

impl PipelineKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::MaxUtilization => "max_utilization",
        }
    }
}

/// Counters for one `run()` invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline: PipelineKind,
    pub utilization_pct: f64,
    pub roots_processed: u64,
    pub roots_skipped: u64,
    pub files_archived: u64,
    pub files_deleted: u64,
    pub files_skipped: u64,
    pub copy_failures: u64,
    pub delete_failures: u64,
    pub dirs_removed: u64,
    pub duration: Duration,
}

impl RunReport {
    fn new(pipeline: PipelineKind, utilization_pct: f64) -> Self {
        Self {
            pipeline,
            utilization_pct,
            roots_processed: 0,
            roots_skipped: 0,
            files_archived: 0,
            files_deleted: 0,
            files_skipped: 0,
            copy_failures: 0,
            delete_failures: 0,
            dirs_removed: 0,
            duration: Duration::ZERO,
        }
    }
}

/// The engine both controllers drive.
pub struct PipelineEngine {
    policies: Arc<PolicySet>,
    prober: Arc<dyn StorageProber>,
    copier: Arc<dyn Copier>,
    evaluator: EligibilityEvaluator,
    logger: ActivityLoggerHandle,
}

impl PipelineEngine {
    #[must_use]
    pub fn new(
        policies: Arc<PolicySet>,
        prober: Arc<dyn StorageProber>,
        copier: Arc<dyn Copier>,
        index: Arc<dyn ArchiveIndex>,
        logger: ActivityLoggerHandle,
    ) -> Self {
        let evaluator = EligibilityEvaluator::new(
            Arc::clone(&policies),
            Arc::clone(&prober),
            index,
            logger.clone(),
        );
        Self {
            policies,
            prober,
            copier,
            evaluator,
            logger,
        }
    }

    /// Probe the monitored mount and run the pipeline the reading selects.
    pub fn run(&self, mode: EngineMode) -> Result<RunReport> {
        let started = Instant::now();
        let utilization = self
            .prober
            .disk_utilization(&self.policies.mount_path)?;
        let kind = if utilization > self.policies.utilization_threshold_pct {
            PipelineKind::MaxUtilization
        } else {
            PipelineKind::Normal
        };

        let mut entry = LogEntry::new(EventKind::PipelineSelected, Severity::Info);
        entry.utilization_pct = Some(utilization);
        entry.details = Some(kind.label().to_string());
        self.logger.log(entry);

        let mut report = RunReport::new(kind, utilization);
        match kind {
            PipelineKind::Normal => self.run_normal(mode, &mut report)?,
            PipelineKind::MaxUtilization => self.run_max_utilization(&mut report)?,
        }
        report.duration = started.elapsed();
        Ok(report)
    }

    // ──────────────────── normal speed ────────────────────

    fn run_normal(&self, mode: EngineMode, report: &mut RunReport) -> Result<()> {
        for root in self.policies.scan_roots() {
            let listing = match walker::list_tree(&root) {
                Ok(listing) => listing,
                Err(err) => {
                    self.skip_root(&root, &err, report);
                    continue;
                }
            };
            report.roots_processed += 1;
            self.note_skipped_subtrees(&listing);

            for file in &listing.files {
                self.process_file_normal(mode, &file.path, report)?;
            }

            self.sweep(&listing.dirs, report);
        }
        Ok(())
    }

    fn process_file_normal(
        &self,
        mode: EngineMode,
        path: &Path,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut copy_failed = false;

        if mode == EngineMode::ArchiveAndDelete && self.evaluator.archival_eligible(path) {
            if !self.prober.is_accessible(&self.policies.secondary_path) {
                return Err(EfmsError::DestinationUnreachable {
                    path: self.policies.secondary_path.clone(),
                });
            }
            copy_failed = !self.archive_file(path, report);
        }

        // Deletion is decided independently of archival, except that a file
        // whose copy just failed is retained until the next pass.
        match self.evaluator.deletion_verdict(path) {
            Ok(DeletionVerdict::Expired { age_hours }) => {
                if copy_failed {
                    report.files_skipped += 1;
                } else {
                    self.delete_file(path, Some(age_hours), None, report);
                }
            }
            Ok(DeletionVerdict::Retained { .. } | DeletionVerdict::Untracked) => {
                report.files_skipped += 1;
            }
            Err(EfmsError::PathNotFound { .. }) => {
                // Vanished between enumeration and evaluation.
                report.files_skipped += 1;
            }
            Err(err) => {
                self.logger.log(
                    LogEntry::new(EventKind::Error, Severity::Warning)
                        .with_path(path)
                        .with_error(&err),
                );
                report.files_skipped += 1;
            }
        }
        Ok(())
    }

    /// Copy one file to secondary storage if it is not already there.
    /// Returns false when a copy was attempted and failed.
    fn archive_file(&self, path: &Path, report: &mut RunReport) -> bool {
        if self.evaluator.archived_already(path) {
            return true;
        }
        let destination = match self.evaluator.destination_path(path) {
            Ok(destination) => destination,
            Err(err) => {
                // An unmappable destination means the file can never reach
                // secondary storage; retain it like a failed copy.
                self.logger.log(
                    LogEntry::new(EventKind::CopyFailed, Severity::Warning)
                        .with_path(path)
                        .with_error(&err),
                );
                report.copy_failures += 1;
                return false;
            }
        };

        match self.copier.copy(path, &destination) {
            Ok(()) => {
                if let Err(err) = self.evaluator.record_archive(path, &destination) {
                    // The copy stands; a bookkeeping failure only means the
                    // file may be re-checked next pass.
                    self.logger.log(
                        LogEntry::new(EventKind::Error, Severity::Warning)
                            .with_path(path)
                            .with_error(&err)
                            .with_details("failed to record archive location"),
                    );
                }
                let mut entry = LogEntry::new(EventKind::FileArchived, Severity::Info);
                entry.path = Some(path.display().to_string());
                entry.destination = Some(destination.display().to_string());
                entry.ok = Some(true);
                self.logger.log(entry);
                report.files_archived += 1;
                true
            }
            Err(err) => {
                self.logger.log(
                    LogEntry::new(EventKind::CopyFailed, Severity::Warning)
                        .with_path(path)
                        .with_error(&err),
                );
                report.copy_failures += 1;
                false
            }
        }
    }

    // ──────────────────── max-utilization speed ────────────────────

    fn run_max_utilization(&self, report: &mut RunReport) -> Result<()> {
        for root in self.policies.scan_roots() {
            let listing = match walker::list_tree(&root) {
                Ok(listing) => listing,
                Err(err) => {
                    self.skip_root(&root, &err, report);
                    continue;
                }
            };
            report.roots_processed += 1;
            self.note_skipped_subtrees(&listing);

            for file in &listing.files {
                // Never cached: every delete must be justified by a fresh
                // reading.
                let utilization = self
                    .prober
                    .disk_utilization(&self.policies.mount_path)?;
                if utilization <= self.policies.utilization_threshold_pct {
                    break;
                }
                self.delete_file(&file.path, None, Some(utilization), report);
            }

            self.sweep(&listing.dirs, report);
        }
        Ok(())
    }

    // ──────────────────── shared ────────────────────

    fn delete_file(
        &self,
        path: &Path,
        age_hours: Option<f64>,
        utilization_pct: Option<f64>,
        report: &mut RunReport,
    ) {
        match std::fs::remove_file(path) {
            Ok(()) => {
                let mut entry = LogEntry::new(EventKind::FileDeleted, Severity::Info);
                entry.path = Some(path.display().to_string());
                entry.age_hours = age_hours;
                entry.utilization_pct = utilization_pct;
                entry.ok = Some(true);
                self.logger.log(entry);
                report.files_deleted += 1;
            }
            Err(e) => {
                // Locked or immutable files are expected on an appliance;
                // a failed delete is a warning, never fatal.
                let err = EfmsError::io(path, e);
                self.logger.log(
                    LogEntry::new(EventKind::DeleteFailed, Severity::Warning)
                        .with_path(path)
                        .with_error(&err),
                );
                report.delete_failures += 1;
            }
        }
    }

    fn note_skipped_subtrees(&self, listing: &walker::TreeListing) {
        for dir in &listing.skipped {
            self.logger.log(
                LogEntry::new(EventKind::RootSkipped, Severity::Warning)
                    .with_path(dir)
                    .with_details("unreadable subtree skipped"),
            );
        }
    }

    fn skip_root(&self, root: &Path, err: &EfmsError, report: &mut RunReport) {
        self.logger.log(
            LogEntry::new(EventKind::RootSkipped, Severity::Warning)
                .with_path(root)
                .with_error(err),
        );
        report.roots_skipped += 1;
    }

    fn sweep(&self, dirs: &[std::path::PathBuf], report: &mut RunReport) {
        let removed = walker::sweep_empty_dirs(dirs) as u64;
        if removed > 0 {
            let mut entry = LogEntry::new(EventKind::DirectoriesSwept, Severity::Info);
            entry.dirs_removed = Some(removed);
            self.logger.log(entry);
        }
        report.dirs_removed += removed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};
    use std::path::PathBuf;

    use crate::core::config::{
        Category, CategoryPolicy, LoggingConfig, SchedulerConfig, StoreConfig,
    };
    use crate::scanner::eligibility::test_support::FakeProber;
    use crate::store::sqlite::SqliteStore;

    struct FakeCopier {
        copies: Mutex<Vec<(PathBuf, PathBuf)>>,
        fail: bool,
    }

    impl FakeCopier {
        fn new() -> Self {
            Self {
                copies: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                copies: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn copied(&self) -> Vec<(PathBuf, PathBuf)> {
            self.copies.lock().clone()
        }
    }

    impl Copier for FakeCopier {
        fn copy(&self, src: &Path, dst: &Path) -> crate::core::errors::Result<()> {
            if self.fail {
                return Err(EfmsError::CopyFailed {
                    src: src.to_path_buf(),
                    dst: dst.to_path_buf(),
                    details: "scripted failure".to_string(),
                });
            }
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::copy(src, dst).unwrap();
            self.copies.lock().push((src.to_path_buf(), dst.to_path_buf()));
            Ok(())
        }
    }

    fn policies(root: &Path) -> Arc<PolicySet> {
        let mut categories = BTreeMap::new();
        categories.insert(
            "videos".to_string(),
            CategoryPolicy {
                category: Category::Videos,
                path: root.join("Spatial/Videos"),
                enabled: true,
                retention_hours: 96,
                file_extensions: vec!["mp4".to_string()],
                archive_enabled: true,
            },
        );
        Arc::new(PolicySet {
            mount_path: root.to_path_buf(),
            secondary_path: root.join("dds"),
            utilization_threshold_pct: 80.0,
            copy_bandwidth_kbps: 10_240,
            categories,
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
            store: StoreConfig::default(),
        })
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        videos: PathBuf,
        store: Arc<SqliteStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let videos = root.join("Spatial/Videos");
        std::fs::create_dir_all(&videos).unwrap();
        std::fs::create_dir_all(root.join("dds")).unwrap();
        Fixture {
            _dir: dir,
            root,
            videos,
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
        }
    }

    fn engine_with(
        fx: &Fixture,
        prober: FakeProber,
        copier: Arc<dyn Copier>,
    ) -> PipelineEngine {
        PipelineEngine::new(
            policies(&fx.root),
            Arc::new(prober),
            copier,
            Arc::clone(&fx.store) as Arc<dyn ArchiveIndex>,
            ActivityLoggerHandle::null(),
        )
    }

    fn write_file(path: &Path) {
        std::fs::write(path, b"payload").unwrap();
    }

    #[test]
    fn normal_pipeline_archives_then_deletes_expired_video() {
        let fx = fixture();
        let old = fx.videos.join("old.mp4");
        write_file(&old);

        let prober = FakeProber {
            ages: HashMap::from([(old.clone(), 200.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![],
        };
        let copier = Arc::new(FakeCopier::new());
        let engine = engine_with(&fx, prober, Arc::clone(&copier) as Arc<dyn Copier>);

        let report = engine.run(EngineMode::ArchiveAndDelete).unwrap();

        assert_eq!(report.pipeline, PipelineKind::Normal);
        assert_eq!(report.files_archived, 1);
        assert_eq!(report.files_deleted, 1);
        assert!(!old.exists());
        let expected_dst = fx.root.join("dds/Spatial/Videos/old.mp4");
        assert!(expected_dst.exists());
        assert_eq!(copier.copied().len(), 1);
        assert_eq!(
            fx.store.archive_location(&old).unwrap(),
            Some(expected_dst)
        );
    }

    #[test]
    fn young_file_is_archived_but_retained() {
        let fx = fixture();
        let young = fx.videos.join("young.mp4");
        write_file(&young);

        let prober = FakeProber {
            ages: HashMap::from([(young.clone(), 10.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![],
        };
        let engine = engine_with(&fx, prober, Arc::new(FakeCopier::new()));

        let report = engine.run(EngineMode::ArchiveAndDelete).unwrap();

        assert_eq!(report.files_archived, 1);
        assert_eq!(report.files_deleted, 0);
        assert!(young.exists());
    }

    #[test]
    fn already_archived_file_is_not_copied_twice() {
        let fx = fixture();
        let young = fx.videos.join("young.mp4");
        write_file(&young);
        fx.store
            .record_archive(&young, Path::new("/already/there.mp4"))
            .unwrap();

        let prober = FakeProber {
            ages: HashMap::from([(young.clone(), 10.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![],
        };
        let copier = Arc::new(FakeCopier::new());
        let engine = engine_with(&fx, prober, Arc::clone(&copier) as Arc<dyn Copier>);

        let report = engine.run(EngineMode::ArchiveAndDelete).unwrap();

        assert_eq!(report.files_archived, 0);
        assert!(copier.copied().is_empty());
    }

    #[test]
    fn copy_failure_retains_the_source() {
        let fx = fixture();
        let old = fx.videos.join("old.mp4");
        write_file(&old);

        let prober = FakeProber {
            ages: HashMap::from([(old.clone(), 200.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![],
        };
        let engine = engine_with(&fx, prober, Arc::new(FakeCopier::failing()));

        let report = engine.run(EngineMode::ArchiveAndDelete).unwrap();

        assert_eq!(report.copy_failures, 1);
        assert_eq!(report.files_deleted, 0);
        assert!(old.exists(), "source must survive a failed copy");
    }

    #[test]
    fn unmappable_destination_retains_the_file() {
        let fx = fixture();
        let old = fx.videos.join("old.mp4");
        write_file(&old);

        // Policy root lies outside the mount, so no destination can ever
        // be computed for its files.
        let mut set = (*policies(&fx.root)).clone();
        set.mount_path = fx.root.join("another-mount");
        let prober = FakeProber {
            ages: HashMap::from([(old.clone(), 200.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![],
        };
        let copier = Arc::new(FakeCopier::new());
        let engine = PipelineEngine::new(
            Arc::new(set),
            Arc::new(prober),
            Arc::clone(&copier) as Arc<dyn Copier>,
            Arc::clone(&fx.store) as Arc<dyn ArchiveIndex>,
            ActivityLoggerHandle::null(),
        );

        let report = engine.run(EngineMode::ArchiveAndDelete).unwrap();

        assert_eq!(report.copy_failures, 1);
        assert_eq!(report.files_deleted, 0);
        assert!(copier.copied().is_empty());
        assert!(old.exists(), "a file that never reached secondary storage survives");
    }

    #[cfg(unix)]
    #[test]
    fn failed_delete_is_a_warning_and_the_root_continues() {
        use std::os::unix::fs::PermissionsExt;

        // Privileged environments can unlink inside read-only directories;
        // the constraint cannot be observed there.
        fn readonly_blocks_unlink() -> bool {
            let dir = tempfile::tempdir().unwrap();
            let locked = dir.path().join("locked");
            std::fs::create_dir(&locked).unwrap();
            std::fs::write(locked.join("sentinel.tmp"), b"x").unwrap();
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555))
                .unwrap();
            let blocked = std::fs::remove_file(locked.join("sentinel.tmp")).is_err();
            let _ =
                std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755));
            blocked
        }
        if !readonly_blocks_unlink() {
            return;
        }

        let fx = fixture();
        let locked_dir = fx.videos.join("locked");
        std::fs::create_dir(&locked_dir).unwrap();
        let stuck = locked_dir.join("stuck.mp4");
        let old = fx.videos.join("old.mp4");
        write_file(&stuck);
        write_file(&old);
        std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o555))
            .unwrap();

        let prober = FakeProber {
            ages: HashMap::from([(stuck.clone(), 200.0), (old.clone(), 200.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![],
        };
        let engine = engine_with(&fx, prober, Arc::new(FakeCopier::new()));

        let report = engine.run(EngineMode::DeleteOnly).unwrap();
        let _ = std::fs::set_permissions(&locked_dir, std::fs::Permissions::from_mode(0o755));

        assert_eq!(report.delete_failures, 1);
        assert_eq!(report.files_deleted, 1, "the rest of the root is still processed");
        assert!(stuck.exists());
        assert!(!old.exists());
    }

    #[test]
    fn unreachable_destination_aborts_the_run() {
        let fx = fixture();
        let old = fx.videos.join("old.mp4");
        write_file(&old);

        let prober = FakeProber {
            ages: HashMap::from([(old.clone(), 200.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![fx.root.join("dds")],
        };
        let engine = engine_with(&fx, prober, Arc::new(FakeCopier::new()));

        let err = engine.run(EngineMode::ArchiveAndDelete).unwrap_err();
        assert_eq!(err.code(), "EFMS-2003");
        assert!(old.exists());
    }

    #[test]
    fn delete_only_mode_never_copies() {
        let fx = fixture();
        let old = fx.videos.join("old.mp4");
        write_file(&old);

        let prober = FakeProber {
            ages: HashMap::from([(old.clone(), 200.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![],
        };
        let copier = Arc::new(FakeCopier::new());
        let engine = engine_with(&fx, prober, Arc::clone(&copier) as Arc<dyn Copier>);

        let report = engine.run(EngineMode::DeleteOnly).unwrap();

        assert!(copier.copied().is_empty());
        assert_eq!(report.files_deleted, 1);
        assert!(!old.exists());
    }

    #[test]
    fn max_utilization_deletes_oldest_until_threshold_met() {
        let fx = fixture();
        let oldest = fx.videos.join("a_oldest.mp4");
        let middle = fx.videos.join("b_middle.mp4");
        let newest = fx.videos.join("c_newest.mp4");
        for (path, hours) in [(&oldest, 300_u64), (&middle, 200), (&newest, 100)] {
            write_file(path);
            let mtime = std::time::SystemTime::now()
                - std::time::Duration::from_secs(hours * 3600);
            filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime))
                .unwrap();
        }

        // First reading selects the pipeline; the next two justify deletes;
        // the fourth is at threshold and stops the root.
        let prober = FakeProber::with_utilization(&[92.0, 91.0, 88.0, 80.0]);
        let copier = Arc::new(FakeCopier::new());
        let engine = engine_with(&fx, prober, Arc::clone(&copier) as Arc<dyn Copier>);

        let report = engine.run(EngineMode::ArchiveAndDelete).unwrap();

        assert_eq!(report.pipeline, PipelineKind::MaxUtilization);
        assert_eq!(report.files_deleted, 2);
        assert!(!oldest.exists());
        assert!(!middle.exists());
        assert!(newest.exists(), "files after the break are untouched");
        assert!(copier.copied().is_empty(), "max utilization never copies");
    }

    #[test]
    fn failed_utilization_probe_aborts_max_run() {
        let fx = fixture();
        let old = fx.videos.join("old.mp4");
        write_file(&old);

        // One scripted value selects MaxUtilization, then the per-file
        // probe fails.
        let prober = FakeProber::with_utilization(&[92.0]);
        let engine = engine_with(&fx, prober, Arc::new(FakeCopier::new()));

        let err = engine.run(EngineMode::DeleteOnly).unwrap_err();
        assert_eq!(err.code(), "EFMS-2001");
        assert!(old.exists(), "nothing is deleted after a failed probe");
    }

    #[test]
    fn missing_root_is_skipped_not_fatal() {
        let fx = fixture();
        std::fs::remove_dir_all(&fx.videos).unwrap();

        let prober = FakeProber::with_utilization(&[60.0]);
        let engine = engine_with(&fx, prober, Arc::new(FakeCopier::new()));

        let report = engine.run(EngineMode::DeleteOnly).unwrap();
        assert_eq!(report.roots_skipped, 1);
        assert_eq!(report.roots_processed, 0);
    }

    #[test]
    fn empty_directories_are_swept_after_the_root() {
        let fx = fixture();
        std::fs::create_dir_all(fx.videos.join("cam0/2024/01")).unwrap();
        let kept = fx.videos.join("cam1");
        std::fs::create_dir_all(&kept).unwrap();
        write_file(&kept.join("recent.mp4"));

        let prober = FakeProber {
            ages: HashMap::from([(kept.join("recent.mp4"), 1.0)]),
            utilization: Mutex::new(vec![60.0]),
            inaccessible: vec![],
        };
        let engine = engine_with(&fx, prober, Arc::new(FakeCopier::new()));

        let report = engine.run(EngineMode::DeleteOnly).unwrap();
        assert_eq!(report.dirs_removed, 3);
        assert!(!fx.videos.join("cam0").exists());
        assert!(kept.exists());
    }
}
