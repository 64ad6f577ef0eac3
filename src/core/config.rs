//! Policy configuration: JSON policy document, typed per-category retention
//! rules, and a caching policy store.
//!
//! The policy set is an immutable value object constructed once from the
//! configuration file and passed explicitly into each controller. A second
//! `load()` returns the cached set; only an explicit `reload()` re-reads the
//! file.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{EfmsError, Result};

// ──────────────────── categories ────────────────────

/// File categories tracked by the retention and archival policies.
///
/// Classification is by path-substring tagging, matching in this fixed
/// precedence order; the first marker found wins. Files matching no marker
/// are untracked and ignored by both archival and deletion logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Videos,
    Analysis,
    Diagnostics,
    Logs,
    VideoClips,
}

impl Category {
    /// All categories, in classification precedence order.
    pub const ALL: [Self; 5] = [
        Self::Videos,
        Self::Analysis,
        Self::Diagnostics,
        Self::Logs,
        Self::VideoClips,
    ];

    /// The path substring that tags a file as belonging to this category.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Videos => "Videos",
            Self::Analysis => "Analysis",
            Self::Diagnostics => "Diagnostics",
            Self::Logs => "Logs",
            Self::VideoClips => "VideoClips",
        }
    }

    /// Classify a path by substring match, first marker wins.
    #[must_use]
    pub fn classify(path: &Path) -> Option<Self> {
        let text = path.to_string_lossy();
        Self::ALL.into_iter().find(|c| text.contains(c.marker()))
    }

    /// Whether archival status for this category is tracked in the datastore
    /// (as opposed to a direct existence check at the destination).
    #[must_use]
    pub const fn tracked_in_datastore(self) -> bool {
        matches!(self, Self::Videos | Self::Analysis)
    }
}

// ──────────────────── policy model ────────────────────

/// Retention rule for one category (optionally station-scoped via its key).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryPolicy {
    /// Category this rule governs.
    pub category: Category,
    /// Root directory this policy governs.
    pub path: PathBuf,
    /// Whether the policy is active.
    pub enabled: bool,
    /// Files older than this many hours are deletion-eligible.
    pub retention_hours: u32,
    /// Extensions this policy recognizes. Descriptive metadata only;
    /// eligibility matching is done by category tagging.
    #[serde(default)]
    pub file_extensions: Vec<String>,
    /// Whether files in this category are copied to secondary storage.
    #[serde(default)]
    pub archive_enabled: bool,
}

/// Scheduler intervals for the two controllers plus the poll tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub archival_interval_minutes: u64,
    pub retention_interval_minutes: u64,
    pub poll_tick_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            archival_interval_minutes: 5,
            retention_interval_minutes: 5,
            poll_tick_seconds: 1,
        }
    }
}

/// Activity-log file locations and rotation tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub jsonl_path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_path: PathBuf::from("/var/lib/efms/activity.jsonl"),
            fallback_path: Some(PathBuf::from("/dev/shm/efms.jsonl")),
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 30,
        }
    }
}

/// Incident and archival-location datastore location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub sqlite_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("/var/lib/efms/efms.sqlite3"),
        }
    }
}

/// The full effective policy set handed to the controllers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySet {
    /// Primary storage root being monitored.
    pub mount_path: PathBuf,
    /// Secondary (archival) storage root files are copied to.
    pub secondary_path: PathBuf,
    /// Disk-utilization percentage above which the max-utilization pipeline
    /// runs. Must be within 0–100.
    pub utilization_threshold_pct: f64,
    /// Bandwidth cap handed to the external copy tool, in KB/s.
    #[serde(default = "default_bandwidth_kbps")]
    pub copy_bandwidth_kbps: u32,
    /// Per-category retention rules, keyed by config key (station-scoped
    /// keys such as `videos_stn01` are allowed).
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryPolicy>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

const fn default_bandwidth_kbps() -> u32 {
    10_240
}

impl PolicySet {
    /// Parse and validate a policy set from a JSON document.
    pub fn from_json(text: &str) -> Result<Self> {
        let set: Self = serde_json::from_str(text).map_err(|e| EfmsError::ConfigParse {
            context: "policy json",
            details: e.to_string(),
        })?;
        set.validate()?;
        Ok(set)
    }

    /// Validate the invariants the controllers depend on.
    pub fn validate(&self) -> Result<()> {
        if self.mount_path.as_os_str().is_empty() {
            return Err(EfmsError::InvalidConfig {
                details: "mount_path must be set".to_string(),
            });
        }
        if self.secondary_path.as_os_str().is_empty() {
            return Err(EfmsError::InvalidConfig {
                details: "secondary_path must be set".to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.utilization_threshold_pct) {
            return Err(EfmsError::InvalidConfig {
                details: format!(
                    "utilization_threshold_pct must be within 0-100, got {}",
                    self.utilization_threshold_pct
                ),
            });
        }
        for (key, policy) in &self.categories {
            if policy.path.as_os_str().is_empty() {
                return Err(EfmsError::InvalidConfig {
                    details: format!("category {key} has an empty path"),
                });
            }
            // A root outside the mount could never be mapped to secondary
            // storage.
            if !policy.path.starts_with(&self.mount_path) {
                return Err(EfmsError::InvalidConfig {
                    details: format!(
                        "category {key} path {} is outside mount_path {}",
                        policy.path.display(),
                        self.mount_path.display()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Root paths to scan: the path of every enabled category policy, in
    /// stable (key) order, deduplicated.
    #[must_use]
    pub fn scan_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        for policy in self.categories.values() {
            if policy.enabled && !roots.contains(&policy.path) {
                roots.push(policy.path.clone());
            }
        }
        roots
    }

    /// Find the policy governing a file: classify its category, then pick
    /// the matching enabled policy with the longest path prefix. Station
    /// variants of the same category resolve to the one whose root actually
    /// contains the file.
    #[must_use]
    pub fn policy_for(&self, path: &Path) -> Option<(&str, &CategoryPolicy)> {
        let category = Category::classify(path)?;
        self.categories
            .iter()
            .filter(|(_, p)| p.enabled && p.category == category && path.starts_with(&p.path))
            .max_by_key(|(_, p)| p.path.as_os_str().len())
            .map(|(key, p)| (key.as_str(), p))
    }

    /// Map a file under the mount path to its destination under the
    /// secondary storage path.
    pub fn destination_path(&self, path: &Path) -> Result<PathBuf> {
        let relative =
            path.strip_prefix(&self.mount_path)
                .map_err(|_| EfmsError::OutsideMount {
                    path: path.to_path_buf(),
                    mount: self.mount_path.clone(),
                })?;
        Ok(self.secondary_path.join(relative))
    }
}

// ──────────────────── policy store ────────────────────

/// Caching loader for the policy file. `load()` reads once and caches;
/// `reload()` re-reads explicitly (SIGHUP path).
pub struct PolicyStore {
    config_path: PathBuf,
    cached: Mutex<Option<Arc<PolicySet>>>,
}

impl PolicyStore {
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Path of the backing policy file.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the policy set, returning the cached copy after the first call.
    pub fn load(&self) -> Result<Arc<PolicySet>> {
        let mut cached = self.cached.lock();
        if let Some(set) = cached.as_ref() {
            return Ok(Arc::clone(set));
        }
        let set = Arc::new(self.read_from_disk()?);
        *cached = Some(Arc::clone(&set));
        Ok(set)
    }

    /// Force a re-read of the policy file, replacing the cache on success.
    /// On failure the previous cached set is left in place.
    pub fn reload(&self) -> Result<Arc<PolicySet>> {
        let set = Arc::new(self.read_from_disk()?);
        *self.cached.lock() = Some(Arc::clone(&set));
        Ok(set)
    }

    fn read_from_disk(&self) -> Result<PolicySet> {
        let text = fs::read_to_string(&self.config_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EfmsError::MissingConfig {
                    path: self.config_path.clone(),
                }
            } else {
                EfmsError::io(&self.config_path, e)
            }
        })?;
        PolicySet::from_json(&text)
    }
}

// ──────────────────── tests ────────────────────
