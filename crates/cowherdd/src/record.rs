//! Per-filesystem persisted maintenance state.
//!
//! Stores last-run timestamps, error counters and notification
//! bookkeeping for one Btrfs mountpoint in a small TOML key-file under
//! the state directory. Records survive across the hourly invocations
//! of the process and are never deleted.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use cowherd_common::paths;
use cowherd_common::Error;

/// Maintenance actions, in their fixed execution order.
///
/// The order is ascending in both risk and cost: checking error
/// counters is cheap, scrubbing reads all data, balancing rewrites
/// block groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Stats,
    Scrub,
    Balance,
}

impl Action {
    /// All actions in execution order.
    pub const ALL: [Action; 3] = [Action::Stats, Action::Scrub, Action::Balance];

    /// Key used for this action in configuration and state files.
    pub fn key(self) -> &'static str {
        match self {
            Action::Stats => "stats",
            Action::Scrub => "scrub",
            Action::Balance => "balance",
        }
    }

    /// Human-readable label for reports.
    pub fn human_label(self) -> &'static str {
        match self {
            Action::Stats => "Check for Issues",
            Action::Scrub => "Scrub Filesystem",
            Action::Balance => "Balance Filesystem",
        }
    }

    /// Whether the action is cheap enough to run on battery power.
    pub fn battery_safe(self) -> bool {
        matches!(self, Action::Stats)
    }
}

/// State record for one mounted filesystem.
#[derive(Debug)]
pub struct FsRecord {
    mountpoint: String,
    state_dir: PathBuf,
    groups: BTreeMap<String, BTreeMap<String, i64>>,
    is_new: bool,
}

impl FsRecord {
    /// Create a record handle for `mountpoint`, backed by the default
    /// state directory.
    pub fn new(mountpoint: &str) -> Self {
        Self::with_state_dir(mountpoint, paths::STATE_DIR)
    }

    /// Create a record handle with an explicit state directory.
    pub fn with_state_dir(mountpoint: &str, state_dir: impl Into<PathBuf>) -> Self {
        assert!(!mountpoint.is_empty(), "Mountpoint for record file is empty!");
        Self {
            mountpoint: mountpoint.to_string(),
            state_dir: state_dir.into(),
            groups: BTreeMap::new(),
            is_new: false,
        }
    }

    /// The mountpoint this record belongs to.
    pub fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    fn state_file_path(&self) -> PathBuf {
        self.state_dir
            .join(format!("{}.state", paths::path_to_filename(&self.mountpoint)))
    }

    /// Load the record from disk.
    ///
    /// If no file exists yet, the record is marked new and all
    /// timestamps except the one for [`Action::Stats`] are backfilled
    /// to now: running the cheap stats check immediately is fine, the
    /// expensive actions should wait a full interval first. A file
    /// that exists but fails to parse is reported as an error; the
    /// in-memory record stays empty so the caller can continue.
    pub fn load(&mut self) -> Result<(), Error> {
        let path = self.state_file_path();
        if !path.exists() {
            self.is_new = true;
            let now = Utc::now().timestamp();
            for action in Action::ALL {
                if action != Action::Stats {
                    self.set_last_action_time(action, now);
                }
            }
            return Ok(());
        }

        let content = fs::read_to_string(&path)?;
        self.groups = toml::from_str(&content).map_err(|e| {
            Error::Parse(format!(
                "Failed to load state record {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Save the record to its canonical path, creating the state
    /// directory if needed.
    pub fn save(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.state_dir)?;
        let content = toml::to_string(&self.groups)
            .map_err(|e| Error::Failed(format!("Failed to serialize state record: {}", e)))?;
        fs::write(self.state_file_path(), content)?;
        Ok(())
    }

    /// Check whether the record file was just created.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Last UNIX timestamp the action ran successfully, or 0 if never.
    pub fn last_action_time(&self, action: Action) -> i64 {
        self.value_int("times", action.key(), 0)
    }

    /// Record the last successful run time of an action.
    pub fn set_last_action_time(&mut self, action: Action, timestamp: i64) {
        self.set_value_int("times", action.key(), timestamp);
    }

    /// Read an integer value from the record, falling back to
    /// `default` if the group or key is absent.
    pub fn value_int(&self, group: &str, key: &str, default: i64) -> i64 {
        self.groups
            .get(group)
            .and_then(|g| g.get(key))
            .copied()
            .unwrap_or(default)
    }

    /// Set an integer value in the record.
    pub fn set_value_int(&mut self, group: &str, key: &str, value: i64) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
}
