//! Scheduling and state tracking for Btrfs maintenance actions.
//!
//! The scheduler enumerates mounted filesystems, deduplicates mounts
//! that share a physical volume, decides per filesystem and action
//! whether a run is due, executes the action and records the outcome.
//! One pass is driven by a single reference timestamp so the hourly
//! re-invocation can never miss an action through clock drift.

use std::path::PathBuf;

use chrono::{Local, TimeZone, Utc};
use tracing::{debug, info, warn};

use cowherd_common::duration::humanize_duration;
use cowherd_common::template::render_template;
use cowherd_common::{mailer, paths, power, privilege, Error};

use crate::config::{Config, CONFIG_PATH};
use crate::filesystem::{find_mounted_filesystems, Filesystem};
use crate::record::{Action, FsRecord};

/// Safety margin subtracted from the wall clock when the reference
/// time is captured, so a pass started a few seconds early by the
/// timer still sees every hourly action as due.
const REFERENCE_TIME_MARGIN: i64 = 60;

/// Minimum delay between repeated terminal broadcasts while the error
/// count stays unchanged.
const BROADCAST_RENOTIFY_SECS: i64 = 6 * 3600;

/// Minimum delay between repeated issue mails while the error count
/// stays unchanged.
const MAIL_RENOTIFY_SECS: i64 = 20 * 3600;

const ISSUE_MAIL_TEMPLATE: &str = "\
From: {{mail_from}}
Subject: Btrfs issues detected on {{hostname}}:{{mountpoint}}

Hello!

This is the Btrfs maintenance service on {{hostname}}.
Errors were detected on the filesystem mounted at {{mountpoint}}.
Please review the report below; the system log may contain further
details.

{{issue_report}}

Current Allocation:
{{usage_report}}

Message generated on {{date}}
";

/// Schedules maintenance actions according to the user's preferences.
#[derive(Debug)]
pub struct Scheduler {
    loaded: bool,
    filesystems: Vec<Filesystem>,
    config: Config,
    config_path: PathBuf,
    state_dir: PathBuf,
    reference_time: i64,
}

impl Scheduler {
    /// Create a scheduler using the system configuration and state
    /// locations.
    pub fn new() -> Self {
        Self::with_paths(CONFIG_PATH, paths::STATE_DIR)
    }

    /// Create a scheduler with explicit configuration file and state
    /// directory locations.
    pub fn with_paths(config_path: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            loaded: false,
            filesystems: Vec::new(),
            config: Config::default(),
            config_path: config_path.into(),
            state_dir: state_dir.into(),
            reference_time: 0,
        }
    }

    /// Load scheduler data: enumerate mounted Btrfs filesystems and
    /// read the configuration.
    pub fn load(&mut self) -> Result<(), Error> {
        if self.loaded {
            return Err(Error::Failed(
                "Tried to initialize an already initialized scheduler.".to_string(),
            ));
        }
        let mounts = find_mounted_filesystems()?;
        self.load_with_mounts(mounts)
    }

    /// Load scheduler data for an explicit set of mounted filesystems
    /// instead of probing the kernel mount table.
    pub fn load_with_mounts(&mut self, mounts: Vec<Filesystem>) -> Result<(), Error> {
        if self.loaded {
            return Err(Error::Failed(
                "Tried to initialize an already initialized scheduler.".to_string(),
            ));
        }

        self.reference_time = Utc::now().timestamp() - REFERENCE_TIME_MARGIN;
        self.filesystems = mounts;
        self.config = Config::load(&self.config_path)?;
        self.loaded = true;
        Ok(())
    }

    /// The reference timestamp all due-time decisions of this pass
    /// use. Only meaningful once loaded.
    pub fn reference_time(&self) -> i64 {
        self.reference_time
    }

    /// Run all due maintenance actions on all mounted filesystems.
    pub fn run(&mut self) -> Result<(), Error> {
        if !self.loaded {
            self.load()?;
        }

        privilege::ensure_root("Running filesystem maintenance")?;

        if self.filesystems.is_empty() {
            // a system without Btrfs filesystems is not an error
            debug!("No mounted Btrfs filesystems found, nothing to do.");
            return Ok(());
        }

        for group in group_by_device(&self.filesystems) {
            self.process_filesystem(&group.canonical);
        }
        Ok(())
    }

    /// Run all due maintenance actions for a single filesystem and
    /// persist its record. Failures are logged and never interrupt the
    /// processing of other filesystems. The scheduler must be loaded.
    pub fn process_filesystem(&self, fs: &Filesystem) {
        debug!("Processing filesystem {}", fs.mountpoint());

        let mut record = FsRecord::with_state_dir(fs.mountpoint(), &self.state_dir);
        if let Err(e) = record.load() {
            warn!(
                "Failed to load state record for {}, proceeding with empty state: {}",
                fs.mountpoint(),
                e
            );
        }

        for action in Action::ALL {
            let interval = self.config.interval_for(fs.mountpoint(), action) as i64;
            if interval == 0 {
                debug!("Skipping {} on {}: action is disabled", action.key(), fs.mountpoint());
                continue;
            }

            let last_run = record.last_action_time(action);
            if !action_is_due(last_run, interval, self.reference_time) {
                debug!("Skipping {} on {}: not yet due", action.key(), fs.mountpoint());
                continue;
            }

            if !action.battery_safe() && power::on_battery() {
                debug!(
                    "Skipping {} on {}: system is running on battery power",
                    action.key(),
                    fs.mountpoint()
                );
                continue;
            }

            let result = match action {
                Action::Stats => self.run_stats(fs, &mut record),
                Action::Scrub => fs.scrub(),
                Action::Balance => fs.balance(),
            };

            match result {
                // stamp with the pass reference time, so the action is
                // retried on failure and never re-run early on success
                Ok(()) => record.set_last_action_time(action, self.reference_time),
                Err(e) => warn!("Action {} failed on {}: {}", action.key(), fs.mountpoint(), e),
            }
        }

        // saved even if nothing ran, to capture bootstrap bookkeeping
        if let Err(e) = record.save() {
            warn!("Failed to save state record for {}: {}", fs.mountpoint(), e);
        }
    }

    /// Check error statistics and notify the operator about issues.
    fn run_stats(&self, fs: &Filesystem, record: &mut FsRecord) -> Result<(), Error> {
        let usage_report = fs.read_usage()?;
        let (issue_report, error_count) = fs.read_error_stats()?;
        let error_count = error_count as i64;

        let last_errors = record.value_int("errors", "total", 0);
        record.set_value_int("errors", "total", error_count);
        if error_count == 0 {
            return Ok(());
        }

        let errors_increased = error_count > last_errors;
        info!(
            "Filesystem {} reports {} device errors",
            fs.mountpoint(),
            error_count
        );

        let last_broadcast = record.value_int("messages", "broadcast_sent", 0);
        if should_broadcast(errors_increased, last_broadcast, self.reference_time) {
            mailer::broadcast_message(&format!(
                "\nWarning! The Btrfs filesystem at {} reports {} device errors.\n\
                 Check the system logs for details.\n",
                fs.mountpoint(),
                error_count
            ));
            record.set_value_int("messages", "broadcast_sent", self.reference_time);
        }

        let Some(mail_address) = self.config.mail_address(fs.mountpoint()) else {
            warn!(
                "Issues were found on {}, but no mail address is configured to send reports to.",
                fs.mountpoint()
            );
            return Ok(());
        };

        let last_mail = record.value_int("messages", "issue_mail_sent", 0);
        if !should_mail(errors_increased, last_mail, self.reference_time) {
            debug!(
                "Suppressing repeated issue mail for {} (no new errors)",
                fs.mountpoint()
            );
            return Ok(());
        }

        if !mailer::have_sendmail() {
            warn!(
                "Can not send issue mail for {}: no sendmail transport available.",
                fs.mountpoint()
            );
            return Ok(());
        }

        let body = self.render_issue_mail(fs, &issue_report, &usage_report);
        mailer::send_email(mail_address, &body)?;
        info!("Sent issue mail for {} to {}", fs.mountpoint(), mail_address);
        record.set_value_int("messages", "issue_mail_sent", self.reference_time);
        Ok(())
    }

    fn render_issue_mail(&self, fs: &Filesystem, issue_report: &str, usage_report: &str) -> String {
        let host = hostname();
        let mail_from = self
            .config
            .mail_from(fs.mountpoint())
            .map(str::to_string)
            .unwrap_or_else(|| format!("cowherd@{}", host));
        let date = Utc
            .timestamp_opt(self.reference_time, 0)
            .single()
            .map(|t| t.to_rfc2822())
            .unwrap_or_default();

        render_template(
            ISSUE_MAIL_TEMPLATE,
            &[
                ("mail_from", &mail_from),
                ("hostname", &host),
                ("mountpoint", fs.mountpoint()),
                ("issue_report", issue_report),
                ("usage_report", usage_report),
                ("date", &date),
            ],
        )
    }

    /// Print the resolved maintenance configuration and last-run
    /// state of every filesystem.
    ///
    /// Returns false if any state record failed to load; the report
    /// itself is still printed completely.
    pub fn print_status(&mut self) -> Result<bool, Error> {
        if !self.loaded {
            self.load()?;
        }

        if self.filesystems.is_empty() {
            println!("No mounted Btrfs filesystems found.");
            return Ok(true);
        }

        let mut all_ok = true;
        println!("Mounted Btrfs filesystems:");
        for group in group_by_device(&self.filesystems) {
            let fs = &group.canonical;

            println!();
            println!("• {}  ({})", group.mountpoints.join(", "), fs.device_name());

            let mut record = FsRecord::with_state_dir(fs.mountpoint(), &self.state_dir);
            if let Err(e) = record.load() {
                println!("    Failed to load state record: {}", e);
                all_ok = false;
            }

            for action in Action::ALL {
                let interval = self.config.interval_for(fs.mountpoint(), action);
                let last_run = record.last_action_time(action);
                let last_text = if record.is_new() || last_run == 0 {
                    "Never".to_string()
                } else {
                    format_timestamp(last_run)
                };

                println!("    {}:", action.human_label());
                println!("      Every: {}", humanize_duration(interval));
                println!("      Last:  {}", last_text);
                if action == Action::Stats {
                    if let Some(address) = self.config.mail_address(fs.mountpoint()) {
                        println!("      Issue Mails To: {}", address);
                    }
                }
            }
        }

        Ok(all_ok)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A set of mountpoints backed by one physical volume, with the
/// canonical entry actions are run against.
#[derive(Debug)]
struct DeviceGroup {
    canonical: Filesystem,
    mountpoints: Vec<String>,
}

/// Sort filesystems by mountpoint and collapse entries sharing a
/// physical device. The first (lowest) mountpoint of each device
/// becomes the canonical one; the others are only kept for display.
fn group_by_device(filesystems: &[Filesystem]) -> Vec<DeviceGroup> {
    let mut sorted: Vec<&Filesystem> = filesystems.iter().collect();
    sorted.sort_by(|a, b| a.mountpoint().cmp(b.mountpoint()));

    let mut groups: Vec<DeviceGroup> = Vec::new();
    for fs in sorted {
        match groups.iter_mut().find(|g| g.canonical.devno() == fs.devno()) {
            Some(group) => {
                debug!(
                    "Filesystem {} already handled via a previous mount of the same volume",
                    fs.mountpoint()
                );
                group.mountpoints.push(fs.mountpoint().to_string());
            }
            None => groups.push(DeviceGroup {
                canonical: fs.clone(),
                mountpoints: vec![fs.mountpoint().to_string()],
            }),
        }
    }

    groups
}

/// An action is due once strictly more than `interval_secs` have
/// elapsed between its last run and the pass reference time.
fn action_is_due(last_run: i64, interval_secs: i64, reference_time: i64) -> bool {
    reference_time - last_run > interval_secs
}

/// Broadcast on worsening error counts immediately, otherwise at most
/// every six hours.
fn should_broadcast(errors_increased: bool, last_broadcast: i64, reference_time: i64) -> bool {
    errors_increased || reference_time - last_broadcast > BROADCAST_RENOTIFY_SECS
}

/// Mail on worsening error counts immediately, otherwise at most
/// roughly once per day.
fn should_mail(errors_increased: bool, last_mail: i64, reference_time: i64) -> bool {
    errors_increased || reference_time - last_mail >= MAIL_RENOTIFY_SECS
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn format_timestamp(timestamp: i64) -> String {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_due_boundary_is_strict() {
        let t0 = 1_700_000_000;
        let interval = 3600;
        assert!(!action_is_due(t0, interval, t0 + interval - 1));
        assert!(!action_is_due(t0, interval, t0 + interval));
        assert!(action_is_due(t0, interval, t0 + interval + 1));
    }

    #[test]
    fn test_action_due_handles_backfilled_future_timestamps() {
        // bootstrap records carry timestamps newer than the reference
        // time; they must never count as due
        let now = 1_700_000_000;
        assert!(!action_is_due(now, 3600, now - 60));
    }

    #[test]
    fn test_never_run_action_is_due() {
        assert!(action_is_due(0, 2_630_016, 1_700_000_000));
    }

    #[test]
    fn test_broadcast_throttling() {
        let now = 1_700_000_000;
        // unchanged errors, last broadcast 5 hours ago: stay quiet
        assert!(!should_broadcast(false, now - 5 * 3600, now));
        // unchanged errors, last broadcast 7 hours ago: notify again
        assert!(should_broadcast(false, now - 7 * 3600, now));
        // worsening errors always notify
        assert!(should_broadcast(true, now - 60, now));
    }

    #[test]
    fn test_mail_throttling() {
        let now = 1_700_000_000;
        // identical error count within 20 hours: only the first mail
        assert!(should_mail(false, 0, now));
        assert!(!should_mail(false, now - 19 * 3600, now));
        // increased count mails immediately, ignoring the window
        assert!(should_mail(true, now - 60, now));
        // unchanged count mails again after the window has passed
        assert!(should_mail(false, now - 21 * 3600, now));
    }

    #[test]
    fn test_group_by_device_dedupes_shared_volumes() {
        let filesystems = vec![
            Filesystem::new("/dev/sda2", 23, "/home"),
            Filesystem::new("/dev/sda2", 23, "/"),
            Filesystem::new("/dev/sdb1", 35, "/srv"),
        ];

        let groups = group_by_device(&filesystems);
        assert_eq!(groups.len(), 2);
        // the lowest-sorting mountpoint becomes canonical
        assert_eq!(groups[0].canonical.mountpoint(), "/");
        assert_eq!(groups[0].mountpoints, vec!["/", "/home"]);
        assert_eq!(groups[1].canonical.mountpoint(), "/srv");
    }

    #[test]
    fn test_load_twice_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut scheduler =
            Scheduler::with_paths(temp.path().join("settings.toml"), temp.path().join("state"));
        scheduler.load_with_mounts(Vec::new()).unwrap();
        let err = scheduler.load_with_mounts(Vec::new()).unwrap_err();
        assert!(err.to_string().contains("already initialized"));
    }

    #[test]
    fn test_reference_time_has_safety_margin() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut scheduler =
            Scheduler::with_paths(temp.path().join("settings.toml"), temp.path().join("state"));
        scheduler.load_with_mounts(Vec::new()).unwrap();

        let now = Utc::now().timestamp();
        let reference = scheduler.reference_time();
        assert!(reference <= now - REFERENCE_TIME_MARGIN);
        assert!(reference > now - REFERENCE_TIME_MARGIN - 60);
    }
}
