//! Scheduler configuration.
//!
//! Thin accessor over a TOML section→key→value table: one table per
//! mountpoint plus a `default` table. The scheduler never touches the
//! raw table directly, it only asks for resolved values.

use std::fs;
use std::path::Path;

use tracing::debug;

use cowherd_common::duration::parse_duration;
use cowherd_common::Error;

use crate::record::Action;

/// Default configuration file location.
pub const CONFIG_PATH: &str = "/etc/cowherd/settings.toml";

/// Built-in interval defaults, used when neither the mountpoint table
/// nor the `default` table provides a value. Balancing is the riskiest
/// and least necessary action for most setups, so it stays off unless
/// explicitly enabled.
fn builtin_interval(action: Action) -> &'static str {
    match action {
        Action::Stats => "1h",
        Action::Scrub => "1M",
        Action::Balance => "never",
    }
}

/// Resolved configuration for one scheduler pass.
#[derive(Debug, Clone, Default)]
pub struct Config {
    table: toml::Table,
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file simply yields the defaults; a file that exists
    /// but cannot be parsed is an error.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            debug!("No configuration file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let table = content
            .parse::<toml::Table>()
            .map_err(|e| Error::Parse(format!("Failed to load configuration: {}", e)))?;
        Ok(Self { table })
    }

    fn section_value(&self, section: &str, key: &str) -> Option<&str> {
        self.table.get(section)?.as_table()?.get(key)?.as_str()
    }

    /// Look up a key for a mountpoint, falling back to the `default`
    /// section.
    fn lookup(&self, mountpoint: &str, key: &str) -> Option<&str> {
        self.section_value(mountpoint, key)
            .or_else(|| self.section_value("default", key))
    }

    /// Resolved interval in seconds for one action on one filesystem.
    ///
    /// 0 means the action is disabled and must never run.
    pub fn interval_for(&self, mountpoint: &str, action: Action) -> u64 {
        let key = format!("{}_interval", action.key());
        match self.lookup(mountpoint, &key) {
            Some(value) => parse_duration(value),
            None => parse_duration(builtin_interval(action)),
        }
    }

    /// Address that issue mails for this filesystem should go to.
    pub fn mail_address(&self, mountpoint: &str) -> Option<&str> {
        self.lookup(mountpoint, "mail_address")
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Sender address for issue mails, if configured.
    pub fn mail_from(&self, mountpoint: &str) -> Option<&str> {
        self.lookup(mountpoint, "mail_from")
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
