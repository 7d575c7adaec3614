//! An active Btrfs mountpoint on the system.
//!
//! Represents one mounted instance and runs the maintenance commands
//! against it: usage query, device error statistics, scrub and
//! balance. All operations are synchronous and block until the
//! external tool returns.

use std::fs;
use std::process::{Command, Output};

use serde::Deserialize;
use tracing::{debug, info};

use cowherd_common::Error;

/// External command used for all Btrfs actions.
const BTRFS_CMD: &str = "btrfs";

/// One mounted Btrfs filesystem instance.
#[derive(Debug, Clone)]
pub struct Filesystem {
    device_name: String,
    mountpoint: String,
    devno: u64,
    command: String,
}

impl Filesystem {
    /// Create a new filesystem handle.
    ///
    /// Panics on an empty mountpoint; that can only happen through a
    /// programming error, never through bad user input.
    pub fn new(device_name: &str, devno: u64, mountpoint: &str) -> Self {
        assert!(!mountpoint.is_empty(), "Mountpoint for {} is empty!", device_name);
        Self {
            device_name: device_name.to_string(),
            mountpoint: mountpoint.to_string(),
            devno,
            command: BTRFS_CMD.to_string(),
        }
    }

    /// The device name backing this mountpoint.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// The mountpoint path.
    pub fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    /// The physical device number. Mountpoints sharing it are backed
    /// by the same storage volume.
    pub fn devno(&self) -> u64 {
        self.devno
    }

    /// Replace the external command used for all actions. Tests use
    /// this to substitute a stub for the real btrfs tool.
    pub fn set_command(&mut self, command: &str) {
        self.command = command.to_string();
    }

    /// Read filesystem usage information (btrfs fi df).
    pub fn read_usage(&self) -> Result<String, Error> {
        let output = Command::new(&self.command)
            .args(["fi", "df", &self.mountpoint])
            .output()
            .map_err(|e| Error::Failed(format!("Failed to execute btrfs fi df command: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Failed(format!(
                "Running btrfs fi df has failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Read per-device error statistics.
    ///
    /// Returns a human-readable report listing all devices (with full
    /// counter detail for any device that has issues) and the total
    /// error count summed over all devices.
    pub fn read_error_stats(&self) -> Result<(String, u64), Error> {
        debug!("Running btrfs device stats on {}", self.mountpoint);
        let output = Command::new(&self.command)
            .args(["--format=json", "device", "stats", &self.mountpoint])
            .output()
            .map_err(|e| Error::Failed(format!("Failed to execute btrfs stats command: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Failed(format!(
                "Running btrfs stats has failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let document: DeviceStatsDocument = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Parse(format!("Failed to parse btrfs stats JSON: {}", e)))?;
        let stats = document.device_stats.ok_or_else(|| {
            Error::Parse("Failed to parse stats output: No 'device-stats' section.".to_string())
        })?;

        Ok(build_stats_report(&stats))
    }

    /// Run a blocking scrub over the whole filesystem.
    pub fn scrub(&self) -> Result<(), Error> {
        info!("Running btrfs scrub on {}", self.mountpoint);
        let output = Command::new(&self.command)
            .args(["-q", "scrub", "start", "-B", &self.mountpoint])
            .output()
            .map_err(|e| Error::Failed(format!("Failed to execute btrfs scrub command: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Scrub(combine_output(&output)));
        }
        Ok(())
    }

    /// Run a balance pass with conservative usage filters.
    ///
    /// Only block groups below 15% data / 10% metadata usage are
    /// touched, and the operation is enqueued if the kernel supports
    /// queuing, so we return once the work is scheduled.
    pub fn balance(&self) -> Result<(), Error> {
        info!("Running btrfs balance on {}", self.mountpoint);
        let output = Command::new(&self.command)
            .args([
                "balance",
                "start",
                "--enqueue",
                "-dusage=15",
                "-musage=10",
                &self.mountpoint,
            ])
            .output()
            .map_err(|e| Error::Failed(format!("Failed to execute btrfs balance command: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Balance(combine_output(&output)));
        }
        Ok(())
    }
}

/// Combine stderr and stdout of a failed command into one diagnostic
/// message, skipping whichever stream is empty.
fn combine_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if stdout.is_empty() {
        stderr
    } else if stderr.is_empty() {
        stdout
    } else {
        format!("{}\n{}", stderr, stdout)
    }
}

#[derive(Debug, Deserialize)]
struct DeviceStatsDocument {
    #[serde(rename = "device-stats")]
    device_stats: Option<Vec<DeviceStat>>,
}

#[derive(Debug, Deserialize)]
struct DeviceStat {
    device: String,
    devid: String,
    write_io_errs: i64,
    read_io_errs: i64,
    flush_io_errs: i64,
    corruption_errs: i64,
    generation_errs: i64,
}

fn build_stats_report(stats: &[DeviceStat]) -> (String, u64) {
    let mut intro_text = String::from("Registered Devices:\n");
    let mut issues_text = String::from("Issue Report:\n");
    let mut total_errors: u64 = 0;

    for stat in stats {
        let device_errors = (stat.write_io_errs
            + stat.read_io_errs
            + stat.flush_io_errs
            + stat.corruption_errs
            + stat.generation_errs)
            .max(0) as u64;
        total_errors += device_errors;

        intro_text.push_str(&format!("  • {}\n", stat.device));

        // devices without issues are only listed, not reported on
        if device_errors == 0 {
            continue;
        }

        issues_text.push_str(&format!("Device: {}\n", stat.device));
        issues_text.push_str(&format!("Devid:  {}\n", stat.devid));
        issues_text.push_str(&format!("Write IO Errors: {}\n", stat.write_io_errs));
        issues_text.push_str(&format!("Read IO Errors:  {}\n", stat.read_io_errs));
        issues_text.push_str(&format!("Flush IO Errors: {}\n", stat.flush_io_errs));
        issues_text.push_str(&format!("Corruption Errors: {}\n", stat.corruption_errs));
        issues_text.push_str(&format!("Generation Errors: {}\n\n", stat.generation_errs));
    }

    if total_errors == 0 {
        issues_text.push_str("  • No errors found\n");
    }

    let report = format!("{}\n{}", intro_text, issues_text);
    (report.trim_end().to_string(), total_errors)
}

/// Find all mounted Btrfs filesystems on the current system.
pub fn find_mounted_filesystems() -> Result<Vec<Filesystem>, Error> {
    let content = fs::read_to_string("/proc/self/mountinfo")
        .map_err(|e| Error::Failed(format!("Failed to parse mount table: {}", e)))?;
    Ok(parse_mountinfo(&content))
}

/// Parse the kernel mountinfo table, keeping only Btrfs entries.
fn parse_mountinfo(content: &str) -> Vec<Filesystem> {
    let mut result = Vec::new();

    for line in content.lines() {
        // fields: id parent major:minor root mountpoint options... - fstype source super_options
        let Some((head, tail)) = line.split_once(" - ") else {
            continue;
        };
        let head_parts: Vec<&str> = head.split_whitespace().collect();
        let tail_parts: Vec<&str> = tail.split_whitespace().collect();
        if head_parts.len() < 5 || tail_parts.len() < 2 {
            continue;
        }
        if tail_parts[0] != "btrfs" {
            continue;
        }

        let Some(devno) = parse_devno(head_parts[2]) else {
            continue;
        };
        let mountpoint = decode_mount_path(head_parts[4]);
        let device = decode_mount_path(tail_parts[1]);
        if mountpoint.is_empty() {
            continue;
        }
        result.push(Filesystem::new(&device, devno, &mountpoint));
    }

    result
}

/// Pack a `major:minor` device number pair into one comparable id.
fn parse_devno(field: &str) -> Option<u64> {
    let (major, minor) = field.split_once(':')?;
    let major: u64 = major.parse().ok()?;
    let minor: u64 = minor.parse().ok()?;
    Some((major << 32) | minor)
}

/// Undo the octal escaping the kernel applies to whitespace and
/// backslashes in mountinfo paths.
fn decode_mount_path(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && (b'0'..=b'3').contains(&bytes[i + 1])
            && bytes[i + 2..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
