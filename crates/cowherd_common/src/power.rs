//! Power-state probing.
//!
//! The scheduler only needs one bit from the power subsystem: whether
//! the machine currently runs on battery. Answered by reading
//! /sys/class/power_supply, treating an online mains adapter as AC and
//! a discharging battery as battery power.

use std::fs;
use std::path::Path;

/// Power source type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSource {
    /// Running on AC power
    AC,
    /// Running on battery
    Battery,
    /// Unknown or mixed
    Unknown,
}

/// Check whether the system is currently running on battery power.
///
/// An unknown power state is treated as AC, so machines without any
/// battery never have maintenance actions held back.
pub fn on_battery() -> bool {
    power_source() == PowerSource::Battery
}

/// Determine the current power source.
pub fn power_source() -> PowerSource {
    power_source_at(Path::new("/sys/class/power_supply"))
}

fn power_source_at(base: &Path) -> PowerSource {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(_) => return PowerSource::Unknown,
    };

    let mut supplies = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let supply_type = fs::read_to_string(path.join("type"))
            .unwrap_or_default()
            .trim()
            .to_string();
        supplies.push((path, supply_type));
    }

    // an online mains supply wins over any battery state
    for (path, supply_type) in &supplies {
        if supply_type == "Mains" {
            if let Ok(content) = fs::read_to_string(path.join("online")) {
                if content.trim() == "1" {
                    return PowerSource::AC;
                }
            }
        }
    }

    for (path, supply_type) in &supplies {
        if supply_type == "Battery" {
            if let Ok(status) = fs::read_to_string(path.join("status")) {
                let status = status.trim();
                if status == "Discharging" {
                    return PowerSource::Battery;
                } else if status == "Charging" || status == "Full" {
                    return PowerSource::AC;
                }
            }
        }
    }

    PowerSource::Unknown
}
