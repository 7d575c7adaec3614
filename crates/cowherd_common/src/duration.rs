//! Parsing and rendering of human-authored maintenance intervals.

const SECONDS_IN_AN_HOUR: u64 = 60 * 60;
const SECONDS_IN_A_DAY: u64 = 24 * SECONDS_IN_AN_HOUR;
const SECONDS_IN_A_WEEK: u64 = 7 * SECONDS_IN_A_DAY;
/// An average month is assumed to have 30.44 days.
const SECONDS_IN_A_MONTH: u64 = 2_630_016;

/// Parse a duration string like `1h`, `4d`, `2w` or `3M` into seconds.
///
/// A bare number defaults to hours. `M` means month; the lowercase `m`
/// is not a valid unit. Returns 0 for `never`, empty or otherwise
/// invalid input; callers treat 0 as "disabled".
pub fn parse_duration(s: &str) -> u64 {
    let s = s.trim();
    if s.is_empty() {
        return 0;
    }

    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    let value: u64 = digits.parse().unwrap_or(0);
    if value == 0 {
        return 0;
    }

    let Some(suffix) = s.chars().last() else {
        return 0;
    };
    let multiplier = match suffix {
        'h' => SECONDS_IN_AN_HOUR,
        'd' => SECONDS_IN_A_DAY,
        'w' => SECONDS_IN_A_WEEK,
        'M' => SECONDS_IN_A_MONTH,
        // no suffix, default to hours
        c if c.is_ascii_digit() => SECONDS_IN_AN_HOUR,
        // a trailing non-digit that is not a known unit is an error
        _ => return 0,
    };

    value * multiplier
}

/// Render a duration in seconds as a short human-readable string,
/// using the largest unit that divides it evenly.
pub fn humanize_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "disabled".to_string();
    }

    let (value, unit) = if seconds % SECONDS_IN_A_MONTH == 0 {
        (seconds / SECONDS_IN_A_MONTH, "month")
    } else if seconds % SECONDS_IN_A_WEEK == 0 {
        (seconds / SECONDS_IN_A_WEEK, "week")
    } else if seconds % SECONDS_IN_A_DAY == 0 {
        (seconds / SECONDS_IN_A_DAY, "day")
    } else if seconds % SECONDS_IN_AN_HOUR == 0 {
        (seconds / SECONDS_IN_AN_HOUR, "hour")
    } else {
        (seconds, "second")
    };

    if value == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", value, unit)
    }
}
