//! Size, speed and remaining-time formatting
//!
//! Pure helpers shared by the transfer registry and any front end that renders
//! transfer rows. Units are binary (1 KB = 1024 B).

use regex::Regex;

/// Shown when the remaining time cannot be estimated
pub const UNKNOWN_TIME: &str = "--:--";

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Decimal places kept by [`format_bytes`]
const SIZE_DECIMALS: usize = 2;

static SIZE_PATTERN: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d*)?|\.\d+)\s*(?:(bytes?|b)|([kmgtpe])(?:i?b)?)?\s*$")
        .expect("size pattern is valid")
});

/// Scale `value` down by 1024 until it drops below one step of the next unit.
fn scale(value: f64) -> (f64, usize) {
    let mut value = value;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    (value, unit)
}

/// Render with fixed decimals, then drop trailing zeros ("1.50" → "1.5", "1.00" → "1").
fn trim_decimals(value: f64, decimals: usize) -> String {
    let s = format!("{:.*}", decimals, value);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Human-readable size: `0 B`, `512 B`, `1 KB`, `1.5 MB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let (value, unit) = scale(bytes as f64);
    format!("{} {}", trim_decimals(value, SIZE_DECIMALS), UNITS[unit])
}

/// Parse a size string back into bytes.
///
/// Accepts plain numbers, `B`/`byte`/`bytes`, and `K`/`KB`/`KiB` style
/// suffixes up to exabytes, case-insensitive, with optional whitespace.
pub fn parse_file_size(input: &str) -> Option<u64> {
    let caps = SIZE_PATTERN.captures(input)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;

    let exponent = match caps.get(3) {
        Some(prefix) => match prefix.as_str().to_ascii_uppercase().as_str() {
            "K" => 1,
            "M" => 2,
            "G" => 3,
            "T" => 4,
            "P" => 5,
            "E" => 6,
            _ => return None,
        },
        None => 0,
    };

    let bytes = number * 1024f64.powi(exponent);
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return None;
    }
    Some(bytes.round() as u64)
}

/// Transfer speed, e.g. `"2.5 MB/s"`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return "0 B/s".to_string();
    }
    let (value, unit) = scale(bytes_per_sec);
    if unit == 0 {
        format!("{:.0} B/s", value)
    } else {
        format!("{:.1} {}/s", value, UNITS[unit])
    }
}

/// Remaining time as `MM:SS`, or `HH:MM:SS` once it reaches an hour.
///
/// Negative or non-finite input yields [`UNKNOWN_TIME`].
pub fn format_remaining_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return UNKNOWN_TIME.to_string();
    }
    let total = seconds.round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Seconds left at the given speed, `None` when it cannot be estimated
/// (unknown size, zero or invalid speed).
pub fn estimate_remaining_secs(total: u64, transferred: u64, bytes_per_sec: f64) -> Option<f64> {
    if total == 0 || !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return None;
    }
    Some(total.saturating_sub(transferred) as f64 / bytes_per_sec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1_048_576), "1 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5 GB");
    }

    #[test]
    fn test_parse_file_size() {
        assert_eq!(parse_file_size("1 KB"), Some(1024));
        assert_eq!(parse_file_size("1.5 KB"), Some(1536));
        assert_eq!(parse_file_size("2mb"), Some(2 * 1024 * 1024));
        assert_eq!(parse_file_size("3 GiB"), Some(3 * 1024 * 1024 * 1024));
        assert_eq!(parse_file_size("10K"), Some(10 * 1024));
        assert_eq!(parse_file_size("512 B"), Some(512));
        assert_eq!(parse_file_size("7 bytes"), Some(7));
        assert_eq!(parse_file_size("42"), Some(42));
        assert_eq!(parse_file_size(" 0 B "), Some(0));
        assert_eq!(parse_file_size("lots"), None);
        assert_eq!(parse_file_size("1 XB"), None);
        assert_eq!(parse_file_size(""), None);
    }

    #[test]
    fn test_unit_boundaries_round_trip() {
        for exp in 0..6u32 {
            let b = 1024u64.pow(exp);
            assert_eq!(parse_file_size(&format_bytes(b)), Some(b), "boundary {}", b);
        }
    }

    #[test]
    fn test_format_parse_within_one_unit_step() {
        let samples = [
            1u64,
            999,
            1023,
            1025,
            4095,
            123_456,
            1_048_575,
            987_654_321,
            5_000_000_000,
            1_234_567_890_123,
        ];
        for b in samples {
            let (_, unit) = scale(b as f64);
            let step = 1024f64.powi(unit as i32);
            let parsed = parse_file_size(&format_bytes(b)).unwrap();
            let diff = (parsed as f64 - b as f64).abs();
            assert!(diff <= step, "{} -> {} -> {}", b, format_bytes(b), parsed);
        }
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0.0), "0 B/s");
        assert_eq!(format_speed(f64::NAN), "0 B/s");
        assert_eq!(format_speed(500.0), "500 B/s");
        assert_eq!(format_speed(2.5 * 1024.0 * 1024.0), "2.5 MB/s");
        assert_eq!(format_speed(1024.0), "1.0 KB/s");
    }

    #[test]
    fn test_format_remaining_time() {
        assert_eq!(format_remaining_time(0.0), "00:00");
        assert_eq!(format_remaining_time(65.0), "01:05");
        assert_eq!(format_remaining_time(3599.4), "59:59");
        assert_eq!(format_remaining_time(3661.0), "01:01:01");
    }

    #[test]
    fn test_remaining_time_unknown_sentinel() {
        assert_eq!(format_remaining_time(-1.0), UNKNOWN_TIME);
        assert_eq!(format_remaining_time(f64::INFINITY), UNKNOWN_TIME);
        assert_eq!(format_remaining_time(f64::NAN), UNKNOWN_TIME);
    }

    #[test]
    fn test_estimate_remaining_secs() {
        assert_eq!(estimate_remaining_secs(1000, 400, 100.0), Some(6.0));
        assert_eq!(estimate_remaining_secs(1000, 400, 0.0), None);
        assert_eq!(estimate_remaining_secs(0, 400, 100.0), None);
        assert_eq!(estimate_remaining_secs(1000, 1200, 100.0), Some(0.0));
    }
}
