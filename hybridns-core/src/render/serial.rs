//! SOA serial number discipline.
//!
//! Zone serials follow the conventional `YYYYMMDDnn` scheme: a date-based
//! base with a two-digit revision suffix, always increasing so slaves
//! detect every change.

use chrono::{DateTime, Utc};

/// `today_base` is today's date as `YYYYMMDD00`.
fn today_base(now: DateTime<Utc>) -> u32 {
    let date = now.format("%Y%m%d").to_string();
    format!("{date}00").parse().expect("YYYYMMDD00 always fits in u32")
}

/// The next serial for a zone given its prior serial, per the invariant
/// `new_serial = max(prior_serial + 1, today_base)`.
///
/// This keeps serials strictly increasing even when a zone is edited
/// multiple times in the same day (prior_serial + 1 wins) while still
/// jumping forward to the current date after a day boundary (today_base
/// wins).
pub fn next_serial(prior_serial: u32, now: DateTime<Utc>) -> u32 {
    let base = today_base(now);
    std::cmp::max(prior_serial.saturating_add(1), base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_serial_same_day_increments() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        assert_eq!(next_serial(2026072801, now), 2026072802);
    }

    #[test]
    fn test_next_serial_jumps_to_today_base_after_day_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 1).unwrap();
        assert_eq!(next_serial(2026072199, now), 2026072800);
    }

    #[test]
    fn test_next_serial_never_decreases() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap();
        assert!(next_serial(2026072899, now) > 2026072899);
    }
}
