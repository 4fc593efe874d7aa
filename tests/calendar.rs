//! Boundary scenario S1 (latest timestamp at session cutoff) lives here
//! since it's a calendar/ingestor interaction, not a pure calendar unit.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use market_data_ingestor::calendar::{is_trading_hours, last_completed_session_end_utc};

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap(),
    )
}

#[test]
fn s1_latest_timestamp_equal_to_cutoff_means_no_gap() {
    // now = 2024-03-15T21:30:00 ET (01:30Z next day), cutoff = 20:00 ET
    // same evening = 2024-03-16T00:00:00Z.
    let now = utc(2024, 3, 16, 1, 30, 0);
    let cutoff = last_completed_session_end_utc(now);
    let latest_timestamp = utc(2024, 3, 16, 0, 0, 0);

    assert_eq!(cutoff, latest_timestamp);
    assert!(latest_timestamp >= cutoff, "start must be >= cutoff, triggering a skip");
}

#[test]
fn s2_trading_hours_gate_blocks_tuesday_morning() {
    // 2024-03-12 is a Tuesday; 11:00 ET = 15:00 UTC (EDT).
    let now = utc(2024, 3, 12, 15, 0, 0);
    assert!(is_trading_hours(now));
}
