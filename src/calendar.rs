//! Clock & Trading Calendar: UTC/Eastern conversions, session boundaries,
//! trading-hours predicate.
//!
//! Grounded on `original_source/scripts/ohlc_ingest.py::is_nasdaq_trading_hours`
//! and `get_last_completed_session_end_time_utc`.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

pub const EASTERN: Tz = New_York;

fn trading_start() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).expect("valid time")
}

fn trading_end() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).expect("valid time")
}

fn session_cutoff_time() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).expect("valid time")
}

/// Eastern-time weekday, 09:30-16:00 inclusive.
pub fn is_trading_hours(now_utc: DateTime<Utc>) -> bool {
    let et = now_utc.with_timezone(&EASTERN);
    if matches!(et.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let t = et.time();
    t >= trading_start() && t <= trading_end()
}

/// The UTC instant marking the end of the last fully completed trading
/// session: take "now" in Eastern time; if before 20:00 ET use yesterday's
/// date, else today's; the cutoff is 20:00 ET on that date.
pub fn last_completed_session_end_utc(now_utc: DateTime<Utc>) -> DateTime<Utc> {
    let now_et = now_utc.with_timezone(&EASTERN);
    let target_date = if now_et.time() < session_cutoff_time() {
        now_et.date_naive() - Duration::days(1)
    } else {
        now_et.date_naive()
    };

    let naive_session_end = target_date.and_time(session_cutoff_time());
    EASTERN
        .from_local_datetime(&naive_session_end)
        .single()
        .expect("20:00 ET is never ambiguous/nonexistent across a DST transition")
        .with_timezone(&Utc)
}

/// The Eastern-time calendar date (`YYYYMMDD`) of a UTC timestamp, used for
/// the measurement-naming rule.
pub fn eastern_date_yyyymmdd(ts_utc: DateTime<Utc>) -> String {
    ts_utc.with_timezone(&EASTERN).format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, mi, s)
                .unwrap(),
        )
    }

    #[test]
    fn trading_hours_weekday_inside_window() {
        // 2024-03-12 is a Tuesday. 11:00 ET = 15:00 UTC (EDT, UTC-4).
        assert!(is_trading_hours(utc(2024, 3, 12, 15, 0, 0)));
    }

    #[test]
    fn trading_hours_weekday_outside_window() {
        assert!(!is_trading_hours(utc(2024, 3, 12, 3, 0, 0)));
    }

    #[test]
    fn trading_hours_weekend_gate() {
        // 2024-03-16 is a Saturday.
        assert!(!is_trading_hours(utc(2024, 3, 16, 15, 0, 0)));
    }

    #[test]
    fn session_cutoff_after_2000_et_uses_today_date() {
        // now = 2024-03-15T21:30:00 ET (01:30Z next day during EDT, UTC-4),
        // which is past the 20:00 ET cutoff, so target date is today (3/15).
        let now = utc(2024, 3, 16, 1, 30, 0);
        let cutoff = last_completed_session_end_utc(now);
        // cutoff = 2024-03-15T20:00:00 ET = 2024-03-16T00:00:00Z
        assert_eq!(cutoff, utc(2024, 3, 16, 0, 0, 0));
    }

    #[test]
    fn session_cutoff_before_2000_et_uses_yesterday_date() {
        // now = 2024-03-15T17:00:00 ET (21:00Z same day during EDT, UTC-4),
        // which is before the 20:00 ET cutoff, so target date is yesterday (3/14).
        let now = utc(2024, 3, 15, 21, 0, 0);
        let cutoff = last_completed_session_end_utc(now);
        // cutoff = 2024-03-14T20:00:00 ET = 2024-03-15T00:00:00Z
        assert_eq!(cutoff, utc(2024, 3, 15, 0, 0, 0));
    }

    #[test]
    fn eastern_date_formats_yyyymmdd() {
        let ts = utc(2024, 3, 16, 0, 0, 0); // 2024-03-15T20:00:00 ET
        assert_eq!(eastern_date_yyyymmdd(ts), "20240315");
    }
}
