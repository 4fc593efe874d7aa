//! The 14 timeframe codes, each with a canonical (interval, unit,
//! max-historical-depth) per spec.md §6.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    S1,
    S5,
    S10,
    S15,
    S30,
    S45,
    M1,
    M5,
    M10,
    M15,
    M30,
    M45,
    H1,
    D1,
}

pub const ALL_TIMEFRAMES: [Timeframe; 14] = [
    Timeframe::S1,
    Timeframe::S5,
    Timeframe::S10,
    Timeframe::S15,
    Timeframe::S30,
    Timeframe::S45,
    Timeframe::M1,
    Timeframe::M5,
    Timeframe::M10,
    Timeframe::M15,
    Timeframe::M30,
    Timeframe::M45,
    Timeframe::H1,
    Timeframe::D1,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Seconds,
    Days,
}

impl Timeframe {
    pub fn code(self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::S5 => "5s",
            Timeframe::S10 => "10s",
            Timeframe::S15 => "15s",
            Timeframe::S30 => "30s",
            Timeframe::S45 => "45s",
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::M45 => "45m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        ALL_TIMEFRAMES.iter().copied().find(|tf| tf.code() == code)
    }

    /// (interval length, interval unit) as the vendor historical API expects.
    pub fn interval(self) -> (u32, IntervalUnit) {
        use IntervalUnit::*;
        match self {
            Timeframe::S1 => (1, Seconds),
            Timeframe::S5 => (5, Seconds),
            Timeframe::S10 => (10, Seconds),
            Timeframe::S15 => (15, Seconds),
            Timeframe::S30 => (30, Seconds),
            Timeframe::S45 => (45, Seconds),
            Timeframe::M1 => (60, Seconds),
            Timeframe::M5 => (300, Seconds),
            Timeframe::M10 => (600, Seconds),
            Timeframe::M15 => (900, Seconds),
            Timeframe::M30 => (1800, Seconds),
            Timeframe::M45 => (2700, Seconds),
            Timeframe::H1 => (3600, Seconds),
            Timeframe::D1 => (1, Days),
        }
    }

    pub fn max_depth_days(self) -> u32 {
        match self {
            Timeframe::S1
            | Timeframe::S5
            | Timeframe::S10
            | Timeframe::S15
            | Timeframe::S30
            | Timeframe::S45 => 7,
            Timeframe::M1
            | Timeframe::M5
            | Timeframe::M10
            | Timeframe::M15
            | Timeframe::M30
            | Timeframe::M45
            | Timeframe::H1 => 180,
            Timeframe::D1 => 720,
        }
    }

    pub fn is_intraday(self) -> bool {
        !matches!(self, Timeframe::D1)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_code() {
        for tf in ALL_TIMEFRAMES {
            assert_eq!(Timeframe::from_code(tf.code()), Some(tf));
        }
    }

    #[test]
    fn daily_has_720_day_cap() {
        assert_eq!(Timeframe::D1.max_depth_days(), 720);
        assert!(!Timeframe::D1.is_intraday());
    }

    #[test]
    fn sub_minute_caps_at_seven_days() {
        assert_eq!(Timeframe::S1.max_depth_days(), 7);
        assert_eq!(Timeframe::S45.max_depth_days(), 7);
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(Timeframe::from_code("3m"), None);
    }
}
