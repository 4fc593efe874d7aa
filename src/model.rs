//! Core data model (spec.md §3): Symbol, Schedule, Bar, Tick, Desired Symbol
//! Set entry. Tags vs. fields are typed at this boundary per spec.md §9
//! ("duck-typed tag/field separation") — `Symbol`/`Bar`/`Tick` carry the
//! tag columns as plain fields here; the store adapters are responsible for
//! routing them to tags vs. fields when they talk to InfluxDB.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nyse,
    Nasdaq,
    Cme,
    Eurex,
}

impl Exchange {
    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Nyse => "NYSE",
            Exchange::Nasdaq => "NASDAQ",
            Exchange::Cme => "CME",
            Exchange::Eurex => "EUREX",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NYSE" => Some(Exchange::Nyse),
            "NASDAQ" => Some(Exchange::Nasdaq),
            "CME" => Some(Exchange::Cme),
            "EUREX" => Some(Exchange::Eurex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityKind {
    Stock,
    Future,
    Option,
    Index,
    Forex,
    Crypto,
}

impl SecurityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityKind::Stock => "stock",
            SecurityKind::Future => "future",
            SecurityKind::Option => "option",
            SecurityKind::Index => "index",
            SecurityKind::Forex => "forex",
            SecurityKind::Crypto => "crypto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stock" => Some(SecurityKind::Stock),
            "future" => Some(SecurityKind::Future),
            "option" => Some(SecurityKind::Option),
            "index" => Some(SecurityKind::Index),
            "forex" => Some(SecurityKind::Forex),
            "crypto" => Some(SecurityKind::Crypto),
            _ => None,
        }
    }
}

/// Unique identity = (ticker, exchange).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub ticker: String,
    pub exchange: Exchange,
    pub kind: SecurityKind,
    pub description: String,
    pub active: bool,
    /// 1..365
    pub historical_days: u16,
    /// 0..1440
    pub backfill_minutes: u16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_ingestion_at: Option<DateTime<Utc>>,
}

impl Symbol {
    /// `symbol_<EXCHANGE>_<KIND>`, the symbol-management measurement name.
    pub fn measurement(&self) -> String {
        format!(
            "symbol_{}_{}",
            self.exchange.as_str(),
            self.kind.as_str()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Historical,
    Live,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleKind::Historical => "historical",
            ScheduleKind::Live => "live",
        }
    }
}

/// Keyed by (ticker, kind). `id` is fixed as `<ticker>_<kind>` (spec.md §9
/// Open Question — no UUID scheme).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    #[serde(rename = "symbol")]
    pub ticker: String,
    pub schedule_type: ScheduleKind,
    pub cron_expression: String,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn schedule_id(ticker: &str, kind: ScheduleKind) -> String {
        format!("{ticker}_{}", kind.as_str())
    }

    pub fn job_id(&self) -> String {
        format!("ingestion_{}", self.id)
    }
}

/// OHLC bar. Identity within the store is (measurement, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub symbol: String,
    pub exchange: Exchange,
}

impl Bar {
    /// `ohlc_<ticker>_<YYYYMMDD>_<tf>`, the measurement-naming invariant
    /// (spec.md §3, §8 property 1). `<YYYYMMDD>` is this bar's own
    /// timestamp converted to Eastern time — never "now".
    pub fn measurement(&self, tf: crate::timeframe::Timeframe) -> String {
        format!(
            "ohlc_{}_{}_{}",
            self.symbol,
            crate::calendar::eastern_date_yyyymmdd(self.timestamp),
            tf.code()
        )
    }
}

/// trade-update (volume > 0) or summary (volume == 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// UTC seconds, fractional.
    pub timestamp: f64,
    pub price: f64,
    pub volume: i64,
}

/// An entry in the desired symbol set (spec.md §3): authoritative list of
/// symbols the ingestors must currently service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DesiredSymbol {
    pub symbol: String,
    pub exchange: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_id_is_ticker_underscore_kind() {
        assert_eq!(
            Schedule::schedule_id("AAPL", ScheduleKind::Historical),
            "AAPL_historical"
        );
        assert_eq!(
            Schedule::schedule_id("AAPL", ScheduleKind::Live),
            "AAPL_live"
        );
    }

    #[test]
    fn exchange_round_trips() {
        for ex in [Exchange::Nyse, Exchange::Nasdaq, Exchange::Cme, Exchange::Eurex] {
            assert_eq!(Exchange::parse(ex.as_str()), Some(ex));
        }
        assert_eq!(Exchange::parse("LSE"), None);
    }

    #[test]
    fn symbol_measurement_name() {
        let s = Symbol {
            ticker: "AAPL".into(),
            exchange: Exchange::Nasdaq,
            kind: SecurityKind::Stock,
            description: String::new(),
            active: true,
            historical_days: 30,
            backfill_minutes: 120,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_ingestion_at: None,
        };
        assert_eq!(s.measurement(), "symbol_NASDAQ_stock");
    }
}
