//! Historical OHLC Ingestor (spec.md §4.2).
//!
//! Grounded on `original_source/scripts/ohlc_ingest.py`: the trading-hours
//! gate, session-cutoff bound, per-timeframe gap-fill loop, vendor column
//! mapping (`format_data_for_influx`), and per-symbol/per-timeframe pacing
//! sleeps.

use crate::calendar::{eastern_date_yyyymmdd, is_trading_hours, last_completed_session_end_utc};
use crate::error::{IngestError, Result};
use crate::model::{Bar, Symbol};
use crate::registry::{ScheduleRegistry, SymbolRegistry};
use crate::store::{FluxValue, TimeSeriesStore, TsPoint};
use crate::timeframe::{Timeframe, ALL_TIMEFRAMES};
use crate::vendor::{VendorBar, VendorHistClient};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use chrono_tz::America::New_York;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PER_TIMEFRAME_PACING: std::time::Duration = std::time::Duration::from_millis(200);
const PER_SYMBOL_PACING: std::time::Duration = std::time::Duration::from_millis(500);

pub struct HistoricalIngestor {
    vendor: Arc<dyn VendorHistClient>,
    ts_store: Arc<dyn TimeSeriesStore>,
    symbols: Arc<SymbolRegistry>,
    schedules: Arc<ScheduleRegistry>,
    market_data_bucket: String,
}

impl HistoricalIngestor {
    pub fn new(
        vendor: Arc<dyn VendorHistClient>,
        ts_store: Arc<dyn TimeSeriesStore>,
        symbols: Arc<SymbolRegistry>,
        schedules: Arc<ScheduleRegistry>,
        market_data_bucket: impl Into<String>,
    ) -> Self {
        Self {
            vendor,
            ts_store,
            symbols,
            schedules,
            market_data_bucket: market_data_bucket.into(),
        }
    }

    /// Iterates the active symbol set, gap-filling every enabled timeframe.
    /// Safe to invoke concurrently only across disjoint symbol sets
    /// (spec.md §4.2 "public contract").
    pub async fn run_once(&self) -> Result<()> {
        if is_trading_hours(Utc::now()) {
            warn!("aborting historical ingest: within trading hours");
            return Err(IngestError::TradingHoursGate);
        }

        let active = self.symbols.active_symbols().await?;
        info!(count = active.len(), "running historical ingest over active symbols");
        for symbol in active {
            self.ingest_symbol(&symbol).await;
            tokio::time::sleep(PER_SYMBOL_PACING).await;
        }
        Ok(())
    }

    /// Same as `run_once` but restricted to a single symbol, used by
    /// per-symbol cron jobs (spec.md §4.5).
    pub async fn run_for_symbol(&self, ticker: &str) -> Result<()> {
        if is_trading_hours(Utc::now()) {
            warn!(ticker, "aborting historical ingest: within trading hours");
            return Err(IngestError::TradingHoursGate);
        }
        let Some(symbol) = self.symbols.get_symbol(ticker).await? else {
            return Err(IngestError::NotFound {
                what: "symbol",
                id: ticker.to_string(),
            });
        };
        self.ingest_symbol(&symbol).await;
        Ok(())
    }

    async fn ingest_symbol(&self, symbol: &Symbol) {
        let cutoff = last_completed_session_end_utc(Utc::now());
        let enabled = self.enabled_timeframes(&symbol.ticker).await;

        for tf in enabled {
            if let Err(e) = self.ingest_timeframe(symbol, tf, cutoff).await {
                error!(ticker = %symbol.ticker, timeframe = %tf, error = %e, "timeframe ingest failed, continuing");
            }
            tokio::time::sleep(PER_TIMEFRAME_PACING).await;
        }

        let now = Utc::now();
        if let Err(e) = self.symbols.record_last_ingestion(symbol, now).await {
            warn!(ticker = %symbol.ticker, error = %e, "failed to record last_ingestion");
        }
    }

    /// Per-symbol schedule config under `schedule:<ticker>_historical`
    /// (spec.md §4.2 step 1); default is all 14 timeframes.
    async fn enabled_timeframes(&self, ticker: &str) -> Vec<Timeframe> {
        match self.schedules.get_for(ticker, crate::model::ScheduleKind::Historical).await {
            Ok(Some(schedule)) => {
                let intervals = schedule
                    .config
                    .get("intervals")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str())
                            .filter_map(Timeframe::from_code)
                            .collect::<Vec<_>>()
                    });
                match intervals {
                    Some(tfs) if !tfs.is_empty() => tfs,
                    _ => ALL_TIMEFRAMES.to_vec(),
                }
            }
            Ok(None) => ALL_TIMEFRAMES.to_vec(),
            Err(e) => {
                warn!(ticker, error = %e, "failed to load historical schedule, using all timeframes");
                ALL_TIMEFRAMES.to_vec()
            }
        }
    }

    async fn ingest_timeframe(&self, symbol: &Symbol, tf: Timeframe, cutoff: DateTime<Utc>) -> Result<()> {
        let depth = (symbol.historical_days as u32).min(tf.max_depth_days());
        let latest = self.latest_timestamp(&symbol.ticker, tf).await?;

        let bars = if tf.is_intraday() {
            let start = latest.unwrap_or_else(|| cutoff - ChronoDuration::days(depth as i64));
            if start >= cutoff {
                debug!(ticker = %symbol.ticker, timeframe = %tf, "already caught up, skipping");
                return Ok(());
            }
            let (interval, unit) = tf.interval();
            crate::metrics::record_vendor_call();
            self.vendor
                .request_bars_in_period(&symbol.ticker, interval, unit, start, cutoff, true)
                .await
                .inspect_err(|_| crate::metrics::record_vendor_error())
                .map_err(|e| IngestError::TransientConnectivity {
                    target: "vendor_request_bars_in_period",
                    source: e,
                })?
        } else {
            let days = match latest {
                Some(ts) => (Utc::now() - ts).num_days() + 1,
                None => depth as i64,
            };
            if days <= 0 {
                debug!(ticker = %symbol.ticker, "daily timeframe already caught up, skipping");
                return Ok(());
            }
            crate::metrics::record_vendor_call();
            self.vendor
                .request_daily_data(&symbol.ticker, days, true)
                .await
                .inspect_err(|_| crate::metrics::record_vendor_error())
                .map_err(|e| IngestError::TransientConnectivity {
                    target: "vendor_request_daily_data",
                    source: e,
                })?
        };

        if bars.is_empty() {
            info!(ticker = %symbol.ticker, timeframe = %tf, "no new data from vendor");
            return Ok(());
        }

        let formatted = format_bars(&bars, symbol, cutoff)?;
        if formatted.is_empty() {
            return Ok(());
        }

        let grouped = group_by_measurement(&formatted, tf);
        for (measurement, group) in grouped {
            let points = group
                .iter()
                .map(|bar| {
                    TsPoint::new(measurement.clone(), bar.timestamp)
                        .tag("symbol", bar.symbol.clone())
                        .tag("exchange", bar.exchange.as_str())
                        .field("open", FluxValue::Float(bar.open))
                        .field("high", FluxValue::Float(bar.high))
                        .field("low", FluxValue::Float(bar.low))
                        .field("close", FluxValue::Float(bar.close))
                        .field("volume", FluxValue::Int(bar.volume))
                })
                .collect();
            self.ts_store.write(&self.market_data_bucket, points).await.inspect_err(|_| {
                crate::metrics::record_store_write_error();
            })?;
        }
        crate::metrics::record_bars_written(formatted.len() as u64);
        info!(ticker = %symbol.ticker, timeframe = %tf, count = formatted.len(), "wrote bars");
        Ok(())
    }

    /// Latest-timestamp probe: greatest timestamp among measurements
    /// matching `^ohlc_<ticker>_\d{8}_<tf>$` (spec.md §9 Open Question —
    /// the simpler per-timeframe probe, not the date-walking fallback).
    /// Any query failure or empty result is treated as "no latest
    /// timestamp," logged at debug per spec.md §9 "error swallowing."
    async fn latest_timestamp(&self, ticker: &str, tf: Timeframe) -> Result<Option<DateTime<Utc>>> {
        let pattern = format!("^ohlc_{}_\\d{{8}}_{}$", regex::escape(ticker), tf.code());
        let re = Regex::new(&pattern).expect("pattern is well-formed");

        let flux = format!(
            r#"
            from(bucket: "{bucket}")
              |> range(start: -{days}d)
              |> filter(fn: (r) => r.symbol == "{ticker}")
              |> filter(fn: (r) => r._field == "close")
              |> last()
            "#,
            bucket = self.market_data_bucket,
            days = tf.max_depth_days(),
            ticker = ticker,
        );

        let records = match self.ts_store.query(&flux).await {
            Ok(records) => records,
            Err(e) => {
                debug!(ticker, timeframe = %tf, error = %e, "latest-timestamp probe failed, treating as no data");
                return Ok(None);
            }
        };

        let mut latest: Option<DateTime<Utc>> = None;
        for record in &records {
            let measurement = record.get("_measurement").and_then(|v| v.as_str());
            let matches = measurement.map(|m| re.is_match(m)).unwrap_or(false);
            if !matches {
                continue;
            }
            if let Some(t) = record.get("_time").and_then(|v| v.as_time()) {
                if latest.map(|l| t > l).unwrap_or(true) {
                    latest = Some(t);
                }
            }
        }
        Ok(latest)
    }
}

/// Maps vendor column names to the store's `Bar` shape and drops any row
/// past the session cutoff (spec.md §4.2 "format").
fn format_bars(bars: &[VendorBar], symbol: &Symbol, cutoff: DateTime<Utc>) -> Result<Vec<Bar>> {
    let mut out = Vec::with_capacity(bars.len());
    for vb in bars {
        let naive_local = match vb.time_of_day {
            Some(tod) => vb.date.and_time(
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                    tod.num_seconds() as u32,
                    0,
                )
                .ok_or_else(|| IngestError::SchemaMismatch {
                    context: format!("{}: malformed intraday time-of-day", symbol.ticker),
                })?,
            ),
            None => vb
                .date
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always valid"),
        };
        let eastern = New_York
            .from_local_datetime(&naive_local)
            .single()
            .ok_or_else(|| IngestError::SchemaMismatch {
                context: format!("{}: ambiguous/nonexistent local time", symbol.ticker),
            })?;
        let ts_utc = eastern.with_timezone(&Utc);
        if ts_utc > cutoff {
            continue;
        }

        let volume = vb.prd_vlm.or(vb.tot_vlm).unwrap_or(0);
        out.push(Bar {
            timestamp: ts_utc,
            open: vb.open_p,
            high: vb.high_p,
            low: vb.low_p,
            close: vb.close_p,
            volume,
            symbol: symbol.ticker.clone(),
            exchange: symbol.exchange,
        });
    }
    out.sort_by_key(|b| b.timestamp);
    Ok(out)
}

fn group_by_measurement(bars: &[Bar], tf: Timeframe) -> BTreeMap<String, Vec<&Bar>> {
    let mut groups: BTreeMap<String, Vec<&Bar>> = BTreeMap::new();
    for bar in bars {
        groups.entry(bar.measurement(tf)).or_default().push(bar);
    }
    groups
}
