//! Live Tick Ingestor (spec.md §4.3).
//!
//! Grounded on `original_source/scripts/live_tick_ingest.py`:
//! `LiveTickListener.backfill_intraday_data` (backfill-then-watch
//! ordering), `_publish_tick` (publish + rpush + expire fan-out),
//! `process_summary`/`process_update` (per-message handling rules).

use crate::calendar::EASTERN;
use crate::error::Result;
use crate::model::Tick;
use crate::store::KeyValueStore;
use crate::vendor::{VendorMessage, VendorQuoteClient};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const BUFFER_TTL: Duration = Duration::from_secs(86_400);

pub struct LiveTickIngestor {
    vendor: Arc<dyn VendorQuoteClient>,
    kv: Arc<dyn KeyValueStore>,
    watched: Mutex<HashSet<String>>,
}

impl LiveTickIngestor {
    pub fn new(vendor: Arc<dyn VendorQuoteClient>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            vendor,
            kv,
            watched: Mutex::new(HashSet::new()),
        }
    }

    pub fn watched_symbols(&self) -> HashSet<String> {
        self.watched.lock().clone()
    }

    /// Idempotent for already-watched symbols (spec.md §4.3). Backfill runs
    /// to completion before `trades_watch`, which is the ordering guarantee
    /// behind testable property 6.
    pub async fn subscribe(&self, ticker: &str, backfill_minutes: u16) -> Result<()> {
        if self.watched.lock().contains(ticker) {
            return Ok(());
        }

        self.backfill(ticker, backfill_minutes).await?;
        self.vendor
            .trades_watch(ticker)
            .await
            .map_err(|e| crate::error::IngestError::TransientConnectivity {
                target: "vendor_trades_watch",
                source: e,
            })?;
        self.watched.lock().insert(ticker.to_string());
        info!(ticker, "subscribed to live ticks");
        Ok(())
    }

    /// No-op for an unwatched symbol.
    pub async fn unsubscribe(&self, ticker: &str) -> Result<()> {
        if !self.watched.lock().remove(ticker) {
            return Ok(());
        }
        self.vendor
            .unwatch(ticker)
            .await
            .map_err(|e| crate::error::IngestError::TransientConnectivity {
                target: "vendor_unwatch",
                source: e,
            })?;
        info!(ticker, "unsubscribed from live ticks");
        Ok(())
    }

    async fn backfill(&self, ticker: &str, backfill_minutes: u16) -> Result<()> {
        let end = Utc::now();
        let start = end - ChronoDuration::minutes(backfill_minutes as i64);

        let ticks = self
            .vendor
            .request_ticks_in_period(ticker, start, end, true)
            .await
            .map_err(|e| crate::error::IngestError::TransientConnectivity {
                target: "vendor_request_ticks_in_period",
                source: e,
            })?;

        let buffer_key = format!("intraday_ticks:{ticker}");
        self.kv.delete(&buffer_key).await?;

        if ticks.is_empty() {
            info!(ticker, "no intraday ticks to backfill");
            return Ok(());
        }

        for raw in &ticks {
            let naive = raw.date.and_time(
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                    raw.time_of_day.num_seconds() as u32,
                    0,
                )
                .unwrap_or_default(),
            );
            let Some(eastern) = EASTERN.from_local_datetime(&naive).single() else {
                warn!(ticker, "skipping ambiguous/nonexistent backfill tick timestamp");
                continue;
            };
            let tick = Tick {
                timestamp: eastern.with_timezone(&Utc).timestamp() as f64,
                price: raw.last,
                volume: raw.last_sz,
            };
            let json = serde_json::to_string(&tick).expect("Tick serializes");
            self.kv.rpush(&buffer_key, &json).await?;
        }
        self.kv.expire(&buffer_key, BUFFER_TTL).await?;
        info!(ticker, count = ticks.len(), "backfilled intraday ticks");
        Ok(())
    }

    /// Drains the vendor's decoded-message channel, dispatching each to
    /// `handle_message`. Runs for the process lifetime on its own task
    /// (spec.md §5 "one task reads vendor messages").
    pub async fn run(self: Arc<Self>) {
        let Some(mut rx) = self.vendor.take_messages() else {
            error!("vendor message channel already taken, live ingestor cannot run");
            return;
        };
        while let Some(msg) = rx.recv().await {
            if let Err(e) = self.handle_message(msg).await {
                error!(error = %e, "failed to handle vendor message");
            }
        }
        warn!("vendor message channel closed, live ingestor loop exiting");
    }

    async fn handle_message(&self, msg: VendorMessage) -> Result<()> {
        match msg {
            VendorMessage::Summary(s) if s.most_recent_trade > 0.0 => {
                self.publish_tick(&s.symbol, s.most_recent_trade, 0).await
            }
            VendorMessage::Summary(_) => Ok(()),
            VendorMessage::TradeUpdate(t) if t.most_recent_trade > 0.0 && t.most_recent_trade_size > 0 => {
                self.publish_tick(&t.symbol, t.most_recent_trade, t.most_recent_trade_size)
                    .await
            }
            VendorMessage::TradeUpdate(_) => Ok(()),
        }
    }

    /// `_publish_tick`: compose the tick, publish on `live_ticks:<S>`,
    /// append to the recent-tick buffer, reset its TTL. No de-duplication
    /// (spec.md §4.3).
    async fn publish_tick(&self, symbol: &str, price: f64, volume: i64) -> Result<()> {
        let tick = Tick {
            timestamp: now_unix_seconds(),
            price,
            volume,
        };
        let json = serde_json::to_string(&tick).expect("Tick serializes");

        self.kv.publish(&format!("live_ticks:{symbol}"), &json).await?;
        let buffer_key = format!("intraday_ticks:{symbol}");
        self.kv.rpush(&buffer_key, &json).await?;
        self.kv.expire(&buffer_key, BUFFER_TTL).await?;
        crate::metrics::record_tick_published();
        Ok(())
    }
}

fn now_unix_seconds() -> f64 {
    let now: DateTime<Utc> = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_millis() as f64 / 1000.0
}
