//! Reconciler (spec.md §4.4): watches the desired symbol set and drives
//! subscribe/unsubscribe on the Live Tick Ingestor plus schedule
//! registration.
//!
//! Grounded on `original_source/scripts/live_tick_ingest.py::update_watched_symbols`
//! and `redis_pubsub_listener` (desired-vs-watched diffing, pub-sub-driven
//! re-scan), adapted to run as a single async task instead of a daemon
//! thread plus a blocking `pubsub.listen()` loop.

use crate::calendar::is_trading_hours;
use crate::error::Result;
use crate::live::LiveTickIngestor;
use crate::model::{DesiredSymbol, ScheduleKind};
use crate::registry::{ScheduleRegistry, SymbolRegistry};
use crate::store::KeyValueStore;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const DESIRED_SET_KEY: &str = "dtn:ingestion:symbols";
const SYMBOL_UPDATES_CHANNEL: &str = "dtn:ingestion:symbol_updates";
const PERIODIC_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_BACKFILL_MINUTES: u16 = 120;

pub struct Reconciler {
    kv: Arc<dyn KeyValueStore>,
    live: Arc<LiveTickIngestor>,
    schedules: Arc<ScheduleRegistry>,
    symbols: Arc<SymbolRegistry>,
}

impl Reconciler {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        live: Arc<LiveTickIngestor>,
        schedules: Arc<ScheduleRegistry>,
        symbols: Arc<SymbolRegistry>,
    ) -> Self {
        Self { kv, live, schedules, symbols }
    }

    /// Desired set from `dtn:ingestion:symbols`, de-duplicated silently
    /// (spec.md §4.4).
    async fn desired_set(&self) -> Result<HashSet<String>> {
        let Some(raw) = self.kv.get(DESIRED_SET_KEY).await? else {
            return Ok(HashSet::new());
        };
        match serde_json::from_str::<Vec<DesiredSymbol>>(&raw) {
            Ok(entries) => Ok(entries.into_iter().map(|e| e.symbol).collect()),
            Err(e) => {
                warn!(error = %e, "malformed desired symbol set, treating as empty");
                Ok(HashSet::new())
            }
        }
    }

    /// `original_source/live_tick_ingest.py::_get_symbol_field` reads
    /// `backfill_minutes` off the Symbol record itself, not the live
    /// schedule's config map (spec.md §6 only lists `auto_stop` as a
    /// recognized live-schedule config key). Falls back to the 120-minute
    /// default when the symbol lookup fails or is missing.
    async fn backfill_minutes_for(&self, ticker: &str) -> u16 {
        match self.symbols.get_symbol(ticker).await {
            Ok(Some(symbol)) => symbol.backfill_minutes,
            _ => DEFAULT_BACKFILL_MINUTES,
        }
    }

    async fn auto_stop_enabled(&self, ticker: &str) -> bool {
        matches!(
            self.schedules.get_for(ticker, ScheduleKind::Live).await,
            Ok(Some(schedule)) if schedule.config.get("auto_stop").and_then(|v| v.as_bool()).unwrap_or(false)
        )
    }

    /// One reconciliation pass: diff desired vs. watched, subscribe/
    /// unsubscribe, apply the auto-stop check. Used at boot, on pub-sub
    /// notification, and from the periodic tick.
    pub async fn reconcile_once(&self) -> Result<()> {
        let desired = self.desired_set().await?;
        let watched = self.live.watched_symbols();

        for ticker in desired.difference(&watched) {
            let backfill_minutes = self.backfill_minutes_for(ticker).await;
            if let Err(e) = self.live.subscribe(ticker, backfill_minutes).await {
                warn!(ticker, error = %e, "failed to subscribe");
            }
        }
        for ticker in watched.difference(&desired) {
            if let Err(e) = self.live.unsubscribe(ticker).await {
                warn!(ticker, error = %e, "failed to unsubscribe");
            }
        }

        if !is_trading_hours(Utc::now()) {
            let still_watched = self.live.watched_symbols();
            for ticker in &still_watched {
                if self.auto_stop_enabled(ticker).await {
                    if let Err(e) = self.live.unsubscribe(ticker).await {
                        warn!(ticker, error = %e, "failed to auto-stop");
                    }
                }
            }
        }

        let watched_now = self.live.watched_symbols().len();
        crate::metrics::set_watched_symbols(watched_now as f64);
        info!(desired = desired.len(), watched = watched_now, "reconciliation pass complete");
        Ok(())
    }

    /// Runs the periodic tick (spec.md §4.4 "60 s periodic tick") for the
    /// process lifetime, alongside `run_pubsub_loop`.
    pub async fn run_periodic(self: Arc<Self>) {
        let mut interval = tokio::time::interval(PERIODIC_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = self.reconcile_once().await {
                warn!(error = %e, "periodic reconciliation failed");
            }
        }
    }

    /// Subscribes to `dtn:ingestion:symbol_updates` and re-reconciles on
    /// every notification.
    pub async fn run_pubsub_loop(self: Arc<Self>) {
        let mut rx = match self.kv.subscribe(SYMBOL_UPDATES_CHANNEL).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "failed to subscribe to symbol-updates channel");
                return;
            }
        };
        while let Some(payload) = rx.recv().await {
            info!(payload, "received symbol-updates notification");
            if let Err(e) = self.reconcile_once().await {
                warn!(error = %e, "reconciliation after pub-sub notification failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv_store::fake::FakeKvStore;
    use crate::store::ts_store::fake::FakeTsStore;
    use crate::vendor::mock::MockQuoteClient;

    #[tokio::test]
    async fn reconcile_subscribes_new_and_unsubscribes_stale() {
        let kv = Arc::new(FakeKvStore::new());
        kv.set(
            DESIRED_SET_KEY,
            &serde_json::to_string(&vec![
                DesiredSymbol { symbol: "B".into(), exchange: "NASDAQ".into() },
                DesiredSymbol { symbol: "C".into(), exchange: "NASDAQ".into() },
            ])
            .unwrap(),
        )
        .await
        .unwrap();

        let vendor = Arc::new(MockQuoteClient::new());
        let live = Arc::new(LiveTickIngestor::new(vendor.clone(), kv.clone()));
        // Pre-seed watched = {A, B} by subscribing directly.
        live.subscribe("A", 120).await.unwrap();
        live.subscribe("B", 120).await.unwrap();

        let ts = Arc::new(FakeTsStore::new());
        let schedules = Arc::new(ScheduleRegistry::new(kv.clone()));
        let symbols = Arc::new(SymbolRegistry::new(ts, kv.clone(), "symbol_management"));
        let reconciler = Reconciler::new(kv, live.clone(), schedules, symbols);
        reconciler.reconcile_once().await.unwrap();

        let watched = live.watched_symbols();
        assert_eq!(watched, HashSet::from(["B".to_string(), "C".to_string()]));
    }
}
