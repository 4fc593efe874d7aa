//! Integration coverage for boundary scenario S3 (spec.md §8): a freshly
//! added symbol with no prior data in the store gap-fills from its full
//! `historical_days` depth on the first pass, for a single timeframe.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use market_data_ingestor::calendar::is_trading_hours;
use market_data_ingestor::historical::HistoricalIngestor;
use market_data_ingestor::model::{Exchange, ScheduleKind, SecurityKind, Symbol};
use market_data_ingestor::registry::{ScheduleRegistry, SymbolRegistry};
use market_data_ingestor::store::kv_store::fake::FakeKvStore;
use market_data_ingestor::store::ts_store::fake::FakeTsStore;
use market_data_ingestor::vendor::mock::MockHistClient;
use market_data_ingestor::vendor::VendorBar;
use std::sync::Arc;

fn fresh_symbol() -> Symbol {
    let now = Utc::now();
    Symbol {
        ticker: "MSFT".into(),
        exchange: Exchange::Nasdaq,
        kind: SecurityKind::Stock,
        description: "Microsoft Corp.".into(),
        active: true,
        historical_days: 5,
        backfill_minutes: 60,
        created_at: now,
        updated_at: now,
        last_ingestion_at: None,
    }
}

/// `run_for_symbol` reads the real wall clock for the trading-hours gate
/// (spec.md §4.2 step 0), so this test asserts whichever branch applies at
/// the moment it runs rather than assuming one.
#[tokio::test]
async fn s3_fresh_symbol_ingests_or_is_gated_by_trading_hours() {
    let vendor = Arc::new(MockHistClient::new());
    vendor.push_bars(vec![VendorBar {
        open_p: 50.0,
        high_p: 51.0,
        low_p: 49.0,
        close_p: 50.5,
        prd_vlm: Some(2_000),
        tot_vlm: None,
        date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        time_of_day: Some(ChronoDuration::hours(10)),
    }]);

    let ts = Arc::new(FakeTsStore::new());
    let kv = Arc::new(FakeKvStore::new());
    let symbols = Arc::new(SymbolRegistry::new(ts.clone(), kv.clone(), "symbol_management"));
    let schedules = Arc::new(ScheduleRegistry::new(kv.clone()));

    symbols.add_symbol(fresh_symbol()).await.unwrap();
    schedules
        .put(
            "MSFT",
            ScheduleKind::Historical,
            "0 20 * * *".into(),
            true,
            serde_json::json!({ "intervals": ["1h"] }),
        )
        .await
        .unwrap();

    let ingestor = HistoricalIngestor::new(
        vendor.clone(),
        ts.clone(),
        symbols.clone(),
        schedules,
        "market_data",
    );

    let result = ingestor.run_for_symbol("MSFT").await;

    if is_trading_hours(Utc::now()) {
        assert!(matches!(
            result.unwrap_err(),
            market_data_ingestor::error::IngestError::TradingHoursGate
        ));
        assert!(ts.written_to("market_data").is_empty());
    } else {
        result.unwrap();
        let written = ts.written_to("market_data");
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].measurement, "ohlc_MSFT_20240315_1h");

        let refreshed = symbols.get_symbol("MSFT").await.unwrap().unwrap();
        assert!(refreshed.last_ingestion_at.is_none(), "fake store doesn't round-trip last_ingestion through query, only the cache delete matters here");
        assert!(kv.get("symbol:MSFT").await.unwrap().is_none(), "cache must be invalidated after recording last_ingestion");
    }
}

#[tokio::test]
async fn run_for_symbol_reports_not_found_for_unknown_ticker() {
    let vendor = Arc::new(MockHistClient::new());
    let ts = Arc::new(FakeTsStore::new());
    let kv = Arc::new(FakeKvStore::new());
    let symbols = Arc::new(SymbolRegistry::new(ts.clone(), kv.clone(), "symbol_management"));
    let schedules = Arc::new(ScheduleRegistry::new(kv));
    let ingestor = HistoricalIngestor::new(vendor, ts, symbols, schedules, "market_data");

    if is_trading_hours(Utc::now()) {
        // Gate fires before the lookup; nothing to assert about NotFound here.
        return;
    }

    let err = ingestor.run_for_symbol("GHOST").await.unwrap_err();
    assert!(matches!(
        err,
        market_data_ingestor::error::IngestError::NotFound { .. }
    ));
}
