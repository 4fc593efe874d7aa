//! Symbol Registry: write-through layer over the TS store's
//! `symbol_management` bucket and a KV cache (spec.md §4.6).
//!
//! Grounded on `original_source/ingestion_service/admin/services/symbol_manager.py`
//! (`add_symbol`, `get_symbol`, `update_symbol`, `delete_symbol`,
//! `bulk_add_symbols`, the `active` field filter query).

use crate::error::{IngestError, Result};
use crate::model::{Exchange, SecurityKind, Symbol};
use crate::store::{FluxValue, KeyValueStore, TimeSeriesStore, TsPoint};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CACHE_TTL: Duration = Duration::from_secs(86_400);

pub struct SymbolRegistry {
    ts: Arc<dyn TimeSeriesStore>,
    kv: Arc<dyn KeyValueStore>,
    bucket: String,
}

impl SymbolRegistry {
    pub fn new(ts: Arc<dyn TimeSeriesStore>, kv: Arc<dyn KeyValueStore>, bucket: impl Into<String>) -> Self {
        Self {
            ts,
            kv,
            bucket: bucket.into(),
        }
    }

    fn cache_key(ticker: &str) -> String {
        format!("symbol:{ticker}")
    }

    fn point_for(symbol: &Symbol) -> TsPoint {
        TsPoint::new(symbol.measurement(), symbol.updated_at)
            .tag("symbol", symbol.ticker.clone())
            .tag("exchange", symbol.exchange.as_str())
            .tag("security_type", symbol.kind.as_str())
            .field("description", FluxValue::Str(symbol.description.clone()))
            .field("active", FluxValue::Bool(symbol.active))
            .field(
                "historical_days",
                FluxValue::Int(symbol.historical_days as i64),
            )
            .field(
                "backfill_minutes",
                FluxValue::Int(symbol.backfill_minutes as i64),
            )
            .field("updated_at", FluxValue::Str(symbol.updated_at.to_rfc3339()))
    }

    /// Writes the symbol as a point and refreshes the KV cache entry.
    pub async fn add_symbol(&self, symbol: Symbol) -> Result<()> {
        self.ts
            .write(&self.bucket, vec![Self::point_for(&symbol)])
            .await?;
        self.refresh_cache(&symbol).await;
        info!(ticker = %symbol.ticker, "added symbol");
        Ok(())
    }

    /// Batch variant of `add_symbol` (spec.md §4.6 "bulk insert is
    /// supported"). Per-symbol cache refresh still happens individually;
    /// only the TS write is batched.
    pub async fn bulk_add_symbols(&self, symbols: Vec<Symbol>) -> Result<()> {
        let points = symbols.iter().map(Self::point_for).collect();
        self.ts.write(&self.bucket, points).await?;
        for symbol in &symbols {
            self.refresh_cache(symbol).await;
        }
        info!(count = symbols.len(), "bulk-added symbols");
        Ok(())
    }

    async fn refresh_cache(&self, symbol: &Symbol) {
        match serde_json::to_string(symbol) {
            Ok(json) => {
                if let Err(e) = self.kv.setex(&Self::cache_key(&symbol.ticker), &json, CACHE_TTL).await {
                    warn!(ticker = %symbol.ticker, error = %e, "failed to refresh symbol cache");
                }
            }
            Err(e) => warn!(ticker = %symbol.ticker, error = %e, "failed to serialize symbol for cache"),
        }
    }

    /// Cache-first lookup by ticker, falling back to a pivoted TS query.
    pub async fn get_symbol(&self, ticker: &str) -> Result<Option<Symbol>> {
        if let Some(cached) = self.kv.get(&Self::cache_key(ticker)).await? {
            if let Ok(symbol) = serde_json::from_str::<Symbol>(&cached) {
                return Ok(Some(symbol));
            }
        }

        let flux = format!(
            r#"
            from(bucket: "{bucket}")
              |> range(start: -30d)
              |> filter(fn: (r) => r._measurement =~ /^symbol_/)
              |> filter(fn: (r) => r.symbol == "{ticker}")
              |> last()
              |> pivot(rowKey:["_time"], columnKey: ["_field"], valueColumn: "_value")
            "#,
            bucket = self.bucket,
        );
        let records = self.ts.query(&flux).await?;
        let Some(record) = records.into_iter().next() else {
            return Ok(None);
        };
        Ok(Self::symbol_from_record(ticker, &record))
    }

    fn symbol_from_record(
        ticker: &str,
        record: &crate::store::FluxRecord,
    ) -> Option<Symbol> {
        let exchange = record.get("exchange").and_then(|v| v.as_str()).and_then(Exchange::parse)?;
        let kind = record
            .get("security_type")
            .and_then(|v| v.as_str())
            .and_then(SecurityKind::parse)?;
        let now = Utc::now();
        Some(Symbol {
            ticker: ticker.to_string(),
            exchange,
            kind,
            description: record
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            active: record.get("active").and_then(|v| v.as_bool()).unwrap_or(true),
            historical_days: record
                .get("historical_days")
                .and_then(|v| v.as_f64())
                .map(|v| v as u16)
                .unwrap_or(30),
            backfill_minutes: record
                .get("backfill_minutes")
                .and_then(|v| v.as_f64())
                .map(|v| v as u16)
                .unwrap_or(120),
            created_at: now,
            updated_at: record
                .get("updated_at")
                .and_then(|v| v.as_time())
                .unwrap_or(now),
            last_ingestion_at: record.get("last_ingestion").and_then(|v| v.as_time()),
        })
    }

    /// Marks the symbol inactive. Never physically removes it (spec.md §3
    /// "deletion is soft").
    pub async fn deactivate(&self, ticker: &str) -> Result<()> {
        let Some(mut symbol) = self.get_symbol(ticker).await? else {
            return Err(IngestError::NotFound {
                what: "symbol",
                id: ticker.to_string(),
            });
        };
        symbol.active = false;
        symbol.updated_at = Utc::now();
        self.ts
            .write(&self.bucket, vec![Self::point_for(&symbol)])
            .await?;
        self.kv.delete(&Self::cache_key(ticker)).await?;
        info!(ticker, "deactivated symbol");
        Ok(())
    }

    /// Records `last_ingestion` on the symbol-management point after a
    /// historical ingest pass completes for this symbol (spec.md §4.2 step 3).
    pub async fn record_last_ingestion(&self, symbol: &Symbol, at: chrono::DateTime<Utc>) -> Result<()> {
        let point = TsPoint::new(symbol.measurement(), at)
            .tag("symbol", symbol.ticker.clone())
            .tag("exchange", symbol.exchange.as_str())
            .tag("security_type", symbol.kind.as_str())
            .field("last_ingestion", FluxValue::Str(at.to_rfc3339()));
        self.ts.write(&self.bucket, vec![point]).await?;
        self.kv.delete(&Self::cache_key(&symbol.ticker)).await?;
        Ok(())
    }

    /// Active-symbols query: latest point per symbol, pivoted to carry every
    /// field (`historical_days`, `backfill_minutes`, `description`, …), with
    /// the `active == true` predicate applied *after* the pivot. Filtering
    /// on `_field == "active"` before `last()`/`pivot` would strip every
    /// other field off the pivoted row, silently defaulting
    /// `historical_days`/`backfill_minutes` for every active symbol
    /// (spec.md §4.6; `d = min(D_sym, D_T)` needs the real `D_sym`).
    pub async fn active_symbols(&self) -> Result<Vec<Symbol>> {
        let flux = format!(
            r#"
            from(bucket: "{bucket}")
              |> range(start: -30d)
              |> filter(fn: (r) => r._measurement =~ /^symbol_/)
              |> last()
              |> pivot(rowKey:["_time"], columnKey: ["_field"], valueColumn: "_value")
              |> filter(fn: (r) => r.active == true)
            "#,
            bucket = self.bucket,
        );
        let records = self.ts.query(&flux).await?;
        let mut symbols = Vec::new();
        for record in &records {
            if let Some(ticker) = record.get("symbol").and_then(|v| v.as_str()) {
                if let Some(symbol) = Self::symbol_from_record(ticker, record) {
                    symbols.push(symbol);
                }
            }
        }
        Ok(symbols)
    }
}
