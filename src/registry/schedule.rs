//! Schedule Registry: read/write per-symbol schedules (spec.md §4.4-4.5).
//!
//! Grounded on
//! `original_source/ingestion_service/admin/services/schedule_manager.py`
//! (`create_schedule`, `get_schedules`, the `schedule:<id>` key scheme).
//! The Python original entangles job registration inside the registry
//! itself (`_update_scheduler_job`); that responsibility moves out to
//! `crate::scheduler` here (spec.md §9 "globals/singletons").

use crate::error::{IngestError, Result};
use crate::model::{Schedule, ScheduleKind};
use crate::store::KeyValueStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ScheduleRegistry {
    kv: Arc<dyn KeyValueStore>,
}

impl ScheduleRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn key(id: &str) -> String {
        format!("schedule:{id}")
    }

    /// Creates or replaces the schedule for (ticker, kind). Identity is
    /// fixed as `<ticker>_<kind>` — no UUID scheme (spec.md §9 Open
    /// Question).
    pub async fn put(
        &self,
        ticker: &str,
        kind: ScheduleKind,
        cron_expression: String,
        enabled: bool,
        config: serde_json::Value,
    ) -> Result<Schedule> {
        let id = Schedule::schedule_id(ticker, kind);
        let now = Utc::now();
        let existing = self.get(&id).await.ok().flatten();
        let schedule = Schedule {
            id: id.clone(),
            ticker: ticker.to_string(),
            schedule_type: kind,
            cron_expression,
            enabled,
            config,
            created_at: existing.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
            last_run: existing.as_ref().and_then(|s| s.last_run),
            next_run: None,
        };

        let json = serde_json::to_string(&schedule).map_err(|e| IngestError::MalformedConfig {
            what: "schedule_json",
            detail: e.to_string(),
        })?;
        self.kv.set(&Self::key(&id), &json).await?;
        self.kv
            .publish("dtn:ingestion:symbol_updates", "symbols_updated")
            .await?;
        info!(schedule_id = %id, "schedule upserted");
        Ok(schedule)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Schedule>> {
        let Some(raw) = self.kv.get(&Self::key(id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Schedule>(&raw) {
            Ok(s) => Ok(Some(s)),
            Err(e) => {
                warn!(schedule_id = id, error = %e, "malformed schedule record, skipping");
                Ok(None)
            }
        }
    }

    pub async fn get_for(&self, ticker: &str, kind: ScheduleKind) -> Result<Option<Schedule>> {
        self.get(&Schedule::schedule_id(ticker, kind)).await
    }

    /// Every schedule currently stored, matching `schedule:*_<kind>`.
    pub async fn list(&self, kind: Option<ScheduleKind>) -> Result<Vec<Schedule>> {
        let pattern = match kind {
            Some(k) => format!("schedule:*_{}", k.as_str()),
            None => "schedule:*".to_string(),
        };
        let keys = self.kv.scan(&pattern).await?;
        let mut schedules = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.kv.get(&key).await? {
                match serde_json::from_str::<Schedule>(&raw) {
                    Ok(s) => schedules.push(s),
                    Err(e) => warn!(key = %key, error = %e, "malformed schedule record, skipping"),
                }
            }
        }
        Ok(schedules)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.kv.delete(&Self::key(id)).await?;
        self.kv
            .publish("dtn:ingestion:symbol_updates", "symbols_updated")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv_store::fake::FakeKvStore;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let kv = Arc::new(FakeKvStore::new());
        let registry = ScheduleRegistry::new(kv);

        registry
            .put(
                "AAPL",
                ScheduleKind::Historical,
                "1 20 * * *".into(),
                true,
                json!({"intervals": ["5m", "1h"]}),
            )
            .await
            .unwrap();

        let fetched = registry
            .get_for("AAPL", ScheduleKind::Historical)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, "AAPL_historical");
        assert!(fetched.enabled);
    }

    #[tokio::test]
    async fn list_filters_by_kind() {
        let kv = Arc::new(FakeKvStore::new());
        let registry = ScheduleRegistry::new(kv);
        registry
            .put("AAPL", ScheduleKind::Historical, "1 20 * * *".into(), true, json!({}))
            .await
            .unwrap();
        registry
            .put("AAPL", ScheduleKind::Live, "* * * * *".into(), true, json!({}))
            .await
            .unwrap();

        let historical = registry.list(Some(ScheduleKind::Historical)).await.unwrap();
        assert_eq!(historical.len(), 1);
        assert_eq!(historical[0].schedule_type, ScheduleKind::Historical);
    }
}
