//! Scheduler (spec.md §4.5): cron-triggered invocation of historical
//! ingestion jobs, Eastern time.
//!
//! Grounded on `original_source/ingestion_service/admin/services/schedule_manager.py`
//! (`_update_scheduler_job`, job id `ingestion_<id>`) and
//! `original_source/scripts/ohlc_ingest.py`'s `BlockingScheduler` +
//! `CronTrigger(timezone="America/New_York")` global daily job at 20:01 ET.
//! `tokio-cron-scheduler` is this crate's async analogue of APScheduler;
//! jobs are registered via `Job::new_async_tz` with `calendar::EASTERN` so
//! the 5-field expression is evaluated in Eastern time regardless of the
//! process's own local timezone.

use crate::calendar::EASTERN;
use crate::error::IngestError;
use crate::historical::HistoricalIngestor;
use crate::model::ScheduleKind;
use crate::registry::ScheduleRegistry;
use crate::store::KeyValueStore;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

const SYMBOL_UPDATES_CHANNEL: &str = "dtn:ingestion:symbol_updates";
const CONFIG_UPDATES_CHANNEL: &str = "dtn:system:config_updates";
const GLOBAL_JOB_ID: &str = "ingestion_global_default";
const DEFAULT_GLOBAL_CRON: &str = "1 20 * * *";

pub struct Scheduler {
    sched: JobScheduler,
    historical: Arc<HistoricalIngestor>,
    registry: Arc<ScheduleRegistry>,
    kv: Arc<dyn KeyValueStore>,
    job_ids: parking_lot::Mutex<HashMap<String, Uuid>>,
}

impl Scheduler {
    pub async fn new(
        historical: Arc<HistoricalIngestor>,
        registry: Arc<ScheduleRegistry>,
        kv: Arc<dyn KeyValueStore>,
    ) -> anyhow::Result<Self> {
        let sched = JobScheduler::new().await?;
        Ok(Self {
            sched,
            historical,
            registry,
            kv,
            job_ids: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Scans `schedule:*_historical`, registers every enabled schedule plus
    /// the global default job, then starts the underlying scheduler
    /// (spec.md §4.5 "operation").
    pub async fn boot(&self) -> anyhow::Result<()> {
        self.register_global_job(DEFAULT_GLOBAL_CRON).await?;
        self.rescan_symbol_schedules().await;
        self.sched.start().await?;
        info!("scheduler started");
        Ok(())
    }

    async fn register_global_job(&self, cron_expr: &str) -> anyhow::Result<()> {
        let six_field = to_six_field(cron_expr);
        let historical = self.historical.clone();
        let job = Job::new_async_tz(six_field.as_str(), EASTERN, move |_uuid, _l| {
            let historical = historical.clone();
            Box::pin(async move {
                info!("running global default historical ingestion job");
                report_job_outcome(historical.run_once().await, None);
            })
        })?;
        let uuid = self.sched.add(job).await?;
        self.job_ids.lock().insert(GLOBAL_JOB_ID.to_string(), uuid);
        Ok(())
    }

    /// Re-derives per-symbol historical jobs from the schedule registry.
    /// Malformed cron expressions are logged and skipped without affecting
    /// any other schedule (spec.md §4.5, S6).
    pub async fn rescan_symbol_schedules(&self) {
        let schedules = match self.registry.list(Some(ScheduleKind::Historical)).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to list historical schedules");
                return;
            }
        };

        let mut seen = std::collections::HashSet::new();
        for schedule in schedules {
            seen.insert(schedule.job_id());
            if !schedule.enabled {
                self.remove_job(&schedule.job_id()).await;
                continue;
            }
            if let Err(e) = self.upsert_symbol_job(&schedule).await {
                warn!(schedule_id = %schedule.id, error = %e, "skipping malformed schedule");
            }
        }

        let stale: Vec<String> = {
            let ids = self.job_ids.lock();
            ids.keys()
                .filter(|id| id.starts_with("ingestion_") && *id != GLOBAL_JOB_ID && !seen.contains(*id))
                .cloned()
                .collect()
        };
        for id in stale {
            self.remove_job(&id).await;
        }
    }

    async fn upsert_symbol_job(&self, schedule: &crate::model::Schedule) -> anyhow::Result<()> {
        let job_id = schedule.job_id();
        self.remove_job(&job_id).await;

        let six_field = to_six_field(&schedule.cron_expression);
        if cron::Schedule::from_str(&six_field).is_err() {
            anyhow::bail!("unparseable cron expression: {}", schedule.cron_expression);
        }

        let historical = self.historical.clone();
        let ticker = schedule.ticker.clone();
        let job = Job::new_async_tz(six_field.as_str(), EASTERN, move |_uuid, _l| {
            let historical = historical.clone();
            let ticker = ticker.clone();
            Box::pin(async move {
                info!(ticker, "running per-symbol historical ingestion job");
                let result = historical.run_for_symbol(&ticker).await;
                report_job_outcome(result, Some(ticker.as_str()));
            })
        })?;
        let uuid = self.sched.add(job).await?;
        self.job_ids.lock().insert(job_id, uuid);
        Ok(())
    }

    #[cfg(test)]
    fn registered_job_ids(&self) -> std::collections::HashSet<String> {
        self.job_ids.lock().keys().cloned().collect()
    }

    async fn remove_job(&self, job_id: &str) {
        let uuid = self.job_ids.lock().remove(job_id);
        if let Some(uuid) = uuid {
            if let Err(e) = self.sched.remove(&uuid).await {
                warn!(job_id, error = %e, "failed to remove job");
            }
        }
    }

    /// Reloads `dtn:system:config` and re-registers the global job
    /// (spec.md §4.5 "reconfiguration").
    pub async fn reload_system_config(&self) {
        let cron_expr = match self.kv.get("dtn:system:config").await {
            Ok(Some(raw)) => serde_json::from_str::<serde_json::Value>(&raw)
                .ok()
                .and_then(|cfg| {
                    let hour = cfg.get("schedule_hour")?.as_u64()?;
                    let minute = cfg.get("schedule_minute")?.as_u64()?;
                    Some(format!("{minute} {hour} * * *"))
                })
                .unwrap_or_else(|| DEFAULT_GLOBAL_CRON.to_string()),
            _ => DEFAULT_GLOBAL_CRON.to_string(),
        };
        self.remove_job(GLOBAL_JOB_ID).await;
        if let Err(e) = self.register_global_job(&cron_expr).await {
            error!(error = %e, "failed to re-register global job after config reload");
        }
    }

    /// Subscribes to the two reconfiguration channels for the process
    /// lifetime.
    pub async fn run_reconfiguration_loop(self: Arc<Self>) {
        let symbol_updates = self.kv.subscribe(SYMBOL_UPDATES_CHANNEL).await;
        let config_updates = self.kv.subscribe(CONFIG_UPDATES_CHANNEL).await;

        let mut symbol_rx = match symbol_updates {
            Ok(rx) => rx,
            Err(e) => {
                error!(error = %e, "failed to subscribe to symbol-updates channel");
                return;
            }
        };
        let mut config_rx = match config_updates {
            Ok(rx) => rx,
            Err(e) => {
                error!(error = %e, "failed to subscribe to config-updates channel");
                return;
            }
        };

        loop {
            tokio::select! {
                msg = symbol_rx.recv() => {
                    match msg {
                        Some(_) => self.rescan_symbol_schedules().await,
                        None => break,
                    }
                }
                msg = config_rx.recv() => {
                    match msg {
                        Some(_) => self.reload_system_config().await,
                        None => break,
                    }
                }
            }
        }
    }
}

/// Converts the spec's 5-field (minute hour dom month dow) cron expression
/// into the 6-field (sec minute hour dom month dow) syntax `cron`/
/// `tokio-cron-scheduler` expect.
fn to_six_field(expr: &str) -> String {
    format!("0 {expr}")
}

/// A `TradingHoursGate` is returned to the scheduler as a successful no-op
/// (spec.md §7): an in-hours firing is expected, routine behavior, not a job
/// failure. Every other error is a genuine per-job failure and is logged as
/// such, without affecting the job's next scheduled firing.
fn report_job_outcome(result: crate::error::Result<()>, ticker: Option<&str>) {
    match result {
        Ok(()) => {}
        Err(IngestError::TradingHoursGate) => {
            info!(ticker, "historical ingestion job skipped: within trading hours");
        }
        Err(e) => {
            error!(ticker, error = %e, "historical ingestion job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::historical::HistoricalIngestor;
    use crate::registry::{ScheduleRegistry, SymbolRegistry};
    use crate::store::kv_store::fake::FakeKvStore;
    use crate::store::ts_store::fake::FakeTsStore;
    use crate::vendor::mock::MockHistClient;
    use std::str::FromStr;

    #[test]
    fn six_field_conversion_parses_with_cron_crate() {
        let six = to_six_field("1 20 * * *");
        assert_eq!(six, "0 1 20 * * *");
        assert!(cron::Schedule::from_str(&six).is_ok());
    }

    #[test]
    fn malformed_cron_fails_to_parse() {
        let six = to_six_field("* * * *");
        assert!(cron::Schedule::from_str(&six).is_err());
    }

    /// S6: a malformed per-symbol cron expression is skipped with a warning;
    /// neighboring (valid) schedules are registered unaffected.
    #[tokio::test]
    async fn rescan_skips_malformed_cron_but_registers_valid_neighbor() {
        let kv = Arc::new(FakeKvStore::new());
        let registry = Arc::new(ScheduleRegistry::new(kv.clone()));
        registry
            .put(
                "FOO",
                ScheduleKind::Historical,
                "* * * *".into(), // malformed: only 4 fields
                true,
                serde_json::json!({}),
            )
            .await
            .unwrap();
        registry
            .put(
                "AAPL",
                ScheduleKind::Historical,
                "1 20 * * *".into(),
                true,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        let ts = Arc::new(FakeTsStore::new());
        let symbols = Arc::new(SymbolRegistry::new(ts.clone(), kv.clone(), "symbol_management"));
        let vendor = Arc::new(MockHistClient::new());
        let historical = Arc::new(HistoricalIngestor::new(
            vendor,
            ts,
            symbols,
            registry.clone(),
            "market_data",
        ));

        let scheduler = Scheduler::new(historical, registry, kv).await.unwrap();
        scheduler.rescan_symbol_schedules().await;

        let ids = scheduler.registered_job_ids();
        assert!(ids.contains("ingestion_AAPL_historical"));
        assert!(!ids.contains("ingestion_FOO_historical"));
    }
}
