//! Time-series store adapter.
//!
//! Grounded on `original_source/scripts/ohlc_ingest.py::InfluxConnectionManager`:
//! health cache (60s), reconnect-on-fail, retry with exponential backoff
//! (cap 3 attempts, base 5s, doubling), batched writes (size 5,000, flush
//! interval 10s, jitter 2s). The retry-loop shape itself is grounded on the
//! teacher's `scrapers/hashdive_api.rs::execute_with_retry`.

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const MAX_RETRIES: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(5);
const HEALTH_CACHE_TTL: Duration = Duration::from_secs(60);
pub const WRITE_BATCH_SIZE: usize = 5_000;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const FLUSH_JITTER: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum FluxValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(String),
    Time(DateTime<Utc>),
}

impl FluxValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FluxValue::Float(v) => Some(*v),
            FluxValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FluxValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FluxValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            FluxValue::Time(v) => Some(*v),
            _ => None,
        }
    }
}

pub type FluxRecord = BTreeMap<String, FluxValue>;

/// One point to be written: a measurement, its tag set, its field set, and
/// its timestamp. Tags vs. fields are separated at construction time
/// (spec.md §9 "duck-typed tag/field separation").
#[derive(Debug, Clone)]
pub struct TsPoint {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, FluxValue)>,
    pub timestamp: DateTime<Utc>,
}

impl TsPoint {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.tags.push((k.into(), v.into()));
        self
    }

    pub fn field(mut self, k: impl Into<String>, v: FluxValue) -> Self {
        self.fields.push((k.into(), v));
        self
    }
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Batched, nanosecond-precision write of points into `bucket`.
    async fn write(&self, bucket: &str, points: Vec<TsPoint>) -> Result<()>;

    /// Raw Flux query, returning a flat list of records (one per input
    /// table row — callers that need table grouping re-derive it from
    /// tag values).
    async fn query(&self, flux: &str) -> Result<Vec<FluxRecord>>;

    async fn ping(&self) -> Result<()>;
}

struct HealthCache {
    last_check: Option<Instant>,
    healthy: bool,
}

/// Retries `f` up to `MAX_RETRIES` times with exponential backoff doubling
/// from `BASE_DELAY`, calling `on_retry` (typically a reconnect) between
/// attempts. Exhaustion surfaces as `IngestError::TransientConnectivity`.
pub async fn with_retry<F, Fut, T, R, RFut>(
    target: &'static str,
    mut f: F,
    mut on_retry: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = ()>,
{
    let mut delay = BASE_DELAY;
    let mut last_err = None;
    for attempt in 0..MAX_RETRIES {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(target, attempt = attempt + 1, error = %e, "store operation failed");
                last_err = Some(e);
                if attempt + 1 < MAX_RETRIES {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    on_retry().await;
                }
            }
        }
    }
    error!(target, "exhausted {} retry attempts", MAX_RETRIES);
    Err(IngestError::TransientConnectivity {
        target,
        source: last_err.unwrap_or_else(|| anyhow::anyhow!("unknown failure")),
    })
}

/// InfluxDB-backed `TimeSeriesStore`. Holds the client behind a lock so a
/// failed health check can swap in a freshly-constructed client without
/// disturbing in-flight callers (spec.md §4.1 "reconnect-on-fail").
pub struct InfluxStore {
    url: String,
    org: String,
    token: String,
    client: parking_lot::RwLock<influxdb2::Client>,
    health: Mutex<HealthCache>,
}

impl InfluxStore {
    pub fn new(url: impl Into<String>, org: impl Into<String>, token: impl Into<String>) -> Self {
        let url = url.into();
        let org = org.into();
        let token = token.into();
        let client = influxdb2::Client::new(url.clone(), org.clone(), token.clone());
        Self {
            url,
            org,
            token,
            client: parking_lot::RwLock::new(client),
            health: Mutex::new(HealthCache {
                last_check: None,
                healthy: false,
            }),
        }
    }

    fn reconnect(&self) {
        let fresh = influxdb2::Client::new(self.url.clone(), self.org.clone(), self.token.clone());
        *self.client.write() = fresh;
        let mut h = self.health.lock();
        h.last_check = None;
        h.healthy = false;
    }

    async fn ensure_connection(&self) -> bool {
        let cached = {
            let h = self.health.lock();
            match h.last_check {
                Some(t) if t.elapsed() < HEALTH_CACHE_TTL => Some(h.healthy),
                _ => None,
            }
        };
        if let Some(healthy) = cached {
            return healthy;
        }

        let client = self.client.read().clone();
        let healthy = client.ready().await.is_ok();
        let mut h = self.health.lock();
        h.last_check = Some(Instant::now());
        h.healthy = healthy;
        if !healthy {
            warn!("InfluxDB health check failed, reconnecting");
        }
        healthy
    }

    fn to_data_point(point: &TsPoint) -> anyhow::Result<influxdb2::models::DataPoint> {
        let mut builder = influxdb2::models::DataPoint::builder(point.measurement.clone());
        for (k, v) in &point.tags {
            builder = builder.tag(k.clone(), v.clone());
        }
        for (k, v) in &point.fields {
            builder = match v {
                FluxValue::Float(f) => builder.field(k.clone(), *f),
                FluxValue::Int(i) => builder.field(k.clone(), *i),
                FluxValue::Bool(b) => builder.field(k.clone(), *b),
                FluxValue::Str(s) => builder.field(k.clone(), s.clone()),
                FluxValue::Time(_) => builder,
            };
        }
        builder = builder.timestamp(point.timestamp.timestamp_nanos_opt().unwrap_or_default());
        Ok(builder.build()?)
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxStore {
    async fn write(&self, bucket: &str, points: Vec<TsPoint>) -> Result<()> {
        if points.is_empty() {
            debug!("write called with zero points, skipping");
            return Ok(());
        }

        for chunk in points.chunks(WRITE_BATCH_SIZE) {
            let chunk: Vec<TsPoint> = chunk.to_vec();
            with_retry(
                "influxdb_write",
                || {
                    let bucket = bucket.to_string();
                    let chunk = chunk.clone();
                    async move {
                        if !self.ensure_connection().await {
                            anyhow::bail!("InfluxDB connection unhealthy");
                        }
                        let data_points: anyhow::Result<Vec<_>> =
                            chunk.iter().map(Self::to_data_point).collect();
                        let data_points = data_points?;
                        let client = self.client.read().clone();
                        client
                            .write(&bucket, futures::stream::iter(data_points))
                            .await?;
                        Ok(())
                    }
                },
                || async { self.reconnect() },
            )
            .await?;

            if points.len() > WRITE_BATCH_SIZE {
                let jitter = rand::thread_rng().gen_range(0..FLUSH_JITTER.as_millis() as u64);
                tokio::time::sleep(FLUSH_INTERVAL + Duration::from_millis(jitter)).await;
            }
        }
        Ok(())
    }

    async fn query(&self, flux: &str) -> Result<Vec<FluxRecord>> {
        with_retry(
            "influxdb_query",
            || async move {
                if !self.ensure_connection().await {
                    anyhow::bail!("InfluxDB connection unhealthy");
                }
                let client = self.client.read().clone();
                let raw = client.query_raw(Some(flux.to_string())).await?;
                Ok(raw
                    .into_iter()
                    .map(|rec| {
                        rec.values
                            .into_iter()
                            .map(|(k, v)| (k, from_influx_value(v)))
                            .collect()
                    })
                    .collect())
            },
            || async { self.reconnect() },
        )
        .await
    }

    async fn ping(&self) -> Result<()> {
        if self.ensure_connection().await {
            Ok(())
        } else {
            Err(IngestError::TransientConnectivity {
                target: "influxdb_ping",
                source: anyhow::anyhow!("ping failed"),
            })
        }
    }
}

fn from_influx_value(v: influxdb2_structmap::value::Value) -> FluxValue {
    use influxdb2_structmap::value::Value as V;
    match v {
        V::Double(f) => FluxValue::Float(f.into_inner()),
        V::Long(i) => FluxValue::Int(i),
        V::UnsignedLong(u) => FluxValue::Int(u as i64),
        V::Bool(b) => FluxValue::Bool(b),
        V::String(s) => FluxValue::Str(s),
        V::TimeRFC(t) => FluxValue::Time(t.with_timezone(&Utc)),
        _ => FluxValue::Str(String::new()),
    }
}

pub mod fake {
    //! An in-memory `TimeSeriesStore` used by the historical-ingestor and
    //! registry tests — avoids standing up a real InfluxDB for unit tests,
    //! matching the teacher's own preference for inline test fakes. Not
    //! `cfg(test)`-gated so integration tests under `tests/` can use it too
    //! (mirrors `vendor::mock`, which is always compiled for the same
    //! reason).
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeTsStore {
        pub buckets: Mutex<HashMap<String, Vec<TsPoint>>>,
        pub ping_ok: Mutex<bool>,
    }

    impl FakeTsStore {
        pub fn new() -> Self {
            Self {
                buckets: Mutex::new(HashMap::new()),
                ping_ok: Mutex::new(true),
            }
        }

        pub fn written_to(&self, bucket: &str) -> Vec<TsPoint> {
            self.buckets
                .lock()
                .get(bucket)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl TimeSeriesStore for FakeTsStore {
        async fn write(&self, bucket: &str, points: Vec<TsPoint>) -> Result<()> {
            if points.is_empty() {
                return Ok(());
            }
            self.buckets
                .lock()
                .entry(bucket.to_string())
                .or_default()
                .extend(points);
            Ok(())
        }

        async fn query(&self, _flux: &str) -> Result<Vec<FluxRecord>> {
            Ok(Vec::new())
        }

        async fn ping(&self) -> Result<()> {
            if *self.ping_ok.lock() {
                Ok(())
            } else {
                Err(IngestError::TransientConnectivity {
                    target: "fake_ping",
                    source: anyhow::anyhow!("forced failure"),
                })
            }
        }
    }
}
