pub mod kv_store;
pub mod ts_store;

pub use kv_store::{KeyValueStore, RedisStore};
pub use ts_store::{FluxRecord, FluxValue, InfluxStore, TimeSeriesStore, TsPoint};
