//! Key/value + pub-sub store adapter.
//!
//! Grounded on the original source's `redis` usage in
//! `scripts/live_tick_ingest.py` and `scripts/schedule_manager.py`
//! (string get/set with TTL, list push for recent-tick buffers, pub/sub for
//! watch-list change notifications), using the connection-manager pattern
//! the teacher applies to its own long-lived network clients
//! (`binance_session.rs::SessionConfig`).

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn rpush(&self, key: &str, value: &str) -> Result<()>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Subscribes to `channel`, returning a receiver fed by a dedicated task
    /// that owns the pub-sub connection. Matches the teacher's pattern of
    /// giving every long-lived network listener its own task rather than
    /// sharing a connection across readers.
    async fn subscribe(&self, channel: &str) -> Result<tokio::sync::mpsc::Receiver<String>>;
}

/// Redis-backed `KeyValueStore`, built on `redis::aio::ConnectionManager` for
/// automatic reconnection on the command path (spec.md §4.1).
pub struct RedisStore {
    client: redis::Client,
    manager: tokio::sync::OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        let client = redis::Client::open(url.as_ref()).map_err(|e| IngestError::MalformedConfig {
            what: "redis_url",
            detail: e.to_string(),
        })?;
        Ok(Self {
            client,
            manager: tokio::sync::OnceCell::new(),
        })
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        self.manager
            .get_or_try_init(|| async {
                self.client
                    .get_connection_manager()
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await
            .map(|m| m.clone())
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_connect",
                source: e,
            })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        redis::AsyncCommands::get(&mut conn, key)
            .await
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_get",
                source: e.into(),
            })
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::AsyncCommands::set(&mut conn, key, value)
            .await
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_set",
                source: e.into(),
            })
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::AsyncCommands::set_ex(&mut conn, key, value, ttl.as_secs())
            .await
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_setex",
                source: e.into(),
            })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::AsyncCommands::del(&mut conn, key)
            .await
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_del",
                source: e.into(),
            })
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::AsyncCommands::rpush(&mut conn, key, value)
            .await
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_rpush",
                source: e.into(),
            })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::AsyncCommands::expire(&mut conn, key, ttl.as_secs() as i64)
            .await
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_expire",
                source: e.into(),
            })
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let keys: Vec<String> = redis::AsyncCommands::keys(&mut conn, pattern)
            .await
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_scan",
                source: e.into(),
            })?;
        Ok(keys)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::AsyncCommands::publish(&mut conn, channel, message)
            .await
            .map_err(|e| IngestError::TransientConnectivity {
                target: "redis_publish",
                source: e.into(),
            })
    }

    async fn subscribe(&self, channel: &str) -> Result<tokio::sync::mpsc::Receiver<String>> {
        let client = self.client.clone();
        let channel = channel.to_string();
        let (tx, rx) = tokio::sync::mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                let pubsub = match client.get_async_pubsub().await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "pub-sub connect failed, retrying in 5s");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };
                let mut pubsub = pubsub;
                if let Err(e) = pubsub.subscribe(&channel).await {
                    warn!(channel = %channel, error = %e, "subscribe failed, retrying in 5s");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }

                let mut stream = pubsub.on_message();
                loop {
                    use futures::StreamExt;
                    match stream.next().await {
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(_) => continue,
                            };
                            if tx.send(payload).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            warn!(channel = %channel, "pub-sub stream ended, reconnecting in 5s");
                            break;
                        }
                    }
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });

        Ok(rx)
    }
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }
    let mut rest = candidate;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(pos) if i == 0 && pos != 0 => return false,
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

pub mod fake {
    //! In-memory `KeyValueStore` for tests, mirroring `store::ts_store::fake`.
    //! Not `cfg(test)`-gated so integration tests under `tests/` can use it
    //! too (mirrors `vendor::mock`, which is always compiled for the same
    //! reason).
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeKvStore {
        pub values: Mutex<HashMap<String, String>>,
        pub lists: Mutex<HashMap<String, Vec<String>>>,
        pub published: Mutex<Vec<(String, String)>>,
    }

    impl FakeKvStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl KeyValueStore for FakeKvStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.values.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.values.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn setex(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
            self.values.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.values.lock().remove(key);
            Ok(())
        }

        async fn rpush(&self, key: &str, value: &str) -> Result<()> {
            self.lists
                .lock()
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
            Ok(())
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
            Ok(())
        }

        async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
            Ok(self
                .values
                .lock()
                .keys()
                .filter(|k| glob_match(pattern, k))
                .cloned()
                .collect())
        }

        async fn publish(&self, channel: &str, message: &str) -> Result<()> {
            self.published
                .lock()
                .push((channel.to_string(), message.to_string()));
            Ok(())
        }

        async fn subscribe(&self, _channel: &str) -> Result<tokio::sync::mpsc::Receiver<String>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }
}
