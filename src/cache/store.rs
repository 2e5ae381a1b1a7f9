//! Key-value store adapter.
//!
//! [`ValueStore`] is the raw boundary: implementations translate their
//! transport errors into the closed [`TransientError`] taxonomy and nothing
//! else. Degradation (treating failures as misses) happens one level up in
//! [`GuardedStore`](super::GuardedStore), after the breaker and the retry
//! executor have had their say.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use crate::config::StoreSettings;
use crate::resilience::TransientError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub connected: bool,
    pub memory_used_bytes: Option<u64>,
    pub key_count: u64,
}

#[async_trait]
pub trait ValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TransientError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TransientError>;
    async fn del(&self, key: &str) -> Result<bool, TransientError>;
    /// Delete every key matching a `*` glob; returns how many went away.
    async fn del_pattern(&self, pattern: &str) -> Result<u64, TransientError>;
    async fn exists(&self, key: &str) -> Result<bool, TransientError>;
    /// Remaining TTL, `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, TransientError>;
    async fn incr(&self, key: &str) -> Result<i64, TransientError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, TransientError>;
    async fn sadd(&self, key: &str, member: &str) -> Result<(), TransientError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, TransientError>;
    async fn stats(&self) -> Result<StoreStats, TransientError>;
}

/// Networked store over the shared cache service.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(settings: &StoreSettings) -> Result<Self, TransientError> {
        let client =
            redis::Client::open(settings.connection_url()).map_err(map_redis_error)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;
        info!(
            target = "voltgate::cache",
            host = %settings.host,
            port = settings.port,
            db = settings.db,
            "connected to key-value store"
        );
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl ValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TransientError> {
        let mut conn = self.conn();
        conn.get(key).await.map_err(map_redis_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), TransientError> {
        let mut conn = self.conn();
        let secs = ttl.as_secs().max(1);
        conn.set_ex(key, value, secs).await.map_err(map_redis_error)
    }

    async fn del(&self, key: &str) -> Result<bool, TransientError> {
        let mut conn = self.conn();
        let removed: u64 = conn.del(key).await.map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn del_pattern(&self, pattern: &str) -> Result<u64, TransientError> {
        let mut scan_conn = self.conn();
        let mut keys = Vec::new();
        {
            let mut iter = scan_conn
                .scan_match::<_, String>(pattern)
                .await
                .map_err(map_redis_error)?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let removed: u64 = conn.del(&keys).await.map_err(map_redis_error)?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, TransientError> {
        let mut conn = self.conn();
        conn.exists(key).await.map_err(map_redis_error)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, TransientError> {
        let mut conn = self.conn();
        let secs: i64 = conn.ttl(key).await.map_err(map_redis_error)?;
        if secs < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(secs as u64)))
        }
    }

    async fn incr(&self, key: &str) -> Result<i64, TransientError> {
        let mut conn = self.conn();
        conn.incr(key, 1i64).await.map_err(map_redis_error)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, TransientError> {
        let mut conn = self.conn();
        conn.expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(map_redis_error)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), TransientError> {
        let mut conn = self.conn();
        conn.sadd(key, member).await.map_err(map_redis_error)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, TransientError> {
        let mut conn = self.conn();
        conn.smembers(key).await.map_err(map_redis_error)
    }

    async fn stats(&self) -> Result<StoreStats, TransientError> {
        let mut conn = self.conn();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        let key_count: u64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(StoreStats {
            connected: pong == "PONG",
            memory_used_bytes: parse_used_memory(&info),
            key_count,
        })
    }
}

/// Stand-in used when the store is unreachable at startup; every call fails
/// with a connection error so the breaker opens and callers degrade.
pub struct DisconnectedStore;

impl DisconnectedStore {
    fn unavailable() -> TransientError {
        TransientError::ConnectionRefused("key-value service unavailable".to_string())
    }
}

#[async_trait]
impl ValueStore for DisconnectedStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, TransientError> {
        Err(Self::unavailable())
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), TransientError> {
        Err(Self::unavailable())
    }

    async fn del(&self, _key: &str) -> Result<bool, TransientError> {
        Err(Self::unavailable())
    }

    async fn del_pattern(&self, _pattern: &str) -> Result<u64, TransientError> {
        Err(Self::unavailable())
    }

    async fn exists(&self, _key: &str) -> Result<bool, TransientError> {
        Err(Self::unavailable())
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, TransientError> {
        Err(Self::unavailable())
    }

    async fn incr(&self, _key: &str) -> Result<i64, TransientError> {
        Err(Self::unavailable())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, TransientError> {
        Err(Self::unavailable())
    }

    async fn sadd(&self, _key: &str, _member: &str) -> Result<(), TransientError> {
        Err(Self::unavailable())
    }

    async fn smembers(&self, _key: &str) -> Result<Vec<String>, TransientError> {
        Err(Self::unavailable())
    }

    async fn stats(&self) -> Result<StoreStats, TransientError> {
        Err(Self::unavailable())
    }
}

fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
}

fn map_redis_error(err: redis::RedisError) -> TransientError {
    use redis::ErrorKind as K;

    if err.is_timeout() {
        return TransientError::Timeout(err.to_string());
    }
    if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        return TransientError::ConnectionRefused(err.to_string());
    }
    match err.kind() {
        K::BusyLoadingError | K::TryAgain | K::ClusterDown | K::MasterDown => {
            TransientError::ServerFault(err.to_string())
        }
        _ => TransientError::Other(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_memory_is_parsed_from_info_section() {
        let info = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        assert_eq!(parse_used_memory(info), Some(1_048_576));
        assert_eq!(parse_used_memory("# Memory\r\n"), None);
    }
}
