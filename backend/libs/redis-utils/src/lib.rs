use anyhow::{anyhow, Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, RedisResult};
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

/// Redis connection handle shared by the service.
///
/// `ConnectionManager` multiplexes a single connection and reconnects on its
/// own, so callers clone the manager instead of pooling connections.
#[derive(Clone)]
pub struct RedisPool {
    manager: ConnectionManager,
    addr_label: String,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let info = redis_url
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;
        let addr_label = info.addr.to_string();

        let client = Client::open(info).context("failed to construct Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        let pool = Self {
            manager,
            addr_label,
        };
        pool.ping().await?;
        info!("Redis connected at {}", pool.addr_label);
        Ok(pool)
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING failed")?;
        if pong != "PONG" {
            warn!("unexpected PING reply from {}: {}", self.addr_label, pong);
        }
        Ok(())
    }
}

/// Run a Redis command future with an upper bound on latency.
///
/// The caller decides what a timeout means; the cache layer treats it as a
/// miss and falls back to PostgreSQL.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(anyhow!(err)),
        Err(_) => Err(anyhow!("redis command timed out after {:?}", limit)),
    }
}

/// Strip credentials from a redis URL before it reaches the logs.
pub fn redact_url(raw: &str) -> String {
    match raw.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_, host)) => format!("{}://***@{}", scheme, host),
            None => raw.to_string(),
        },
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_hides_password() {
        assert_eq!(
            redact_url("redis://:hunter2@cache.internal:6379/0"),
            "redis://***@cache.internal:6379/0"
        );
        assert_eq!(
            redact_url("redis://localhost:6379"),
            "redis://localhost:6379"
        );
    }

    #[tokio::test]
    async fn connect_rejects_malformed_url() {
        let result = RedisPool::connect("not a url").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn with_timeout_reports_elapsed() {
        let fut = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, redis::RedisError>(1u8)
        };
        let err = with_timeout(Duration::from_millis(5), fut).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn with_timeout_passes_value_through() {
        let value = with_timeout(Duration::from_secs(1), async { Ok::<_, redis::RedisError>(7u8) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
