//! Redis 缓存实现
//!
//! 多实例部署时使用：计数器与发布订阅都经由同一个 Redis，
//! 事件总线借此完成跨进程广播。

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::{Client, aio::MultiplexedConnection};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{CacheClient, CacheInfo, CollaboratorError, Subscription};

/// 获取连接的超时时间
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SUBSCRIPTION_BUFFER: usize = 256;

pub struct RedisCache {
    url: String,
    client: RwLock<Option<Client>>,
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisCache {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: RwLock::new(None),
            conn: RwLock::new(None),
        }
    }

    fn connection(&self) -> Result<MultiplexedConnection, CollaboratorError> {
        self.conn
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(CollaboratorError::NotConnected("cache"))
    }

    fn client(&self) -> Result<Client, CollaboratorError> {
        self.client
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(CollaboratorError::NotConnected("cache"))
    }
}

/// 从 `INFO` 输出中取出形如 `key:value` 的数值字段
fn info_field(info: &str, key: &str) -> Option<u64> {
    info.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k == key { v.trim().parse().ok() } else { None }
    })
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn connect(&self) -> Result<(), CollaboratorError> {
        let client = Client::open(self.url.as_str())?;
        let mut conn = timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CollaboratorError::Timeout)??;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong != "PONG" {
            return Err(CollaboratorError::Protocol(format!("PING 返回了 {pong}")));
        }
        if let Ok(mut guard) = self.client.write() {
            *guard = Some(client);
        }
        if let Ok(mut guard) = self.conn.write() {
            *guard = Some(conn);
        }
        tracing::info!(url = %self.url, "Redis 连接已建立");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CollaboratorError> {
        if let Ok(mut guard) = self.conn.write() {
            guard.take();
        }
        if let Ok(mut guard) = self.client.write() {
            guard.take();
        }
        tracing::info!("Redis 连接已释放");
        Ok(())
    }

    async fn ping(&self) -> Result<(), CollaboratorError> {
        let mut conn = self.connection()?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CollaboratorError::Protocol(format!("PING 返回了 {pong}")))
        }
    }

    async fn info(&self) -> Result<CacheInfo, CollaboratorError> {
        let mut conn = self.connection()?;
        let memory: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
        let clients: String = redis::cmd("INFO").arg("clients").query_async(&mut conn).await?;
        let entries: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(CacheInfo {
            backend: "redis".to_string(),
            used_memory_bytes: info_field(&memory, "used_memory"),
            connected_clients: info_field(&clients, "connected_clients"),
            entries: Some(entries),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError> {
        let mut conn = self.connection()?;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CollaboratorError> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CollaboratorError> {
        let mut conn = self.connection()?;
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        if let Some(ttl) = ttl {
            // NX：只给尚无过期时间的键设置 TTL
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
                .arg("NX")
                .query_async::<()>(&mut conn)
                .await?;
        }
        Ok(value)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, CollaboratorError> {
        let mut conn = self.connection()?;
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CollaboratorError> {
        let client = self.client()?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let name = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(channel = %name, "无法解析订阅消息: {}", e),
                }
            }
            tracing::debug!(channel = %name, "Redis 订阅已结束");
        });
        Ok(Subscription::new(channel, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_field_parses_numeric_lines() {
        let info = "# Memory\r\nused_memory:1024\r\nused_memory_human:1K\r\n";
        assert_eq!(info_field(info, "used_memory"), Some(1024));
        assert_eq!(info_field(info, "connected_clients"), None);
    }

    #[tokio::test]
    async fn commands_require_connection() {
        let cache = RedisCache::new("redis://127.0.0.1:1");
        let err = cache.ping().await.expect_err("未连接");
        assert!(matches!(err, CollaboratorError::NotConnected("cache")));
    }
}
