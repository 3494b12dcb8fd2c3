use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use tokio::sync::{broadcast, mpsc};

use super::{CacheClient, CacheInfo, CollaboratorError, Subscription};

/// 单个频道的广播缓冲长度
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
    /// 计数器更新时保留原有剩余寿命
    sticky: bool,
}

/// 按条目自带 TTL 过期
struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        if value.sticky {
            duration_until_expiry.or(value.ttl)
        } else {
            value.ttl
        }
    }
}

/// 进程内缓存：moka 负责键值与过期，tokio broadcast 负责发布订阅。
///
/// 只在单进程内可见，多实例部署时应换成 Redis 实现。
pub struct MemoryCache {
    entries: Cache<String, Entry>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    counter_lock: tokio::sync::Mutex<()>,
    connected: AtomicBool,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(EntryExpiry)
                .build(),
            channels: Mutex::new(HashMap::new()),
            counter_lock: tokio::sync::Mutex::new(()),
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<(), CollaboratorError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CollaboratorError::NotConnected("cache"))
        }
    }

    fn sender(&self, channel: &str) -> Option<broadcast::Sender<String>> {
        let mut guard = self.channels.lock().ok()?;
        let tx = guard
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Some(tx.clone())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn connect(&self) -> Result<(), CollaboratorError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CollaboratorError> {
        self.connected.store(false, Ordering::SeqCst);
        // 丢弃所有发送端，订阅者随之收到关闭
        if let Ok(mut guard) = self.channels.lock() {
            guard.clear();
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), CollaboratorError> {
        self.ensure_connected()
    }

    async fn info(&self) -> Result<CacheInfo, CollaboratorError> {
        self.ensure_connected()?;
        self.entries.run_pending_tasks().await;
        let subscribers = self
            .channels
            .lock()
            .map(|guard| guard.values().map(|tx| tx.receiver_count() as u64).sum())
            .ok();
        Ok(CacheInfo {
            backend: "memory".to_string(),
            used_memory_bytes: None,
            connected_clients: subscribers,
            entries: Some(self.entries.entry_count()),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError> {
        self.ensure_connected()?;
        Ok(self.entries.get(key).await.map(|e| e.value))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CollaboratorError> {
        self.ensure_connected()?;
        self.entries
            .insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    ttl,
                    sticky: false,
                },
            )
            .await;
        Ok(())
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CollaboratorError> {
        self.ensure_connected()?;
        let _guard = self.counter_lock.lock().await;
        let current = match self.entries.get(key).await {
            Some(entry) => entry.value.parse::<i64>().map_err(|_| {
                CollaboratorError::Protocol(format!("键 {key} 的值不是整数"))
            })?,
            None => 0,
        };
        let next = current.saturating_add(delta);
        self.entries
            .insert(
                key.to_string(),
                Entry {
                    value: next.to_string(),
                    ttl,
                    sticky: true,
                },
            )
            .await;
        Ok(next)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, CollaboratorError> {
        self.ensure_connected()?;
        let Some(tx) = self.sender(channel) else {
            return Err(CollaboratorError::Connection("频道表锁已损坏".to_string()));
        };
        // 没有订阅者时 send 返回 Err，与 Redis PUBLISH 返回 0 语义一致
        Ok(tx.send(message.to_string()).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CollaboratorError> {
        self.ensure_connected()?;
        let Some(tx) = self.sender(channel) else {
            return Err(CollaboratorError::Connection("频道表锁已损坏".to_string()));
        };
        let mut source = tx.subscribe();
        drop(tx);
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let name = channel.to_string();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(msg) => {
                        if out_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %name, skipped, "订阅者处理过慢，丢弃了部分消息");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(channel, out_rx))
    }
}
