//! 基础设施协作者
//!
//! 编排核心只通过这里定义的窄接口访问关系存储、缓存、队列与搜索集群，
//! 具体实现可以替换（测试中常用假实现）。

pub mod cache;
pub mod queue;
#[cfg(feature = "redis-cache")]
pub mod redis_cache;
pub mod search;
pub mod store;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use cache::MemoryCache;
pub use queue::MemoryQueue;
#[cfg(feature = "redis-cache")]
pub use redis_cache::RedisCache;
pub use search::HttpSearchIndex;
pub use store::SqliteStore;

/// 协作者调用错误
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// 尚未建立连接
    #[error("未连接: {0}")]
    NotConnected(&'static str),

    /// 已关闭，不再接受操作
    #[error("已关闭: {0}")]
    Closed(&'static str),

    /// 调用超时
    #[error("调用超时")]
    Timeout,

    /// 连接失败
    #[error("连接失败: {0}")]
    Connection(String),

    /// 对端返回了无法理解的数据
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP 请求错误
    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis 错误
    #[cfg(feature = "redis-cache")]
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 连接池统计
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
    pub max_connections: u32,
}

/// 关系存储
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn connect(&self) -> Result<(), CollaboratorError>;
    async fn disconnect(&self) -> Result<(), CollaboratorError>;
    /// 执行 `SELECT 1` 探测
    async fn probe(&self) -> Result<(), CollaboratorError>;
    fn stats(&self) -> Option<PoolStats>;
}

/// 缓存服务概要信息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub backend: String,
    pub used_memory_bytes: Option<u64>,
    pub connected_clients: Option<u64>,
    pub entries: Option<u64>,
}

/// 频道订阅：按到达顺序产出原始消息
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, rx: mpsc::Receiver<String>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// 等待下一条消息；订阅源关闭时返回 `None`
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// 缓存（键值 + 计数器 + 发布订阅）
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn connect(&self) -> Result<(), CollaboratorError>;
    async fn disconnect(&self) -> Result<(), CollaboratorError>;
    async fn ping(&self) -> Result<(), CollaboratorError>;
    async fn info(&self) -> Result<CacheInfo, CollaboratorError>;
    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError>;
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CollaboratorError>;
    /// 原子加减计数器，返回新值；`ttl` 仅在键首次创建时生效
    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CollaboratorError>;
    /// 发布消息，返回收到消息的订阅者数量
    async fn publish(&self, channel: &str, message: &str) -> Result<usize, CollaboratorError>;
    async fn subscribe(&self, channel: &str) -> Result<Subscription, CollaboratorError>;
}

/// 周期任务设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repeat {
    pub cron: String,
}

/// 入队选项
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl JobOptions {
    pub fn repeat(cron: impl Into<String>) -> Self {
        Self {
            repeat: Some(Repeat { cron: cron.into() }),
            ..Self::default()
        }
    }
}

/// 单个队列的健康状况
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub healthy: bool,
    pub waiting: u64,
    pub repeatable: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 队列整体健康报告
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub closed: bool,
    pub queues: BTreeMap<String, QueueStatus>,
}

/// 任务队列
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// 入队，返回任务 ID
    async fn add_job(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<String, CollaboratorError>;
    async fn health_check(&self) -> Result<QueueHealth, CollaboratorError>;
    async fn close(&self) -> Result<(), CollaboratorError>;
}

/// 搜索集群健康颜色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClusterColor {
    Green,
    Yellow,
    Red,
}

/// 搜索集群健康（字段沿用集群 API 的 snake_case）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterHealth {
    pub status: ClusterColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_nodes: Option<u64>,
}

/// 搜索索引客户端（可选协作者）
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn connect(&self) -> Result<(), CollaboratorError>;
    async fn disconnect(&self) -> Result<(), CollaboratorError>;
    fn is_connected(&self) -> bool;
    async fn cluster_health(&self) -> Result<ClusterHealth, CollaboratorError>;
}
