use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::EventError;
use crate::config::EventsConfig;
use crate::infra::CacheClient;

/// 单次广播发布的最长等待时间
pub const PUBLISH_TIMEOUT: Duration = Duration::from_millis(500);

type HandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), EventError>> + Send + Sync>;

/// 处理器注册句柄，用于 `off`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct HandlerEntry {
    id: HandlerId,
    once: bool,
    handler: HandlerFn,
}

/// 跨进程广播的消息体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event: String,
    pub payload: Value,
    /// 发出该事件的进程实例
    pub origin: String,
    pub emitted_at: DateTime<Utc>,
}

struct Relay {
    cache: Arc<dyn CacheClient>,
    channel: String,
}

struct Inner {
    handlers: RwLock<HashMap<String, Vec<HandlerEntry>>>,
    next_id: AtomicU64,
    relay: Option<Relay>,
    relay_task: Mutex<Option<JoinHandle<()>>>,
    instance_id: String,
    wait_timeout: Duration,
}

/// 事件总线。克隆开销很小，所有克隆共享同一组处理器。
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("instance_id", &self.inner.instance_id)
            .field("relay", &self.inner.relay.as_ref().map(|r| r.channel.as_str()))
            .finish_non_exhaustive()
    }
}

fn instance_id() -> String {
    format!(
        "{}-{}",
        gethostname::gethostname().to_string_lossy(),
        Uuid::new_v4().simple()
    )
}

impl EventBus {
    fn build(relay: Option<Relay>, wait_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                relay,
                relay_task: Mutex::new(None),
                instance_id: instance_id(),
                wait_timeout,
            }),
        }
    }

    /// 仅进程内分发
    pub fn local(wait_timeout: Duration) -> Self {
        Self::build(None, wait_timeout)
    }

    /// 进程内分发，同时把事件发布到缓存频道
    pub fn relayed(
        cache: Arc<dyn CacheClient>,
        channel: impl Into<String>,
        wait_timeout: Duration,
    ) -> Self {
        Self::build(
            Some(Relay {
                cache,
                channel: channel.into(),
            }),
            wait_timeout,
        )
    }

    pub fn from_config(config: &EventsConfig, cache: Option<Arc<dyn CacheClient>>) -> Self {
        match cache {
            Some(cache) if config.relay => {
                Self::relayed(cache, config.channel.clone(), config.wait_timeout())
            }
            _ => Self::local(config.wait_timeout()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    fn write_handlers(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<HandlerEntry>>> {
        match self.inner.handlers.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_handlers(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<HandlerEntry>>> {
        match self.inner.handlers.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn add<F, Fut>(&self, event: &str, once: bool, handler: F) -> HandlerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventError>> + Send + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: HandlerFn = Arc::new(move |payload| handler(payload).boxed());
        self.write_handlers()
            .entry(event.to_string())
            .or_default()
            .push(HandlerEntry { id, once, handler });
        id
    }

    /// 注册处理器；同一事件可注册多个，emit 时全部执行
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventError>> + Send + 'static,
    {
        self.add(event, false, handler)
    }

    /// 注册只执行一次的处理器，分发时即被移除
    pub fn once<F, Fut>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventError>> + Send + 'static,
    {
        self.add(event, true, handler)
    }

    /// 移除指定处理器，返回是否确实移除了
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut handlers = self.write_handlers();
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| h.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// 本地分发并（若配置了）发布到广播频道。
    ///
    /// 不等待处理器执行完毕；发布失败或超过 `PUBLISH_TIMEOUT` 只记录日志。返回本地调度的处理器数量。
    pub async fn emit(&self, event: &str, payload: Value) -> usize {
        let Some(relay) = &self.inner.relay else {
            return self.emit_local(event, payload);
        };
        let envelope = EventEnvelope {
            event: event.to_string(),
            payload: payload.clone(),
            origin: self.inner.instance_id.clone(),
            emitted_at: Utc::now(),
        };
        let scheduled = self.emit_local(event, payload);
        match serde_json::to_string(&envelope) {
            Ok(message) => {
                match tokio::time::timeout(
                    PUBLISH_TIMEOUT,
                    relay.cache.publish(&relay.channel, &message),
                )
                .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(event, channel = %relay.channel, "事件广播失败: {}", e)
                    }
                    Err(_) => tracing::warn!(
                        event,
                        channel = %relay.channel,
                        timeout_ms = PUBLISH_TIMEOUT.as_millis() as u64,
                        "事件广播超时"
                    ),
                }
            }
            Err(e) => tracing::warn!(event, "事件序列化失败: {}", e),
        }
        scheduled
    }

    /// 只在本进程内分发（需在 tokio 运行时中调用）
    pub fn emit_local(&self, event: &str, payload: Value) -> usize {
        let targets: Vec<(HandlerId, HandlerFn)> = {
            let mut handlers = self.write_handlers();
            let Some(list) = handlers.get_mut(event) else {
                return 0;
            };
            let targets = list
                .iter()
                .map(|h| (h.id, Arc::clone(&h.handler)))
                .collect();
            list.retain(|h| !h.once);
            if list.is_empty() {
                handlers.remove(event);
            }
            targets
        };

        let count = targets.len();
        for (id, handler) in targets {
            let event = event.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                match AssertUnwindSafe(async move { handler(payload).await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(event = %event, handler = id.0, "事件处理器执行失败: {}", e);
                    }
                    Err(panic) => {
                        let msg = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        tracing::error!(event = %event, handler = id.0, "事件处理器 panic: {}", msg);
                    }
                }
            });
        }
        count
    }

    /// 等待下一次事件发生。
    ///
    /// 成功、超时以及调用方放弃等待时都会移除内部监听。
    pub async fn wait_for(
        &self,
        event: &str,
        timeout: Option<Duration>,
    ) -> Result<Value, EventError> {
        let timeout = timeout.unwrap_or(self.inner.wait_timeout);
        let (tx, rx) = oneshot::channel::<Value>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let id = self.once(event, move |payload| {
            let tx = Arc::clone(&tx);
            async move {
                let sender = tx.lock().ok().and_then(|mut g| g.take());
                if let Some(sender) = sender {
                    let _ = sender.send(payload);
                }
                Ok(())
            }
        });
        let _guard = WaitGuard {
            bus: self,
            event,
            id,
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(EventError::Cancelled {
                event: event.to_string(),
            }),
            Err(_) => Err(EventError::Timeout {
                event: event.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// 移除全部处理器（仅在关停时使用）
    pub fn clear(&self) {
        let removed: usize = {
            let mut handlers = self.write_handlers();
            let n = handlers.values().map(Vec::len).sum();
            handlers.clear();
            n
        };
        tracing::debug!(removed, "事件处理器已全部移除");
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.read_handlers().get(event).map_or(0, Vec::len)
    }

    /// 当前有处理器的事件名（已排序）
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_handlers().keys().cloned().collect();
        names.sort();
        names
    }

    /// 订阅广播频道，把其它进程发出的事件在本地重新分发
    pub async fn start_relay(&self) -> Result<(), EventError> {
        let Some(relay) = &self.inner.relay else {
            return Ok(());
        };
        let mut subscription = relay.cache.subscribe(&relay.channel).await?;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let own_origin = self.inner.instance_id.clone();
        let channel = relay.channel.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                let envelope: EventEnvelope = match serde_json::from_str(&message) {
                    Ok(env) => env,
                    Err(e) => {
                        tracing::warn!(channel = %channel, "忽略无法解析的广播事件: {}", e);
                        continue;
                    }
                };
                if envelope.origin == own_origin {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let bus = EventBus { inner };
                tracing::debug!(event = %envelope.event, origin = %envelope.origin, "收到跨进程事件");
                bus.emit_local(&envelope.event, envelope.payload);
            }
            tracing::debug!(channel = %channel, "事件广播订阅已结束");
        });

        let previous = match self.inner.relay_task.lock() {
            Ok(mut g) => g.replace(task),
            Err(poisoned) => poisoned.into_inner().replace(task),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::info!(channel = %relay.channel, instance = %self.inner.instance_id, "事件广播已启动");
        Ok(())
    }

    pub fn stop_relay(&self) {
        let task = match self.inner.relay_task.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
            tracing::info!("事件广播已停止");
        }
    }

    pub fn relay_active(&self) -> bool {
        match self.inner.relay_task.lock() {
            Ok(g) => g.as_ref().is_some_and(|t| !t.is_finished()),
            Err(_) => false,
        }
    }
}

struct WaitGuard<'a> {
    bus: &'a EventBus,
    event: &'a str,
    id: HandlerId,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.bus.off(self.event, self.id);
    }
}
