use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use saas_backend::events::{EventBus, EventError, PUBLISH_TIMEOUT, names};
use saas_backend::infra::{CacheClient, CacheInfo, CollaboratorError, MemoryCache, Subscription};
use serde_json::{Value, json};
use tokio::sync::mpsc;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn failing_handler_does_not_affect_the_others() {
    let bus = EventBus::local(Duration::from_secs(1));
    let delivered = Arc::new(AtomicUsize::new(0));

    bus.on(names::USER_REGISTERED, |_| async {
        Err(EventError::handler("模板渲染失败"))
    });
    bus.on(names::USER_REGISTERED, |payload: Value| async move {
        if payload["explode"].as_bool() == Some(true) {
            panic!("处理器崩溃");
        }
        Ok(())
    });
    let counter = delivered.clone();
    bus.on(names::USER_REGISTERED, move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let scheduled = bus
        .emit(names::USER_REGISTERED, json!({ "explode": true }))
        .await;
    assert_eq!(scheduled, 3);
    settle().await;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    // 总线在处理器失败后仍然可用
    bus.emit(names::USER_REGISTERED, json!({})).await;
    settle().await;
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    assert_eq!(bus.handler_count(names::USER_REGISTERED), 3);
}

#[tokio::test]
async fn wait_for_times_out_and_cleans_up() {
    let bus = EventBus::local(Duration::from_secs(30));

    let err = bus
        .wait_for(names::TICKET_CREATED, Some(Duration::from_millis(50)))
        .await
        .expect_err("nothing emitted");
    assert!(matches!(err, EventError::Timeout { timeout_ms: 50, .. }));
    assert_eq!(bus.handler_count(names::TICKET_CREATED), 0);
    assert!(bus.event_names().is_empty());
}

#[tokio::test]
async fn wait_for_receives_the_next_payload() {
    let bus = EventBus::local(Duration::from_secs(1));
    let waiter = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.wait_for(names::TICKET_CREATED, None).await })
    };
    while bus.handler_count(names::TICKET_CREATED) == 0 {
        tokio::task::yield_now().await;
    }

    bus.emit(names::TICKET_CREATED, json!({ "ticketId": 42 }))
        .await;
    let payload = waiter.await.expect("join").expect("payload");
    assert_eq!(payload["ticketId"], 42);
    assert_eq!(bus.handler_count(names::TICKET_CREATED), 0);
}

#[tokio::test]
async fn once_handler_runs_a_single_time() {
    let bus = EventBus::local(Duration::from_secs(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    bus.once(names::SUBSCRIPTION_RENEWED, move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    assert_eq!(bus.emit(names::SUBSCRIPTION_RENEWED, json!({})).await, 1);
    assert_eq!(bus.emit(names::SUBSCRIPTION_RENEWED, json!({})).await, 0);
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn relay_delivers_events_between_instances() {
    let shared = Arc::new(MemoryCache::default());
    shared.connect().await.expect("connect");
    let cache: Arc<dyn CacheClient> = shared;

    let first = EventBus::relayed(cache.clone(), "app:events", Duration::from_secs(1));
    let second = EventBus::relayed(cache.clone(), "app:events", Duration::from_secs(1));
    assert_ne!(first.instance_id(), second.instance_id());
    first.start_relay().await.expect("relay first");
    second.start_relay().await.expect("relay second");

    let (tx_first, mut rx_first) = mpsc::unbounded_channel::<Value>();
    first.on(names::USER_LOGGED_IN, move |payload| {
        let tx = tx_first.clone();
        async move {
            let _ = tx.send(payload);
            Ok(())
        }
    });
    let (tx_second, mut rx_second) = mpsc::unbounded_channel::<Value>();
    second.on(names::USER_LOGGED_IN, move |payload| {
        let tx = tx_second.clone();
        async move {
            let _ = tx.send(payload);
            Ok(())
        }
    });

    first
        .emit(names::USER_LOGGED_IN, json!({ "userId": "u-1" }))
        .await;

    let remote = tokio::time::timeout(Duration::from_secs(1), rx_second.recv())
        .await
        .expect("relayed in time")
        .expect("payload");
    assert_eq!(remote["userId"], "u-1");

    let local = tokio::time::timeout(Duration::from_secs(1), rx_first.recv())
        .await
        .expect("local delivery")
        .expect("payload");
    assert_eq!(local["userId"], "u-1");

    // 发送方不会再收到自己广播出去的副本
    settle().await;
    assert!(rx_first.try_recv().is_err());

    first.stop_relay();
    second.stop_relay();
    assert!(!first.relay_active());
}

/// 发布永远不返回的缓存，其余操作交给内存实现
#[derive(Default)]
struct StalledPublishCache {
    inner: MemoryCache,
}

#[async_trait]
impl CacheClient for StalledPublishCache {
    async fn connect(&self) -> Result<(), CollaboratorError> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<(), CollaboratorError> {
        self.inner.disconnect().await
    }

    async fn ping(&self) -> Result<(), CollaboratorError> {
        self.inner.ping().await
    }

    async fn info(&self) -> Result<CacheInfo, CollaboratorError> {
        self.inner.info().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CollaboratorError> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CollaboratorError> {
        self.inner.set(key, value, ttl).await
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CollaboratorError> {
        self.inner.incr_by(key, delta, ttl).await
    }

    async fn publish(&self, _channel: &str, _message: &str) -> Result<usize, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(0)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CollaboratorError> {
        self.inner.subscribe(channel).await
    }
}

#[tokio::test]
async fn stalled_publish_does_not_block_local_delivery() {
    let cache = Arc::new(StalledPublishCache::default());
    cache.connect().await.expect("connect");
    let bus = EventBus::relayed(cache, "app:events", Duration::from_secs(1));

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    bus.on(names::USER_REGISTERED, move |payload| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
            Ok(())
        }
    });

    let emitter = {
        let bus = bus.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let scheduled = bus
                .emit(names::USER_REGISTERED, json!({ "userId": "u-9" }))
                .await;
            (scheduled, started.elapsed())
        })
    };

    // 发布还在挂起时本地处理器已经收到事件
    let local = tokio::time::timeout(PUBLISH_TIMEOUT / 2, rx.recv())
        .await
        .expect("delivered before publish settles")
        .expect("payload");
    assert_eq!(local["userId"], "u-9");

    let (scheduled, elapsed) = tokio::time::timeout(Duration::from_secs(5), emitter)
        .await
        .expect("emit bounded")
        .expect("join");
    assert_eq!(scheduled, 1);
    assert!(elapsed >= PUBLISH_TIMEOUT);
    assert!(elapsed < PUBLISH_TIMEOUT + Duration::from_secs(1), "{elapsed:?}");
}
