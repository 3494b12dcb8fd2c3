//! 认证模块：维护在线用户数

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::Subscriptions;
use crate::events::{EventBus, names};
use crate::health::metrics::ACTIVE_USERS_KEY;
use crate::infra::CacheClient;
use crate::lifecycle::{Module, ModuleError, ModuleHealth};

pub const NAME: &str = "auth";

pub struct AuthModule {
    cache: Arc<dyn CacheClient>,
    events: EventBus,
    subscriptions: Subscriptions,
}

impl AuthModule {
    pub fn new(cache: Arc<dyn CacheClient>, events: EventBus) -> Self {
        Self {
            cache,
            events,
            subscriptions: Subscriptions::default(),
        }
    }

    fn track_sessions(&self, event: &'static str, delta: i64) {
        let cache = Arc::clone(&self.cache);
        let id = self.events.on(event, move |_| {
            let cache = Arc::clone(&cache);
            async move {
                let now = cache.incr_by(ACTIVE_USERS_KEY, delta, None).await?;
                if now < 0 {
                    // 重启后登出事件可能先于登录到达
                    cache.set(ACTIVE_USERS_KEY, "0", None).await?;
                }
                Ok(())
            }
        });
        self.subscriptions.push(event, id);
    }
}

#[async_trait]
impl Module for AuthModule {
    async fn initialize(&self) -> Result<(), ModuleError> {
        self.cache.ping().await?;
        self.track_sessions(names::USER_LOGGED_IN, 1);
        self.track_sessions(names::USER_LOGGED_OUT, -1);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        let removed = self.subscriptions.release(&self.events);
        tracing::debug!(module = NAME, removed, "已注销事件处理器");
        Ok(())
    }

    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        self.cache.ping().await?;
        let active = self
            .cache
            .get(ACTIVE_USERS_KEY)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(Some(
            ModuleHealth::healthy().with_details(json!({ "activeUsers": active })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MemoryCache;
    use std::time::Duration;

    async fn gauge_reaches(cache: &MemoryCache, expected: &str) -> bool {
        for _ in 0..50 {
            if cache.get(ACTIVE_USERS_KEY).await.expect("get").as_deref() == Some(expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn login_and_logout_move_the_gauge() {
        let cache = Arc::new(MemoryCache::default());
        cache.connect().await.expect("connect");
        let bus = EventBus::local(Duration::from_secs(1));
        let module = AuthModule::new(cache.clone(), bus.clone());
        module.initialize().await.expect("init");

        bus.emit(names::USER_LOGGED_IN, json!({"userId": 1})).await;
        bus.emit(names::USER_LOGGED_IN, json!({"userId": 2})).await;
        assert!(gauge_reaches(&cache, "2").await);
        bus.emit(names::USER_LOGGED_OUT, json!({"userId": 1})).await;
        assert!(gauge_reaches(&cache, "1").await);

        module.shutdown().await.expect("shutdown");
        assert_eq!(bus.handler_count(names::USER_LOGGED_IN), 0);
        assert_eq!(bus.handler_count(names::USER_LOGGED_OUT), 0);
    }

    #[tokio::test]
    async fn initialize_requires_cache() {
        let cache = Arc::new(MemoryCache::default());
        let module = AuthModule::new(cache, EventBus::local(Duration::from_secs(1)));
        assert!(module.initialize().await.is_err());
    }
}
