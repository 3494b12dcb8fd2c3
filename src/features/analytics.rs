//! 统计模块：按天累计领域事件次数

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::Subscriptions;
use crate::events::{EventBus, names};
use crate::infra::{CacheClient, JobOptions, JobQueue};
use crate::lifecycle::{Module, ModuleError, ModuleHealth};

pub const NAME: &str = "analytics";
pub const QUEUE: &str = "analytics";
pub const ROLLUP_JOB: &str = "daily-rollup";
const ROLLUP_CRON: &str = "0 0 * * *";
/// 日计数器保留两天，留给汇总任务读取
const COUNTER_TTL: Duration = Duration::from_secs(2 * 24 * 3600);

const TRACKED: [&str; 5] = [
    names::USER_REGISTERED,
    names::USER_LOGGED_IN,
    names::USER_LOGGED_OUT,
    names::TICKET_CREATED,
    names::SUBSCRIPTION_RENEWED,
];

pub fn counter_key(event: &str, day: &str) -> String {
    format!("analytics:events:{event}:{day}")
}

pub struct AnalyticsModule {
    cache: Arc<dyn CacheClient>,
    queue: Arc<dyn JobQueue>,
    events: EventBus,
    subscriptions: Subscriptions,
}

impl AnalyticsModule {
    pub fn new(cache: Arc<dyn CacheClient>, queue: Arc<dyn JobQueue>, events: EventBus) -> Self {
        Self {
            cache,
            queue,
            events,
            subscriptions: Subscriptions::default(),
        }
    }
}

#[async_trait]
impl Module for AnalyticsModule {
    async fn initialize(&self) -> Result<(), ModuleError> {
        for event in TRACKED {
            let cache = Arc::clone(&self.cache);
            let id = self.events.on(event, move |_| {
                let cache = Arc::clone(&cache);
                async move {
                    let day = Utc::now().format("%Y-%m-%d").to_string();
                    cache
                        .incr_by(&counter_key(event, &day), 1, Some(COUNTER_TTL))
                        .await?;
                    Ok(())
                }
            });
            self.subscriptions.push(event, id);
        }
        self.queue
            .add_job(QUEUE, ROLLUP_JOB, json!({}), JobOptions::repeat(ROLLUP_CRON))
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        self.subscriptions.release(&self.events);
        Ok(())
    }

    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        self.cache.ping().await?;
        Ok(Some(ModuleHealth::healthy().with_details(
            json!({ "trackedEvents": self.subscriptions.len() }),
        )))
    }
}
