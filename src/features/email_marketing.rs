//! 邮件营销模块

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::Subscriptions;
use crate::events::{EventBus, names};
use crate::infra::{JobOptions, JobQueue};
use crate::lifecycle::{Module, ModuleError, ModuleHealth};

pub const NAME: &str = "email_marketing";
pub const QUEUE: &str = "email_marketing";
pub const DISPATCH_JOB: &str = "campaign-dispatch";
const DISPATCH_CRON: &str = "0 * * * *";

pub struct EmailMarketingModule {
    queue: Arc<dyn JobQueue>,
    events: EventBus,
    subscriptions: Subscriptions,
}

impl EmailMarketingModule {
    pub fn new(queue: Arc<dyn JobQueue>, events: EventBus) -> Self {
        Self {
            queue,
            events,
            subscriptions: Subscriptions::default(),
        }
    }
}

#[async_trait]
impl Module for EmailMarketingModule {
    async fn initialize(&self) -> Result<(), ModuleError> {
        self.queue
            .add_job(
                QUEUE,
                DISPATCH_JOB,
                json!({}),
                JobOptions::repeat(DISPATCH_CRON),
            )
            .await?;

        let queue = Arc::clone(&self.queue);
        let id = self.events.on(names::USER_REGISTERED, move |payload| {
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .add_job(QUEUE, "enrol-subscriber", payload, JobOptions::default())
                    .await?;
                Ok(())
            }
        });
        self.subscriptions.push(names::USER_REGISTERED, id);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        self.subscriptions.release(&self.events);
        Ok(())
    }

    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        let health = self.queue.health_check().await?;
        let queue = health.queues.get(QUEUE);
        Ok(Some(ModuleHealth {
            healthy: !health.closed && queue.is_none_or(|q| q.healthy),
            details: queue.map(|q| json!({ "waiting": q.waiting })),
        }))
    }
}
