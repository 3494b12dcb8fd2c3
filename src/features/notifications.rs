//! 通知模块：把领域事件转换为通知任务

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::Subscriptions;
use crate::events::{EventBus, names};
use crate::infra::{JobOptions, JobQueue};
use crate::lifecycle::{Module, ModuleError, ModuleHealth};

pub const NAME: &str = "notifications";
pub const QUEUE: &str = "notifications";

pub struct NotificationsModule {
    queue: Arc<dyn JobQueue>,
    events: EventBus,
    subscriptions: Subscriptions,
}

impl NotificationsModule {
    pub fn new(queue: Arc<dyn JobQueue>, events: EventBus) -> Self {
        Self {
            queue,
            events,
            subscriptions: Subscriptions::default(),
        }
    }

    fn forward(&self, event: &'static str, job: &'static str) {
        let queue = Arc::clone(&self.queue);
        let id = self.events.on(event, move |payload| {
            let queue = Arc::clone(&queue);
            async move {
                let options = JobOptions {
                    attempts: Some(3),
                    ..JobOptions::default()
                };
                queue.add_job(QUEUE, job, payload, options).await?;
                Ok(())
            }
        });
        self.subscriptions.push(event, id);
    }
}

#[async_trait]
impl Module for NotificationsModule {
    async fn initialize(&self) -> Result<(), ModuleError> {
        self.forward(names::USER_REGISTERED, "welcome");
        self.forward(names::TICKET_CREATED, "ticket-ack");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        self.subscriptions.release(&self.events);
        Ok(())
    }

    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        let health = self.queue.health_check().await?;
        let queue = health.queues.get(QUEUE);
        let healthy = !health.closed && queue.is_none_or(|q| q.healthy);
        Ok(Some(ModuleHealth {
            healthy,
            details: Some(json!({
                "listeners": self.subscriptions.len(),
                "waiting": queue.map_or(0, |q| q.waiting),
            })),
        }))
    }
}
