//! 计费模块：登记续费周期任务

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::infra::{JobOptions, JobQueue};
use crate::lifecycle::{Module, ModuleError, ModuleHealth};

pub const NAME: &str = "billing";
pub const QUEUE: &str = "billing";
pub const RENEWALS_JOB: &str = "process-renewals";
/// 每天 02:00
const RENEWALS_CRON: &str = "0 2 * * *";

pub struct BillingModule {
    queue: Arc<dyn JobQueue>,
}

impl BillingModule {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Module for BillingModule {
    async fn initialize(&self) -> Result<(), ModuleError> {
        self.queue
            .add_job(
                QUEUE,
                RENEWALS_JOB,
                json!({}),
                JobOptions::repeat(RENEWALS_CRON),
            )
            .await?;
        tracing::info!(module = NAME, cron = RENEWALS_CRON, "续费任务已登记");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        let health = self.queue.health_check().await?;
        let queue = health.queues.get(QUEUE);
        Ok(Some(ModuleHealth {
            healthy: !health.closed && queue.is_some_and(|q| q.healthy && q.repeatable > 0),
            details: queue.map(|q| json!({ "repeatable": q.repeatable, "waiting": q.waiting })),
        }))
    }
}
