//! 工单模块

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::events::{EventBus, names};
use crate::infra::{JobOptions, JobQueue};
use crate::lifecycle::{Module, ModuleError, ModuleHealth};

pub const NAME: &str = "ticketing";
pub const QUEUE: &str = "ticketing";
pub const SLA_JOB: &str = "sla-escalation";
/// 每 15 分钟检查一次超时工单
const SLA_CRON: &str = "*/15 * * * *";

pub struct TicketingModule {
    queue: Arc<dyn JobQueue>,
    events: EventBus,
}

impl TicketingModule {
    pub fn new(queue: Arc<dyn JobQueue>, events: EventBus) -> Self {
        Self { queue, events }
    }

    /// 广播新工单，返回工单 ID
    pub async fn open_ticket(&self, user_id: &str, subject: &str) -> String {
        let ticket_id = Uuid::new_v4().to_string();
        self.events
            .emit(
                names::TICKET_CREATED,
                json!({ "ticketId": ticket_id, "userId": user_id, "subject": subject }),
            )
            .await;
        ticket_id
    }
}

#[async_trait]
impl Module for TicketingModule {
    async fn initialize(&self) -> Result<(), ModuleError> {
        self.queue
            .add_job(QUEUE, SLA_JOB, json!({}), JobOptions::repeat(SLA_CRON))
            .await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        let health = self.queue.health_check().await?;
        Ok(Some(ModuleHealth {
            healthy: !health.closed,
            details: None,
        }))
    }
}
