//! 用户模块

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::events::{EventBus, names};
use crate::infra::RelationalStore;
use crate::lifecycle::{Module, ModuleError, ModuleHealth};

pub const NAME: &str = "user";

pub struct UserModule {
    store: Arc<dyn RelationalStore>,
    events: EventBus,
}

impl UserModule {
    pub fn new(store: Arc<dyn RelationalStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// 广播新用户注册，返回分配的用户 ID
    pub async fn announce_registration(&self, email: &str) -> String {
        let user_id = Uuid::new_v4().to_string();
        self.events
            .emit(
                names::USER_REGISTERED,
                json!({ "userId": user_id, "email": email }),
            )
            .await;
        user_id
    }
}

#[async_trait]
impl Module for UserModule {
    async fn initialize(&self) -> Result<(), ModuleError> {
        self.store.probe().await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        self.store.probe().await?;
        let health = match self.store.stats() {
            Some(stats) => ModuleHealth::healthy().with_details(json!({ "pool": stats })),
            None => ModuleHealth::healthy(),
        };
        Ok(Some(health))
    }
}
