//! 进程内事件总线，可选经由缓存频道做跨进程广播
//!
//! 跨进程投递是尽力而为的：没有确认、没有重试，也不保证跨进程的顺序，
//! 消费方需要能容忍重复或丢失的事件。

mod bus;

use thiserror::Error;

use crate::infra::CollaboratorError;

pub use bus::{EventBus, EventEnvelope, HandlerId, PUBLISH_TIMEOUT};

/// 常用领域事件名
pub mod names {
    pub const USER_REGISTERED: &str = "user.registered";
    pub const USER_LOGGED_IN: &str = "user.logged_in";
    pub const USER_LOGGED_OUT: &str = "user.logged_out";
    pub const TICKET_CREATED: &str = "ticket.created";
    pub const SUBSCRIPTION_RENEWED: &str = "billing.subscription_renewed";
}

#[derive(Debug, Error)]
pub enum EventError {
    /// wait_for 在期限内没有等到事件
    #[error("等待事件 {event} 超时（{timeout_ms}ms）")]
    Timeout { event: String, timeout_ms: u64 },

    /// 监听在事件到达前被移除（例如总线被 clear）
    #[error("等待事件 {event} 已取消")]
    Cancelled { event: String },

    /// 处理器返回的失败
    #[error("事件处理失败: {0}")]
    Handler(String),

    #[error("事件序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl EventError {
    pub fn handler(msg: impl Into<String>) -> Self {
        EventError::Handler(msg.into())
    }
}
