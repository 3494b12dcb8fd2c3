//! 业务模块与对外接口

pub mod analytics;
pub mod auth;
pub mod billing;
pub mod catalog;
pub mod email_marketing;
pub mod health;
pub mod notifications;
pub mod ticketing;
pub mod user;

use std::sync::Mutex;

use crate::events::{EventBus, HandlerId};

/// 模块在事件总线上注册的处理器，关停时统一注销
#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    ids: Mutex<Vec<(&'static str, HandlerId)>>,
}

impl Subscriptions {
    pub(crate) fn push(&self, event: &'static str, id: HandlerId) {
        match self.ids.lock() {
            Ok(mut g) => g.push((event, id)),
            Err(poisoned) => poisoned.into_inner().push((event, id)),
        }
    }

    /// 注销全部处理器，返回实际移除的数量
    pub(crate) fn release(&self, bus: &EventBus) -> usize {
        let ids = match self.ids.lock() {
            Ok(mut g) => std::mem::take(&mut *g),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        ids.into_iter()
            .filter(|(event, id)| bus.off(event, *id))
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.lock().map(|g| g.len()).unwrap_or(0)
    }
}
