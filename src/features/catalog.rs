//! 模块目录：集中声明全部业务模块的优先级与依赖，并注入协作者

use std::sync::Arc;

use crate::events::EventBus;
use crate::infra::{CacheClient, JobQueue, RelationalStore};
use crate::lifecycle::{LifecycleError, Module, ModuleDescriptor, ModuleRegistry, module_enabled};

use super::{
    analytics::{self, AnalyticsModule},
    auth::{self, AuthModule},
    billing::{self, BillingModule},
    email_marketing::{self, EmailMarketingModule},
    notifications::{self, NotificationsModule},
    ticketing::{self, TicketingModule},
    user::{self, UserModule},
};

/// 业务模块可用的协作者
#[derive(Clone)]
pub struct ModuleDeps {
    pub store: Arc<dyn RelationalStore>,
    pub cache: Arc<dyn CacheClient>,
    pub queue: Arc<dyn JobQueue>,
    pub events: EventBus,
}

/// (名称, 优先级, 依赖)
pub const MODULES: [(&str, i32, &[&str]); 7] = [
    (auth::NAME, 100, &[]),
    (user::NAME, 110, &[auth::NAME]),
    (notifications::NAME, 150, &[user::NAME]),
    (billing::NAME, 210, &[auth::NAME, user::NAME]),
    (ticketing::NAME, 220, &[user::NAME, notifications::NAME]),
    (analytics::NAME, 300, &[user::NAME]),
    (email_marketing::NAME, 310, &[user::NAME, notifications::NAME]),
];

fn instantiate(name: &str, deps: &ModuleDeps) -> Option<Arc<dyn Module>> {
    let module: Arc<dyn Module> = match name {
        auth::NAME => Arc::new(AuthModule::new(deps.cache.clone(), deps.events.clone())),
        user::NAME => Arc::new(UserModule::new(deps.store.clone(), deps.events.clone())),
        notifications::NAME => Arc::new(NotificationsModule::new(
            deps.queue.clone(),
            deps.events.clone(),
        )),
        billing::NAME => Arc::new(BillingModule::new(deps.queue.clone())),
        ticketing::NAME => Arc::new(TicketingModule::new(
            deps.queue.clone(),
            deps.events.clone(),
        )),
        analytics::NAME => Arc::new(AnalyticsModule::new(
            deps.cache.clone(),
            deps.queue.clone(),
            deps.events.clone(),
        )),
        email_marketing::NAME => Arc::new(EmailMarketingModule::new(
            deps.queue.clone(),
            deps.events.clone(),
        )),
        _ => return None,
    };
    Some(module)
}

/// 按给定的开关函数构建注册表
pub fn build_registry_with<F>(deps: &ModuleDeps, enabled: F) -> Result<ModuleRegistry, LifecycleError>
where
    F: Fn(&str) -> bool,
{
    let mut registry = ModuleRegistry::new();
    for (name, priority, dependencies) in MODULES {
        let Some(module) = instantiate(name, deps) else {
            continue;
        };
        let is_enabled = enabled(name);
        if !is_enabled {
            tracing::info!(module = name, "模块已通过环境变量禁用");
        }
        registry.register(
            ModuleDescriptor::new(name, module)
                .priority(priority)
                .depends_on(dependencies.iter().copied())
                .enabled(is_enabled),
        )?;
    }
    Ok(registry)
}

/// 读取 `<MODULE>_MODULE_ENABLED` 环境变量构建注册表
pub fn build_registry(deps: &ModuleDeps) -> Result<ModuleRegistry, LifecycleError> {
    build_registry_with(deps, module_enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::infra::{MemoryCache, MemoryQueue, SqliteStore};
    use crate::lifecycle::{DependencyPolicy, resolve_order};
    use std::time::Duration;

    fn deps() -> ModuleDeps {
        ModuleDeps {
            store: Arc::new(SqliteStore::new(DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                wal: false,
                ..DatabaseConfig::default()
            })),
            cache: Arc::new(MemoryCache::default()),
            queue: Arc::new(MemoryQueue::default()),
            events: EventBus::local(Duration::from_secs(1)),
        }
    }

    #[test]
    fn catalog_resolves_in_dependency_order() {
        let registry = build_registry_with(&deps(), |_| true).expect("registry");
        assert_eq!(registry.len(), MODULES.len());
        let order = resolve_order(registry.descriptors(), DependencyPolicy::Strict).expect("order");
        assert_eq!(
            order,
            vec![
                "auth",
                "user",
                "notifications",
                "billing",
                "ticketing",
                "analytics",
                "email_marketing"
            ]
        );
    }

    #[test]
    fn disabling_a_leaf_keeps_the_rest() {
        let registry =
            build_registry_with(&deps(), |name| name != email_marketing::NAME).expect("registry");
        let order = resolve_order(registry.descriptors(), DependencyPolicy::Strict).expect("order");
        assert_eq!(order.len(), 6);
        assert!(!order.iter().any(|m| m == email_marketing::NAME));
    }

    #[test]
    fn disabling_a_shared_dependency_is_rejected_in_strict_mode() {
        let registry =
            build_registry_with(&deps(), |name| name != notifications::NAME).expect("registry");
        let err = resolve_order(registry.descriptors(), DependencyPolicy::Strict)
            .expect_err("disabled dependency");
        assert!(matches!(err, LifecycleError::DisabledDependency { .. }));
    }
}
