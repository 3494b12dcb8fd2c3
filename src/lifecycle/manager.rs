use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::time::timeout;

use super::{
    DependencyPolicy, LifecycleError, ModuleDescriptor, ModuleRegistry, resolve_order,
};

/// 模块状态机：registered -> (skipped) -> initializing -> initialized -> shutting_down -> shut_down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Registered,
    Skipped,
    Initializing,
    Initialized,
    Failed,
    ShuttingDown,
    ShutDown,
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub dependency_policy: DependencyPolicy,
    /// 单个模块 health_check 的超时
    pub health_timeout: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            dependency_policy: DependencyPolicy::Strict,
            health_timeout: Duration::from_secs(3),
        }
    }
}

/// 关停结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// 成功关停的模块（按关停顺序）
    pub stopped: Vec<String>,
    /// 关停失败的模块及错误信息
    pub failed: Vec<(String, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ModuleHealthStatus {
    Healthy,
    Unhealthy,
    Disabled,
    Error,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ModuleHealthEntry {
    pub status: ModuleHealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 全部模块的健康报告
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ModulesHealthReport {
    /// 所有参与上报（非 disabled）的模块都健康时为 true
    pub healthy: bool,
    pub modules: BTreeMap<String, ModuleHealthEntry>,
}

#[derive(Debug, Default)]
struct ManagerState {
    started: bool,
    /// 实际完成初始化的顺序
    realized: Vec<String>,
    states: BTreeMap<String, ModuleState>,
}

/// 模块生命周期管理器。
///
/// initialize_all / shutdown_all 严格串行执行；health_check 只读取状态快照，
/// 可以与它们并发调用。
pub struct ModuleManager {
    registry: ModuleRegistry,
    options: ManagerOptions,
    lifecycle: tokio::sync::Mutex<()>,
    state: Mutex<ManagerState>,
}

impl ModuleManager {
    pub fn new(registry: ModuleRegistry, options: ManagerOptions) -> Self {
        let states = registry
            .descriptors()
            .iter()
            .map(|d| (d.name.clone(), ModuleState::Registered))
            .collect();
        Self {
            registry,
            options,
            lifecycle: tokio::sync::Mutex::new(()),
            state: Mutex::new(ManagerState {
                states,
                ..ManagerState::default()
            }),
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ManagerState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn set_state(&self, name: &str, state: ModuleState) {
        self.with_state(|s| {
            s.states.insert(name.to_string(), state);
        });
    }

    /// 按依赖顺序逐个初始化启用的模块，任一失败立即中止（不回滚）
    pub async fn initialize_all(&self) -> Result<(), LifecycleError> {
        let _guard = self.lifecycle.lock().await;
        if self.with_state(|s| s.started) {
            return Err(LifecycleError::AlreadyStarted);
        }

        let order = resolve_order(self.registry.descriptors(), self.options.dependency_policy)?;
        self.with_state(|s| {
            s.started = true;
            for d in self.registry.descriptors() {
                if !d.enabled {
                    s.states.insert(d.name.clone(), ModuleState::Skipped);
                }
            }
        });
        tracing::info!("模块初始化顺序: {}", order.join(" -> "));

        for name in &order {
            let Some(descriptor) = self.registry.get(name) else {
                continue;
            };
            self.set_state(name, ModuleState::Initializing);
            let started = std::time::Instant::now();
            match descriptor.module.initialize().await {
                Ok(()) => {
                    self.with_state(|s| {
                        s.states.insert(name.clone(), ModuleState::Initialized);
                        s.realized.push(name.clone());
                    });
                    tracing::info!(
                        module = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "模块初始化完成"
                    );
                }
                Err(e) => {
                    self.set_state(name, ModuleState::Failed);
                    tracing::error!(module = %name, "模块初始化失败: {}", e);
                    return Err(LifecycleError::InitializationFailed {
                        module: name.clone(),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }

    /// 按实际初始化顺序的逆序关停；单个模块失败不影响其余模块
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let _guard = self.lifecycle.lock().await;
        let realized = self.with_state(|s| std::mem::take(&mut s.realized));
        let mut report = ShutdownReport::default();

        for name in realized.iter().rev() {
            let Some(descriptor) = self.registry.get(name) else {
                continue;
            };
            self.set_state(name, ModuleState::ShuttingDown);
            match AssertUnwindSafe(descriptor.module.shutdown())
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {
                    tracing::info!(module = %name, "模块已关停");
                    report.stopped.push(name.clone());
                }
                Ok(Err(e)) => {
                    tracing::error!(module = %name, "模块关停失败: {}", e);
                    report.failed.push((name.clone(), e.to_string()));
                }
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    tracing::error!(module = %name, "模块关停时 panic: {}", msg);
                    report.failed.push((name.clone(), format!("panic: {msg}")));
                }
            }
            self.set_state(name, ModuleState::ShutDown);
        }
        report
    }

    /// 汇总每个已注册模块的健康状况。
    ///
    /// 各模块并发检查，整体耗时不超过单个模块的 `health_timeout`。
    pub async fn health_check(&self) -> ModulesHealthReport {
        let initialized: HashSet<String> =
            self.with_state(|s| s.realized.iter().cloned().collect());

        let entries = join_all(self.registry.descriptors().iter().map(|descriptor| {
            let active = descriptor.enabled && initialized.contains(&descriptor.name);
            async move {
                let entry = if active {
                    self.check_module(descriptor).await
                } else {
                    ModuleHealthEntry {
                        status: ModuleHealthStatus::Disabled,
                        details: None,
                        error: None,
                    }
                };
                (descriptor.name.clone(), entry)
            }
        }))
        .await;
        let modules: BTreeMap<String, ModuleHealthEntry> = entries.into_iter().collect();

        let healthy = modules
            .values()
            .filter(|e| e.status != ModuleHealthStatus::Disabled)
            .all(|e| e.status == ModuleHealthStatus::Healthy);
        ModulesHealthReport { healthy, modules }
    }

    async fn check_module(&self, descriptor: &ModuleDescriptor) -> ModuleHealthEntry {
        let check = AssertUnwindSafe(descriptor.module.health_check()).catch_unwind();
        match timeout(self.options.health_timeout, check).await {
            Ok(Ok(Ok(None))) => ModuleHealthEntry {
                status: ModuleHealthStatus::Healthy,
                details: None,
                error: None,
            },
            Ok(Ok(Ok(Some(h)))) => ModuleHealthEntry {
                status: if h.healthy {
                    ModuleHealthStatus::Healthy
                } else {
                    ModuleHealthStatus::Unhealthy
                },
                details: h.details,
                error: None,
            },
            Ok(Ok(Err(e))) => {
                tracing::warn!(module = %descriptor.name, "模块健康检查出错: {}", e);
                ModuleHealthEntry {
                    status: ModuleHealthStatus::Error,
                    details: None,
                    error: Some(e.to_string()),
                }
            }
            Ok(Err(panic)) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(module = %descriptor.name, "模块健康检查 panic: {}", msg);
                ModuleHealthEntry {
                    status: ModuleHealthStatus::Error,
                    details: None,
                    error: Some(format!("panic: {msg}")),
                }
            }
            Err(_) => {
                tracing::warn!(module = %descriptor.name, "模块健康检查超时");
                ModuleHealthEntry {
                    status: ModuleHealthStatus::Error,
                    details: None,
                    error: Some(format!(
                        "健康检查超时（{}ms）",
                        self.options.health_timeout.as_millis()
                    )),
                }
            }
        }
    }

    /// 实际完成初始化的模块（按初始化顺序）
    pub fn initialized_modules(&self) -> Vec<String> {
        self.with_state(|s| s.realized.clone())
    }

    pub fn module_states(&self) -> BTreeMap<String, ModuleState> {
        self.with_state(|s| s.states.clone())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Module, ModuleError, ModuleHealth};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubModule {
        health: Option<Result<ModuleHealth, String>>,
        delay: Duration,
    }

    #[async_trait]
    impl Module for StubModule {
        async fn initialize(&self) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
            tokio::time::sleep(self.delay).await;
            match &self.health {
                None => Ok(None),
                Some(Ok(h)) => Ok(Some(h.clone())),
                Some(Err(e)) => Err(ModuleError::failed(e.clone())),
            }
        }
    }

    fn stub(health: Option<Result<ModuleHealth, String>>) -> Arc<dyn Module> {
        Arc::new(StubModule {
            health,
            delay: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn health_report_covers_every_status() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(ModuleDescriptor::new("plain", stub(None)))
            .expect("register");
        registry
            .register(ModuleDescriptor::new(
                "sick",
                stub(Some(Ok(ModuleHealth::unhealthy(serde_json::json!({"lag": 9}))))),
            ))
            .expect("register");
        registry
            .register(ModuleDescriptor::new("broken", stub(Some(Err("boom".into())))))
            .expect("register");
        registry
            .register(ModuleDescriptor::new("off", stub(None)).enabled(false))
            .expect("register");
        registry
            .register(ModuleDescriptor::new(
                "slow",
                Arc::new(StubModule {
                    health: None,
                    delay: Duration::from_millis(200),
                }),
            ))
            .expect("register");

        let manager = ModuleManager::new(
            registry,
            ManagerOptions {
                health_timeout: Duration::from_millis(20),
                ..ManagerOptions::default()
            },
        );

        let before = manager.health_check().await;
        assert!(before.modules.values().all(|e| e.status == ModuleHealthStatus::Disabled));
        assert!(before.healthy);

        manager.initialize_all().await.expect("init");
        let report = manager.health_check().await;
        assert!(!report.healthy);
        assert_eq!(report.modules["plain"].status, ModuleHealthStatus::Healthy);
        assert_eq!(report.modules["sick"].status, ModuleHealthStatus::Unhealthy);
        assert_eq!(report.modules["sick"].details, Some(serde_json::json!({"lag": 9})));
        assert_eq!(report.modules["broken"].status, ModuleHealthStatus::Error);
        assert_eq!(report.modules["broken"].error.as_deref(), Some("boom"));
        assert_eq!(report.modules["off"].status, ModuleHealthStatus::Disabled);
        assert_eq!(report.modules["slow"].status, ModuleHealthStatus::Error);
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(ModuleDescriptor::new("a", stub(None)))
            .expect("register");
        let manager = ModuleManager::new(registry, ManagerOptions::default());
        manager.initialize_all().await.expect("first");
        let err = manager.initialize_all().await.expect_err("second");
        assert!(matches!(err, LifecycleError::AlreadyStarted));
        assert_eq!(manager.initialized_modules(), vec!["a"]);
    }

    #[tokio::test]
    async fn states_follow_the_lifecycle() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(ModuleDescriptor::new("a", stub(None)))
            .expect("register");
        registry
            .register(ModuleDescriptor::new("b", stub(None)).enabled(false))
            .expect("register");
        let manager = ModuleManager::new(registry, ManagerOptions::default());
        assert_eq!(manager.module_states()["a"], ModuleState::Registered);

        manager.initialize_all().await.expect("init");
        let states = manager.module_states();
        assert_eq!(states["a"], ModuleState::Initialized);
        assert_eq!(states["b"], ModuleState::Skipped);

        let report = manager.shutdown_all().await;
        assert!(report.is_clean());
        assert_eq!(manager.module_states()["a"], ModuleState::ShutDown);
        assert!(manager.initialized_modules().is_empty());
    }

    #[tokio::test]
    async fn configuration_error_does_not_mark_started() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(ModuleDescriptor::new("a", stub(None)).depends_on(["ghost"]))
            .expect("register");
        let manager = ModuleManager::new(registry, ManagerOptions::default());
        let err = manager.initialize_all().await.expect_err("unknown");
        assert!(err.is_configuration_error());
        assert_eq!(manager.module_states()["a"], ModuleState::Registered);
    }

    #[tokio::test]
    async fn hung_modules_are_checked_concurrently() {
        let mut registry = ModuleRegistry::new();
        for name in ["a", "b", "c", "d", "e"] {
            registry
                .register(ModuleDescriptor::new(
                    name,
                    Arc::new(StubModule {
                        health: None,
                        delay: Duration::from_secs(60),
                    }),
                ))
                .expect("register");
        }
        let manager = ModuleManager::new(
            registry,
            ManagerOptions {
                health_timeout: Duration::from_millis(100),
                ..ManagerOptions::default()
            },
        );
        manager.initialize_all().await.expect("init");

        let started = std::time::Instant::now();
        let report = manager.health_check().await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(report.modules.len(), 5);
        assert!(
            report
                .modules
                .values()
                .all(|e| e.status == ModuleHealthStatus::Error && e.error.is_some())
        );
    }
}
