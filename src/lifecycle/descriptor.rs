use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ModuleError;

/// 模块自检结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleHealth {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ModuleHealth {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            details: None,
        }
    }

    pub fn unhealthy(details: serde_json::Value) -> Self {
        Self {
            healthy: false,
            details: Some(details),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// 可插拔的应用子系统
#[async_trait]
pub trait Module: Send + Sync {
    async fn initialize(&self) -> Result<(), ModuleError>;

    async fn shutdown(&self) -> Result<(), ModuleError>;

    /// 没有自检逻辑的模块返回 `Ok(None)`，初始化后即视为健康
    async fn health_check(&self) -> Result<Option<ModuleHealth>, ModuleError> {
        Ok(None)
    }
}

/// 模块注册信息，注册后不可修改
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub enabled: bool,
    /// 数值越小越先初始化（在依赖约束之内）
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub module: Arc<dyn Module>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, module: Arc<dyn Module>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            priority: 0,
            dependencies: Vec::new(),
            module,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// 模块开关对应的环境变量名，例如 `email_marketing` -> `EMAIL_MARKETING_MODULE_ENABLED`
pub fn toggle_var(name: &str) -> String {
    let upper: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{upper}_MODULE_ENABLED")
}

/// 读取进程环境决定模块是否启用
pub fn module_enabled(name: &str) -> bool {
    module_enabled_with(name, |key| std::env::var(key).ok())
}

/// 只有字面量 `"false"` 会禁用模块，缺省或其它取值一律启用
pub fn module_enabled_with<F>(name: &str, lookup: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&toggle_var(name)).as_deref() != Some("false")
}
