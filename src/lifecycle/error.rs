use thiserror::Error;

use crate::events::EventError;
use crate::infra::CollaboratorError;

/// 模块钩子（initialize / shutdown / health_check）返回的错误
#[derive(Debug, Error)]
pub enum ModuleError {
    /// 依赖的基础设施调用失败
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// 事件总线错误
    #[error(transparent)]
    Event(#[from] EventError),

    /// 模块自身报告的失败
    #[error("{0}")]
    Failed(String),
}

impl ModuleError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ModuleError::Failed(msg.into())
    }
}

/// 模块编排错误
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// 依赖图存在环；`cycle` 为完整环路（首尾相同）
    #[error("模块 {module} 存在循环依赖: {}", cycle.join(" -> "))]
    CircularDependency { module: String, cycle: Vec<String> },

    /// 依赖了未注册的模块
    #[error("模块 {module} 依赖了未注册的模块 {dependency}")]
    UnknownDependency { module: String, dependency: String },

    /// 严格模式下依赖了被禁用的模块
    #[error("模块 {module} 依赖的模块 {dependency} 已被禁用")]
    DisabledDependency { module: String, dependency: String },

    /// 模块名重复注册
    #[error("模块 {0} 重复注册")]
    DuplicateModule(String),

    /// 模块初始化失败（其后的模块不会再被初始化）
    #[error("模块 {module} 初始化失败: {source}")]
    InitializationFailed {
        module: String,
        #[source]
        source: ModuleError,
    },

    /// 本进程内已执行过 initialize_all
    #[error("模块已启动过，不能重复初始化")]
    AlreadyStarted,
}

impl LifecycleError {
    /// 是否属于启动前即可发现的配置错误
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            LifecycleError::CircularDependency { .. }
                | LifecycleError::UnknownDependency { .. }
                | LifecycleError::DisabledDependency { .. }
                | LifecycleError::DuplicateModule(_)
        )
    }
}
