/// 统一错误处理模块
pub mod error;

/// 配置模块
pub mod config;

/// 启动检查模块
pub mod startup;

/// 基础设施协作者（数据库、缓存、队列、搜索）
pub mod infra;

/// 模块生命周期：注册、依赖解析、初始化与关闭
pub mod lifecycle;

/// 进程内事件总线与跨进程广播
pub mod events;

/// 健康聚合与实时指标
pub mod health;

/// 功能聚合模块
pub mod features;

/// 应用状态聚合模块
pub mod state;

/// 启动编排与进程上下文
pub mod app;

/// OpenAPI 文档
pub mod openapi;

/// request_id 中间件
pub mod request_id;

/// 优雅退出管理模块
pub mod shutdown;

/// HTTP Client 复用工具
pub mod http;

// 导出常用类型供外部使用
pub use app::{AppContext, BootstrapError, Collaborators, bootstrap};
pub use config::AppConfig;
pub use error::AppError;
pub use events::EventBus;
pub use lifecycle::{ModuleDescriptor, ModuleManager, ModuleRegistry};
pub use shutdown::{ShutdownManager, ShutdownReason};
