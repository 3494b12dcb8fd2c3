//! 模块生命周期编排：注册、依赖解析、顺序初始化、逆序关停与模块健康汇总

mod descriptor;
mod error;
mod manager;
mod registry;
mod resolver;

pub use descriptor::{
    Module, ModuleDescriptor, ModuleHealth, module_enabled, module_enabled_with, toggle_var,
};
pub use error::{LifecycleError, ModuleError};
pub use manager::{
    ManagerOptions, ModuleHealthEntry, ModuleHealthStatus, ModuleManager, ModuleState,
    ModulesHealthReport, ShutdownReport,
};
pub use registry::ModuleRegistry;
pub use resolver::{DependencyPolicy, resolve_order};
