use super::{LifecycleError, ModuleDescriptor};

/// 模块注册表。
///
/// 只允许追加注册，保留注册顺序（解析顺序时作为最后的排序依据）。
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    descriptors: Vec<ModuleDescriptor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<(), LifecycleError> {
        if self.contains(&descriptor.name) {
            return Err(LifecycleError::DuplicateModule(descriptor.name));
        }
        tracing::debug!(
            module = %descriptor.name,
            enabled = descriptor.enabled,
            priority = descriptor.priority,
            "模块已注册"
        );
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.iter().any(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// 按注册顺序遍历
    pub fn descriptors(&self) -> &[ModuleDescriptor] {
        &self.descriptors
    }

    pub fn enabled_names(&self) -> Vec<&str> {
        self.descriptors
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
