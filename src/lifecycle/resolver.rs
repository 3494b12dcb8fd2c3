//! 模块依赖解析（DFS 三色标记拓扑排序）

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{LifecycleError, ModuleDescriptor};

/// 启用的模块依赖了被禁用的模块时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPolicy {
    /// 视为配置错误
    #[default]
    Strict,
    /// 记录警告并跳过该依赖
    Permissive,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

struct Resolver<'a> {
    descriptors: &'a [ModuleDescriptor],
    index: HashMap<&'a str, usize>,
    marks: Vec<Mark>,
    stack: Vec<usize>,
    order: Vec<String>,
    policy: DependencyPolicy,
}

impl<'a> Resolver<'a> {
    fn key(&self, idx: usize) -> (i32, usize) {
        (self.descriptors[idx].priority, idx)
    }

    /// 依赖按 (priority, 注册序号) 排序，未知依赖直接报错
    fn sorted_dependencies(&self, idx: usize) -> Result<Vec<usize>, LifecycleError> {
        let module = &self.descriptors[idx];
        let mut deps = Vec::with_capacity(module.dependencies.len());
        for dep in &module.dependencies {
            let Some(&dep_idx) = self.index.get(dep.as_str()) else {
                return Err(LifecycleError::UnknownDependency {
                    module: module.name.clone(),
                    dependency: dep.clone(),
                });
            };
            if !self.descriptors[dep_idx].enabled {
                match self.policy {
                    DependencyPolicy::Strict => {
                        return Err(LifecycleError::DisabledDependency {
                            module: module.name.clone(),
                            dependency: dep.clone(),
                        });
                    }
                    DependencyPolicy::Permissive => {
                        tracing::warn!(
                            module = %module.name,
                            dependency = %dep,
                            "依赖的模块已禁用，跳过该依赖"
                        );
                        continue;
                    }
                }
            }
            if !deps.contains(&dep_idx) {
                deps.push(dep_idx);
            }
        }
        deps.sort_by_key(|&d| self.key(d));
        Ok(deps)
    }

    fn visit(&mut self, idx: usize) -> Result<(), LifecycleError> {
        match self.marks[idx] {
            Mark::Black => return Ok(()),
            Mark::Gray => {
                let start = self.stack.iter().position(|&i| i == idx).unwrap_or(0);
                let mut cycle: Vec<String> = self.stack[start..]
                    .iter()
                    .map(|&i| self.descriptors[i].name.clone())
                    .collect();
                cycle.push(self.descriptors[idx].name.clone());
                return Err(LifecycleError::CircularDependency {
                    module: self.descriptors[idx].name.clone(),
                    cycle,
                });
            }
            Mark::White => {}
        }

        self.marks[idx] = Mark::Gray;
        self.stack.push(idx);
        for dep in self.sorted_dependencies(idx)? {
            self.visit(dep)?;
        }
        self.stack.pop();
        self.marks[idx] = Mark::Black;
        self.order.push(self.descriptors[idx].name.clone());
        Ok(())
    }
}

/// 计算启用模块的初始化顺序。
///
/// 每个依赖都排在依赖它的模块之前；同等约束下按 (priority, 注册序号) 升序。
/// 出错时不返回任何部分结果。
pub fn resolve_order(
    descriptors: &[ModuleDescriptor],
    policy: DependencyPolicy,
) -> Result<Vec<String>, LifecycleError> {
    let mut index = HashMap::with_capacity(descriptors.len());
    for (i, d) in descriptors.iter().enumerate() {
        if index.insert(d.name.as_str(), i).is_some() {
            return Err(LifecycleError::DuplicateModule(d.name.clone()));
        }
    }

    let mut resolver = Resolver {
        descriptors,
        index,
        marks: vec![Mark::White; descriptors.len()],
        stack: Vec::new(),
        order: Vec::with_capacity(descriptors.len()),
        policy,
    };

    let mut candidates: Vec<usize> = (0..descriptors.len())
        .filter(|&i| descriptors[i].enabled)
        .collect();
    candidates.sort_by_key(|&i| resolver.key(i));

    for idx in candidates {
        resolver.visit(idx)?;
    }
    Ok(resolver.order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Module, ModuleError};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl Module for Noop {
        async fn initialize(&self) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn module(name: &str, priority: i32, deps: &[&str]) -> ModuleDescriptor {
        ModuleDescriptor::new(name, Arc::new(Noop))
            .priority(priority)
            .depends_on(deps.iter().copied())
    }

    #[test]
    fn disabled_leaf_is_excluded() {
        let descriptors = vec![
            module("auth", 100, &[]),
            module("user", 110, &["auth"]),
            module("billing", 210, &["auth", "user"]).enabled(false),
        ];
        let order = resolve_order(&descriptors, DependencyPolicy::Strict).expect("order");
        assert_eq!(order, vec!["auth", "user"]);
    }

    #[test]
    fn dependencies_win_over_priority() {
        let descriptors = vec![
            module("reports", 1, &["store"]),
            module("store", 50, &[]),
            module("cache", 10, &[]),
        ];
        let order = resolve_order(&descriptors, DependencyPolicy::Strict).expect("order");
        assert_eq!(order, vec!["store", "reports", "cache"]);
    }

    #[test]
    fn equal_priority_falls_back_to_registration_order() {
        let descriptors = vec![module("b", 1, &[]), module("a", 1, &[]), module("c", 0, &[])];
        let order = resolve_order(&descriptors, DependencyPolicy::Strict).expect("order");
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn cycle_reports_full_path() {
        let descriptors = vec![
            module("a", 1, &["b"]),
            module("b", 2, &["c"]),
            module("c", 3, &["a"]),
        ];
        let err = resolve_order(&descriptors, DependencyPolicy::Strict).expect_err("cycle");
        match err {
            LifecycleError::CircularDependency { module, cycle } => {
                assert_eq!(module, "a");
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let descriptors = vec![module("a", 1, &["a"])];
        let err = resolve_order(&descriptors, DependencyPolicy::Strict).expect_err("cycle");
        assert!(matches!(err, LifecycleError::CircularDependency { ref cycle, .. } if cycle.len() == 2));
    }

    #[test]
    fn unknown_dependency_is_fatal_in_both_policies() {
        let descriptors = vec![module("a", 1, &["ghost"])];
        for policy in [DependencyPolicy::Strict, DependencyPolicy::Permissive] {
            let err = resolve_order(&descriptors, policy).expect_err("unknown");
            assert!(matches!(
                err,
                LifecycleError::UnknownDependency { ref module, ref dependency }
                    if module == "a" && dependency == "ghost"
            ));
        }
    }

    #[test]
    fn disabled_dependency_follows_policy() {
        let descriptors = vec![
            module("auth", 1, &[]).enabled(false),
            module("user", 2, &["auth"]),
        ];
        let err = resolve_order(&descriptors, DependencyPolicy::Strict).expect_err("strict");
        assert!(matches!(err, LifecycleError::DisabledDependency { .. }));

        let order = resolve_order(&descriptors, DependencyPolicy::Permissive).expect("permissive");
        assert_eq!(order, vec!["user"]);
    }

    #[test]
    fn unknown_dependency_of_disabled_module_is_ignored() {
        let descriptors = vec![module("a", 1, &[]), module("b", 2, &["ghost"]).enabled(false)];
        let order = resolve_order(&descriptors, DependencyPolicy::Strict).expect("order");
        assert_eq!(order, vec!["a"]);
    }
}
