use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CheckResult, HealthStatus, checks};

/// 子检查结果对整体状态的最大影响
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Escalation {
    /// 不影响整体状态
    Ignore,
    /// 最多把整体降为 degraded
    Degraded,
    /// 可以把整体降为 unhealthy
    Unhealthy,
}

impl Escalation {
    fn cap(self) -> HealthStatus {
        match self {
            Escalation::Ignore => HealthStatus::Healthy,
            Escalation::Degraded => HealthStatus::Degraded,
            Escalation::Unhealthy => HealthStatus::Unhealthy,
        }
    }
}

/// 检查名 -> 升级上限
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    rules: BTreeMap<String, Escalation>,
    fallback: Escalation,
}

impl Default for EscalationPolicy {
    /// 核心依赖故障只降级，模块与外部服务故障可以判定为不健康
    fn default() -> Self {
        let rules = [
            (checks::DATABASE, Escalation::Degraded),
            (checks::CACHE, Escalation::Degraded),
            (checks::QUEUE, Escalation::Degraded),
            (checks::SEARCH, Escalation::Ignore),
            (checks::MODULES, Escalation::Unhealthy),
            (checks::EXTERNAL_SERVICES, Escalation::Unhealthy),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            rules,
            fallback: Escalation::Degraded,
        }
    }
}

impl EscalationPolicy {
    /// 在默认表上叠加覆盖项
    pub fn with_overrides<'a, I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Escalation)>,
    {
        let mut policy = Self::default();
        for (name, escalation) in overrides {
            policy.rules.insert(name.clone(), *escalation);
        }
        policy
    }

    pub fn escalation_for(&self, check: &str) -> Escalation {
        self.rules.get(check).copied().unwrap_or(self.fallback)
    }

    /// 从 healthy 出发，每个子检查按其上限截断后取最严重者
    pub fn overall<'a, I>(&self, results: I) -> HealthStatus
    where
        I: IntoIterator<Item = (&'a String, &'a CheckResult)>,
    {
        results
            .into_iter()
            .map(|(name, result)| result.status.min(self.escalation_for(name).cap()))
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}
