//! 健康聚合：并发执行各子检查，按升级策略得出整体结论

mod aggregator;
pub mod metrics;
mod policy;
pub mod probes;
mod system;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use aggregator::{AggregatorOptions, HealthAggregator, ReadinessReport};
pub use metrics::{LiveMetrics, LiveMetricsSnapshot, request_metrics_middleware};
pub use policy::{Escalation, EscalationPolicy};
pub use probes::{HealthProbe, ProbeReport};
pub use system::{SystemCollector, SystemMetrics};

/// 子检查名
pub mod checks {
    pub const DATABASE: &str = "database";
    pub const CACHE: &str = "cache";
    pub const QUEUE: &str = "queue";
    pub const SEARCH: &str = "search";
    pub const MODULES: &str = "modules";
    pub const EXTERNAL_SERVICES: &str = "external_services";

    pub const ALL: [&str; 6] = [DATABASE, CACHE, QUEUE, SEARCH, MODULES, EXTERNAL_SERVICES];
}

/// 健康状态（按严重程度排序）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }
}

/// 单个子检查的结果
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub detail: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 检查耗时（毫秒）
    #[serde(rename = "responseTime")]
    pub response_time_ms: u64,
}

impl CheckResult {
    pub fn unhealthy(error: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: None,
            error: Some(error.into()),
            response_time_ms,
        }
    }
}

/// 某一时刻的整体健康快照
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    /// RFC 3339 时间戳
    pub timestamp: String,
    /// 进程已运行秒数
    pub uptime: u64,
    pub version: String,
    pub checks: BTreeMap<String, CheckResult>,
    pub system: SystemMetrics,
}
