//! 各协作者的健康子检查

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;

use super::{HealthStatus, checks};
use crate::config::ExternalServiceConfig;
use crate::infra::{
    CacheClient, ClusterColor, CollaboratorError, JobQueue, RelationalStore, SearchIndex,
};
use crate::lifecycle::ModuleManager;

/// 子检查给出的原始结论
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub status: HealthStatus,
    pub detail: Option<serde_json::Value>,
}

impl ProbeReport {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    pub fn with_detail(status: HealthStatus, detail: serde_json::Value) -> Self {
        Self {
            status,
            detail: Some(detail),
        }
    }
}

/// 健康子检查。返回 `Err` 视为 unhealthy。
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    /// 返回 false 时该检查不出现在快照中
    fn is_available(&self) -> bool {
        true
    }

    async fn probe(&self) -> Result<ProbeReport, CollaboratorError>;
}

pub struct StoreProbe {
    store: Arc<dyn RelationalStore>,
}

impl StoreProbe {
    pub fn new(store: Arc<dyn RelationalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthProbe for StoreProbe {
    fn name(&self) -> &str {
        checks::DATABASE
    }

    async fn probe(&self) -> Result<ProbeReport, CollaboratorError> {
        self.store.probe().await?;
        Ok(match self.store.stats() {
            Some(stats) => ProbeReport::with_detail(HealthStatus::Healthy, json!({ "pool": stats })),
            None => ProbeReport::healthy(),
        })
    }
}

pub struct CacheProbe {
    cache: Arc<dyn CacheClient>,
}

impl CacheProbe {
    pub fn new(cache: Arc<dyn CacheClient>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HealthProbe for CacheProbe {
    fn name(&self) -> &str {
        checks::CACHE
    }

    async fn probe(&self) -> Result<ProbeReport, CollaboratorError> {
        self.cache.ping().await?;
        // INFO 只用于展示，失败不影响结论
        let detail = match self.cache.info().await {
            Ok(info) => serde_json::to_value(info)?,
            Err(e) => json!({ "infoError": e.to_string() }),
        };
        Ok(ProbeReport::with_detail(HealthStatus::Healthy, detail))
    }
}

pub struct QueueProbe {
    queue: Arc<dyn JobQueue>,
}

impl QueueProbe {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl HealthProbe for QueueProbe {
    fn name(&self) -> &str {
        checks::QUEUE
    }

    async fn probe(&self) -> Result<ProbeReport, CollaboratorError> {
        let health = self.queue.health_check().await?;
        let status = if health.closed {
            HealthStatus::Unhealthy
        } else if health.queues.values().any(|q| !q.healthy) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Ok(ProbeReport::with_detail(status, serde_json::to_value(health)?))
    }
}

pub struct SearchProbe {
    index: Arc<dyn SearchIndex>,
}

impl SearchProbe {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl HealthProbe for SearchProbe {
    fn name(&self) -> &str {
        checks::SEARCH
    }

    fn is_available(&self) -> bool {
        self.index.is_connected()
    }

    async fn probe(&self) -> Result<ProbeReport, CollaboratorError> {
        let health = self.index.cluster_health().await?;
        let status = match health.status {
            ClusterColor::Green => HealthStatus::Healthy,
            ClusterColor::Yellow => HealthStatus::Degraded,
            ClusterColor::Red => HealthStatus::Unhealthy,
        };
        Ok(ProbeReport::with_detail(status, serde_json::to_value(health)?))
    }
}

pub struct ModulesProbe {
    manager: Arc<ModuleManager>,
}

impl ModulesProbe {
    pub fn new(manager: Arc<ModuleManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl HealthProbe for ModulesProbe {
    fn name(&self) -> &str {
        checks::MODULES
    }

    async fn probe(&self) -> Result<ProbeReport, CollaboratorError> {
        let report = self.manager.health_check().await;
        let status = if report.healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Ok(ProbeReport::with_detail(status, serde_json::to_value(report)?))
    }
}

/// 配置中的外部 HTTP 服务，并发探测
pub struct ExternalServicesProbe {
    services: Vec<ExternalServiceConfig>,
    timeout: Duration,
}

impl ExternalServicesProbe {
    pub fn new(services: Vec<ExternalServiceConfig>, timeout: Duration) -> Self {
        Self { services, timeout }
    }

    async fn check(
        &self,
        client: &reqwest::Client,
        service: &ExternalServiceConfig,
    ) -> (bool, serde_json::Value) {
        let started = std::time::Instant::now();
        let result = client.get(&service.url).timeout(self.timeout).send().await;
        let elapsed = started.elapsed().as_millis() as u64;
        match result {
            Ok(resp) if resp.status().is_success() => (
                true,
                json!({ "status": "up", "statusCode": resp.status().as_u16(), "responseTime": elapsed }),
            ),
            Ok(resp) => (
                false,
                json!({ "status": "down", "statusCode": resp.status().as_u16(), "responseTime": elapsed }),
            ),
            Err(e) => (
                false,
                json!({ "status": "down", "error": e.to_string(), "responseTime": elapsed }),
            ),
        }
    }
}

#[async_trait]
impl HealthProbe for ExternalServicesProbe {
    fn name(&self) -> &str {
        checks::EXTERNAL_SERVICES
    }

    async fn probe(&self) -> Result<ProbeReport, CollaboratorError> {
        if self.services.is_empty() {
            return Ok(ProbeReport::with_detail(HealthStatus::Healthy, json!({})));
        }
        let client = crate::http::client_default()?;
        let results = join_all(self.services.iter().map(|s| self.check(&client, s))).await;

        let up = results.iter().filter(|(ok, _)| *ok).count();
        let status = if up == results.len() {
            HealthStatus::Healthy
        } else if up == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        let detail: serde_json::Map<String, serde_json::Value> = self
            .services
            .iter()
            .zip(results)
            .map(|(s, (_, v))| (s.name.clone(), v))
            .collect();
        Ok(ProbeReport::with_detail(status, serde_json::Value::Object(detail)))
    }
}
