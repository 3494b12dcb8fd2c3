use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use moka::future::Cache;
use serde::Serialize;

use super::{
    CheckResult, EscalationPolicy, HealthProbe, HealthSnapshot, HealthStatus, SystemCollector,
    checks,
};
use crate::config::HealthConfig;

const SNAPSHOT_KEY: &str = "snapshot";

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub check_timeout: Duration,
    pub slow_threshold: Duration,
    /// 为零时不缓存快照
    pub cache_ttl: Duration,
    pub policy: EscalationPolicy,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}

impl AggregatorOptions {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            check_timeout: config.check_timeout(),
            slow_threshold: config.slow_threshold(),
            cache_ttl: config.cache_ttl(),
            policy: EscalationPolicy::with_overrides(&config.escalation),
        }
    }
}

/// 就绪探针结果
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ReadinessReport {
    pub ready: bool,
    pub checks: BTreeMap<String, CheckResult>,
}

/// 健康聚合器。
///
/// 每个子检查在独立任务中执行并受超时约束，出错、panic 或超时都转换为
/// unhealthy 结果，聚合本身永远产出快照。
pub struct HealthAggregator {
    probes: Vec<Arc<dyn HealthProbe>>,
    options: AggregatorOptions,
    system: SystemCollector,
    started_at: Instant,
    snapshots: Option<Cache<&'static str, Arc<HealthSnapshot>>>,
}

impl HealthAggregator {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>, options: AggregatorOptions) -> Self {
        let snapshots = (!options.cache_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(1)
                .time_to_live(options.cache_ttl)
                .build()
        });
        Self {
            probes,
            options,
            system: SystemCollector::new(),
            started_at: Instant::now(),
            snapshots,
        }
    }

    /// 进程启动时刻（用于计算 uptime）
    pub fn with_started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.name()).collect()
    }

    async fn run_probe(&self, probe: Arc<dyn HealthProbe>) -> CheckResult {
        let started = Instant::now();
        let name = probe.name().to_string();
        let mut handle = tokio::spawn(async move { probe.probe().await });
        let outcome = tokio::time::timeout(self.options.check_timeout, &mut handle).await;
        let elapsed = started.elapsed();
        let response_time_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(Ok(Ok(report))) => {
                let mut result = CheckResult {
                    status: report.status,
                    detail: report.detail,
                    error: None,
                    response_time_ms,
                };
                if result.status == HealthStatus::Healthy && elapsed > self.options.slow_threshold
                {
                    tracing::debug!(check = %name, response_time_ms, "子检查响应缓慢，降级为 degraded");
                    result.status = HealthStatus::Degraded;
                }
                result
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(check = %name, "健康检查失败: {}", e);
                CheckResult::unhealthy(e.to_string(), response_time_ms)
            }
            Ok(Err(join_err)) => {
                tracing::error!(check = %name, "健康检查任务异常退出: {}", join_err);
                CheckResult::unhealthy(format!("检查任务异常退出: {join_err}"), response_time_ms)
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(check = %name, "健康检查超时");
                CheckResult::unhealthy(
                    format!("检查超时（{}ms）", self.options.check_timeout.as_millis()),
                    response_time_ms,
                )
            }
        }
    }

    async fn run_all<'a, I>(&self, probes: I) -> BTreeMap<String, CheckResult>
    where
        I: IntoIterator<Item = &'a Arc<dyn HealthProbe>>,
    {
        let selected: Vec<Arc<dyn HealthProbe>> = probes
            .into_iter()
            .filter(|p| p.is_available())
            .cloned()
            .collect();
        let names: Vec<String> = selected.iter().map(|p| p.name().to_string()).collect();
        let results = join_all(selected.into_iter().map(|p| self.run_probe(p))).await;
        names.into_iter().zip(results).collect()
    }

    async fn compute(&self) -> HealthSnapshot {
        let (checks, system) = tokio::join!(self.run_all(&self.probes), self.system.collect());
        let status = self.options.policy.overall(&checks);
        if !status.is_healthy() {
            let failing: Vec<&str> = checks
                .iter()
                .filter(|(_, r)| !r.status.is_healthy())
                .map(|(n, _)| n.as_str())
                .collect();
            tracing::warn!(?status, failing = ?failing, "健康检查未通过");
        }
        HealthSnapshot {
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime: self.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks,
            system,
        }
    }

    /// 完整快照（短时间内重复请求复用缓存结果）
    pub async fn snapshot(&self) -> HealthSnapshot {
        match &self.snapshots {
            Some(cache) => {
                let snap = cache
                    .get_with(SNAPSHOT_KEY, async { Arc::new(self.compute().await) })
                    .await;
                (*snap).clone()
            }
            None => self.compute().await,
        }
    }

    /// 单项检查；未知名称返回 None
    pub async fn check_one(&self, name: &str) -> Option<CheckResult> {
        let probe = self.probes.iter().find(|p| p.name() == name)?;
        if !probe.is_available() {
            return Some(CheckResult::unhealthy("未连接", 0));
        }
        Some(self.run_probe(Arc::clone(probe)).await)
    }

    /// 就绪：数据库与缓存都必须为 healthy
    pub async fn readiness(&self) -> ReadinessReport {
        let critical = [checks::DATABASE, checks::CACHE];
        let results = self
            .run_all(
                self.probes
                    .iter()
                    .filter(|p| critical.iter().any(|c| *c == p.name())),
            )
            .await;
        let ready = critical
            .iter()
            .all(|name| results.get(*name).is_some_and(|r| r.status.is_healthy()));
        ReadinessReport {
            ready,
            checks: results,
        }
    }
}
