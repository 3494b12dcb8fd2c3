//! 基于缓存计数器的实时指标
//!
//! 计数器按分钟分桶写入缓存（多实例共享同一个缓存时自然汇总），
//! 健康接口只读取当前分钟的桶。

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::infra::{CacheClient, CollaboratorError};

/// 分钟桶的保留时间
const BUCKET_TTL: Duration = Duration::from_secs(120);

pub const ACTIVE_USERS_KEY: &str = "metrics:active_users";

pub fn minute_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(60)
}

pub fn requests_key(bucket: i64) -> String {
    format!("metrics:requests:{bucket}")
}

pub fn errors_key(bucket: i64) -> String {
    format!("metrics:errors:{bucket}")
}

pub fn response_time_key(bucket: i64) -> String {
    format!("metrics:response_time_ms:{bucket}")
}

#[derive(Debug, Clone, Serialize, PartialEq, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveMetricsSnapshot {
    pub requests_per_minute: u64,
    pub active_users: u64,
    /// 5xx 占比（百分比）
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub timestamp: String,
}

pub struct LiveMetrics {
    cache: Arc<dyn CacheClient>,
}

impl LiveMetrics {
    pub fn new(cache: Arc<dyn CacheClient>) -> Self {
        Self { cache }
    }

    async fn read_counter(&self, key: &str) -> Result<u64, CollaboratorError> {
        Ok(self
            .cache
            .get(key)
            .await?
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map_or(0, |v| v.max(0) as u64))
    }

    /// 读取当前分钟的计数器；不修改任何数据
    pub async fn snapshot(&self) -> Result<LiveMetricsSnapshot, CollaboratorError> {
        let now = Utc::now();
        let bucket = minute_bucket(now);
        let requests = self.read_counter(&requests_key(bucket)).await?;
        let errors = self.read_counter(&errors_key(bucket)).await?;
        let total_ms = self.read_counter(&response_time_key(bucket)).await?;
        let active_users = self.read_counter(ACTIVE_USERS_KEY).await?;

        let (error_rate, avg_response_time_ms) = if requests == 0 {
            (0.0, 0.0)
        } else {
            (
                round2(errors as f64 * 100.0 / requests as f64),
                round2(total_ms as f64 / requests as f64),
            )
        };
        Ok(LiveMetricsSnapshot {
            requests_per_minute: requests,
            active_users,
            error_rate,
            avg_response_time_ms,
            timestamp: now.to_rfc3339(),
        })
    }

    /// 记录一次请求
    pub async fn record_request(
        &self,
        is_error: bool,
        elapsed: Duration,
    ) -> Result<(), CollaboratorError> {
        let bucket = minute_bucket(Utc::now());
        let ttl = Some(BUCKET_TTL);
        self.cache.incr_by(&requests_key(bucket), 1, ttl).await?;
        self.cache
            .incr_by(
                &response_time_key(bucket),
                i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX),
                ttl,
            )
            .await?;
        if is_error {
            self.cache.incr_by(&errors_key(bucket), 1, ttl).await?;
        }
        Ok(())
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// 采集中间件：按分钟累计请求数、5xx 数与耗时。健康探针本身不计入。
pub async fn request_metrics_middleware(
    State(metrics): State<Arc<LiveMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path().starts_with("/health") {
        return next.run(req).await;
    }

    let started = Instant::now();
    let res = next.run(req).await;
    let is_error = res.status().is_server_error();
    let elapsed = started.elapsed();

    // 异步上报（不阻塞）
    tokio::spawn(async move {
        if let Err(e) = metrics.record_request(is_error, elapsed).await {
            tracing::debug!("请求指标写入失败: {}", e);
        }
    });

    res
}
