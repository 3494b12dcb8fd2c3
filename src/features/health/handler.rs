use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;

use crate::error::AppError;
use crate::health::{CheckResult, HealthSnapshot, LiveMetricsSnapshot};
use crate::lifecycle::{ModuleState, ModulesHealthReport};
use crate::state::AppState;

/// 存活探针响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LivenessResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub timestamp: String,
}

/// 就绪探针响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReadinessResponse {
    /// ready / not_ready
    #[schema(example = "ready")]
    pub status: String,
    pub checks: BTreeMap<String, CheckResult>,
}

/// 模块状态响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ModulesResponse {
    pub modules: ModulesHealthReport,
    /// 实际初始化顺序
    pub initialized: Vec<String>,
    pub states: BTreeMap<String, ModuleState>,
}

/// 单项检查响应
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ServiceHealthResponse {
    #[schema(example = "database")]
    pub name: String,
    #[serde(flatten)]
    pub check: CheckResult,
}

fn status_for(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[utoipa::path(
    get,
    path = "/health/live",
    summary = "存活探针",
    description = "进程能响应请求即返回 200。",
    responses((status = 200, description = "进程存活", body = LivenessResponse)),
    tag = "Health"
)]
pub async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[utoipa::path(
    get,
    path = "/health/ready",
    summary = "就绪探针",
    description = "数据库与缓存均健康时返回 200，否则 503。",
    responses(
        (status = 200, description = "可以接收流量", body = ReadinessResponse),
        (status = 503, description = "关键依赖未就绪", body = ReadinessResponse)
    ),
    tag = "Health"
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let report = state.health.readiness().await;
    let status = if report.ready { "ready" } else { "not_ready" };
    (
        status_for(report.ready),
        Json(ReadinessResponse {
            status: status.to_string(),
            checks: report.checks,
        }),
    )
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "完整健康快照",
    description = "并发执行全部子检查并按升级策略给出整体状态；整体 healthy 时返回 200，否则 503。",
    responses(
        (status = 200, description = "整体健康", body = HealthSnapshot),
        (status = 503, description = "降级或不健康", body = HealthSnapshot)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthSnapshot>) {
    let snapshot = state.health.snapshot().await;
    (status_for(snapshot.status.is_healthy()), Json(snapshot))
}

#[utoipa::path(
    get,
    path = "/health/modules",
    summary = "模块状态",
    responses((status = 200, description = "模块健康与初始化顺序", body = ModulesResponse)),
    tag = "Health"
)]
pub async fn modules(State(state): State<AppState>) -> Json<ModulesResponse> {
    let modules = state.modules.health_check().await;
    Json(ModulesResponse {
        modules,
        initialized: state.modules.initialized_modules(),
        states: state.modules.module_states(),
    })
}

#[utoipa::path(
    get,
    path = "/health/services/{name}",
    summary = "单项检查",
    params(("name" = String, Path, description = "检查名，例如 database、cache、queue")),
    responses(
        (status = 200, description = "该项健康", body = ServiceHealthResponse),
        (status = 503, description = "该项降级或不健康", body = ServiceHealthResponse),
        (status = 404, description = "未知检查名", body = crate::error::ProblemDetails, content_type = "application/problem+json")
    ),
    tag = "Health"
)]
pub async fn service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<ServiceHealthResponse>), AppError> {
    let check = state
        .health
        .check_one(&name)
        .await
        .ok_or_else(|| AppError::NotFound(format!("未知的检查项 {name}")))?;
    Ok((
        status_for(check.status.is_healthy()),
        Json(ServiceHealthResponse { name, check }),
    ))
}

#[utoipa::path(
    get,
    path = "/health/metrics",
    summary = "实时指标",
    description = "当前分钟的请求数、错误率、平均耗时与在线用户数。",
    responses(
        (status = 200, description = "指标快照", body = LiveMetricsSnapshot),
        (status = 503, description = "缓存不可用", body = crate::error::ProblemDetails, content_type = "application/problem+json")
    ),
    tag = "Health"
)]
pub async fn live_metrics(
    State(state): State<AppState>,
) -> Result<Json<LiveMetricsSnapshot>, AppError> {
    let snapshot = state.live_metrics.snapshot().await?;
    Ok(Json(snapshot))
}
