use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::infra::CollaboratorError;
use crate::lifecycle::LifecycleError;

/// 应用统一错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 参数或配置校验错误
    #[error("参数校验错误: {0}")]
    Validation(String),

    /// 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 服务暂不可用（依赖未就绪等）
    #[error("服务不可用: {0}")]
    ServiceUnavailable(String),

    /// 内部服务器错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 配置加载错误
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    /// 模块生命周期错误
    #[error("模块生命周期错误: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// 基础设施调用错误
    #[error("依赖服务错误: {0}")]
    Collaborator(#[from] CollaboratorError),
}

/// RFC7807 风格的错误响应（Problem Details）。
#[derive(Debug, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    /// 问题类型（URI）。若无更细分的类型，可使用 about:blank。
    #[serde(rename = "type")]
    #[schema(example = "about:blank")]
    pub type_url: String,

    /// 简短标题，用于概括错误。
    #[schema(example = "Not Found")]
    pub title: String,

    /// HTTP 状态码（与响应 status 一致）。
    #[schema(example = 404)]
    pub status: u16,

    /// 人类可读的详细信息。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// 稳定的错误码，用于程序化处理。
    #[schema(example = "NOT_FOUND")]
    pub code: String,

    /// 请求追踪 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Lifecycle(e) => match e {
                LifecycleError::AlreadyStarted => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Collaborator(e) => match e {
                CollaboratorError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                CollaboratorError::NotConnected(_) | CollaboratorError::Closed(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }

    pub fn stable_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Config(_) => "CONFIG_INVALID",
            AppError::Lifecycle(e) => match e {
                LifecycleError::CircularDependency { .. } => "MODULE_CYCLE",
                LifecycleError::UnknownDependency { .. }
                | LifecycleError::DisabledDependency { .. }
                | LifecycleError::DuplicateModule(_) => "MODULE_CONFIG_INVALID",
                LifecycleError::InitializationFailed { .. } => "MODULE_INIT_FAILED",
                LifecycleError::AlreadyStarted => "MODULES_ALREADY_STARTED",
            },
            AppError::Collaborator(e) => match e {
                CollaboratorError::Timeout => "UPSTREAM_TIMEOUT",
                CollaboratorError::NotConnected(_) | CollaboratorError::Closed(_) => {
                    "DEPENDENCY_UNAVAILABLE"
                }
                _ => "UPSTREAM_ERROR",
            },
        }
    }

    fn title(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::CONFLICT => "Conflict",
            StatusCode::UNPROCESSABLE_ENTITY => "Validation Failed",
            StatusCode::BAD_GATEWAY => "Bad Gateway",
            StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
            StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.stable_code(), "请求处理失败: {}", self);
        }

        let problem = ProblemDetails {
            type_url: "about:blank".to_string(),
            title: self.title().to_string(),
            status: status.as_u16(),
            detail: Some(self.to_string()),
            code: self.stable_code().to_string(),
            request_id: crate::request_id::current_request_id(),
        };

        let mut res = Json(problem).into_response();
        *res.status_mut() = status;
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        res
    }
}
