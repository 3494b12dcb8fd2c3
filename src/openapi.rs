use utoipa::openapi::server::ServerBuilder;
use utoipa::{Modify, OpenApi};

/// 健康接口挂在根路径下。
struct RootServer;

impl Modify for RootServer {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let root = ServerBuilder::new()
            .url("/")
            .description(Some("根路径"))
            .build();
        openapi.servers = Some(vec![root]);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::liveness,
        crate::features::health::handler::readiness,
        crate::features::health::handler::health,
        crate::features::health::handler::modules,
        crate::features::health::handler::service,
        crate::features::health::handler::live_metrics,
    ),
    components(schemas(
        crate::error::ProblemDetails,
        crate::health::HealthStatus,
        crate::health::Escalation,
    )),
    modifiers(&RootServer),
    tags(
        (
            name = "Health",
            description = "健康检查：存活/就绪探针、完整快照、模块状态与实时指标。"
        ),
    ),
    info(
        title = "SaaS Backend API",
        version = env!("CARGO_PKG_VERSION"),
        description = "模块生命周期与健康编排服务（Axum + utoipa）。"
    )
)]
pub struct ApiDoc;
