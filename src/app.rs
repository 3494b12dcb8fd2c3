//! 进程上下文与启动编排
//!
//! `bootstrap` 按固定顺序连接基础设施、启动事件总线、初始化业务模块并组装健康聚合器，
//! 产出的 [`AppContext`] 显式传递给 HTTP 层与退出流程，不使用全局单例。

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AppConfig, CacheBackend};
use crate::error::AppError;
use crate::events::EventBus;
use crate::features::{catalog, health::create_health_router};
use crate::health::{
    AggregatorOptions, HealthAggregator, HealthProbe, LiveMetrics, request_metrics_middleware,
    probes::{
        CacheProbe, ExternalServicesProbe, ModulesProbe, QueueProbe, SearchProbe, StoreProbe,
    },
};
use crate::infra::{
    CacheClient, CollaboratorError, HttpSearchIndex, JobQueue, MemoryCache, MemoryQueue,
    RelationalStore, SearchIndex, SqliteStore,
};
use crate::lifecycle::{DependencyPolicy, LifecycleError, ManagerOptions, ModuleManager};
use crate::openapi::ApiDoc;
use crate::request_id::request_id_middleware;
use crate::state::AppState;

/// 启动失败原因
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("启动检查失败: {0}")]
    Startup(#[from] AppError),

    #[error("数据库连接失败: {0}")]
    Store(#[source] CollaboratorError),

    #[error("缓存连接失败: {0}")]
    Cache(#[source] CollaboratorError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// 外部协作者（尚未连接）
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn RelationalStore>,
    pub cache: Arc<dyn CacheClient>,
    pub queue: Arc<dyn JobQueue>,
    /// 未启用搜索时为 None
    pub search: Option<Arc<dyn SearchIndex>>,
}

impl Collaborators {
    /// 按配置选择具体实现
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(SqliteStore::new(config.database.clone())),
            cache: cache_from_config(config),
            queue: Arc::new(MemoryQueue::new(config.queue.backlog_threshold)),
            search: config
                .search
                .enabled
                .then(|| Arc::new(HttpSearchIndex::new(&config.search)) as Arc<dyn SearchIndex>),
        }
    }
}

fn cache_from_config(config: &AppConfig) -> Arc<dyn CacheClient> {
    match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(config.cache.max_entries)),
        #[cfg(feature = "redis-cache")]
        CacheBackend::Redis => Arc::new(crate::infra::RedisCache::new(config.cache.url.clone())),
        #[cfg(not(feature = "redis-cache"))]
        CacheBackend::Redis => {
            tracing::warn!("未启用 redis-cache 特性，回退到内存缓存");
            Arc::new(MemoryCache::new(config.cache.max_entries))
        }
    }
}

/// 进程上下文
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn RelationalStore>,
    pub cache: Arc<dyn CacheClient>,
    pub queue: Arc<dyn JobQueue>,
    pub search: Option<Arc<dyn SearchIndex>>,
    pub events: EventBus,
    pub modules: Arc<ModuleManager>,
    pub health: Arc<HealthAggregator>,
    pub live_metrics: Arc<LiveMetrics>,
    pub started_at: Instant,
}

/// 启动编排：启动检查 → 数据库 → 缓存 → 搜索（可选）→ 事件总线 → 业务模块 → 健康聚合
pub async fn bootstrap(
    config: AppConfig,
    collaborators: Collaborators,
) -> Result<AppContext, BootstrapError> {
    let started_at = Instant::now();
    crate::startup::run_startup_checks(&config)?;

    let Collaborators {
        store,
        cache,
        queue,
        search,
    } = collaborators;

    store.connect().await.map_err(BootstrapError::Store)?;

    if let Err(e) = cache.connect().await {
        disconnect_quietly(&store, None, None).await;
        return Err(BootstrapError::Cache(e));
    }

    if let Some(index) = &search {
        if let Err(e) = index.connect().await {
            tracing::warn!("搜索集群连接失败，搜索检查将标记为未连接: {}", e);
        }
    }

    let events = EventBus::from_config(&config.events, Some(cache.clone()));
    if let Err(e) = events.start_relay().await {
        tracing::warn!("事件广播启动失败，仅进程内分发: {}", e);
    }

    let deps = catalog::ModuleDeps {
        store: store.clone(),
        cache: cache.clone(),
        queue: queue.clone(),
        events: events.clone(),
    };
    let registry = match catalog::build_registry(&deps) {
        Ok(registry) => registry,
        Err(e) => {
            events.stop_relay();
            disconnect_quietly(&store, Some(&cache), search.as_ref()).await;
            return Err(e.into());
        }
    };

    let options = ManagerOptions {
        dependency_policy: if config.modules.strict_dependencies {
            DependencyPolicy::Strict
        } else {
            DependencyPolicy::Permissive
        },
        health_timeout: config.modules.health_timeout(),
    };
    let modules = Arc::new(ModuleManager::new(registry, options));

    if let Err(e) = modules.initialize_all().await {
        tracing::error!("模块初始化失败: {}", e);
        modules.shutdown_all().await;
        events.stop_relay();
        events.clear();
        if let Err(e) = queue.close().await {
            tracing::warn!("关闭任务队列失败: {}", e);
        }
        disconnect_quietly(&store, Some(&cache), search.as_ref()).await;
        return Err(e.into());
    }

    let mut probes: Vec<Arc<dyn HealthProbe>> = vec![
        Arc::new(StoreProbe::new(store.clone())),
        Arc::new(CacheProbe::new(cache.clone())),
        Arc::new(QueueProbe::new(queue.clone())),
        Arc::new(ModulesProbe::new(modules.clone())),
        Arc::new(ExternalServicesProbe::new(
            config.health.external_services.clone(),
            config.health.check_timeout(),
        )),
    ];
    if let Some(index) = &search {
        probes.push(Arc::new(SearchProbe::new(index.clone())));
    }
    let health = Arc::new(
        HealthAggregator::new(probes, AggregatorOptions::from_config(&config.health))
            .with_started_at(started_at),
    );
    let live_metrics = Arc::new(LiveMetrics::new(cache.clone()));

    tracing::info!(
        modules = ?modules.initialized_modules(),
        "✅ 启动完成，耗时 {}ms",
        started_at.elapsed().as_millis()
    );

    Ok(AppContext {
        config: Arc::new(config),
        store,
        cache,
        queue,
        search,
        events,
        modules,
        health,
        live_metrics,
        started_at,
    })
}

async fn disconnect_quietly(
    store: &Arc<dyn RelationalStore>,
    cache: Option<&Arc<dyn CacheClient>>,
    search: Option<&Arc<dyn SearchIndex>>,
) {
    if let Some(index) = search
        && let Err(e) = index.disconnect().await
    {
        tracing::warn!("断开搜索集群失败: {}", e);
    }
    if let Some(cache) = cache
        && let Err(e) = cache.disconnect().await
    {
        tracing::warn!("断开缓存失败: {}", e);
    }
    if let Err(e) = store.disconnect().await {
        tracing::warn!("断开数据库失败: {}", e);
    }
}

impl AppContext {
    pub fn app_state(&self) -> AppState {
        AppState {
            health: self.health.clone(),
            modules: self.modules.clone(),
            live_metrics: self.live_metrics.clone(),
            started_at: self.started_at,
        }
    }

    /// 完整 HTTP 路由（健康接口 + 文档 + 中间件）
    pub fn router(&self) -> Router {
        Router::<AppState>::new()
            .merge(create_health_router())
            .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
            .with_state(self.app_state())
            .layer(axum::middleware::from_fn_with_state(
                self.live_metrics.clone(),
                request_metrics_middleware,
            ))
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(TraceLayer::new_for_http())
    }

    /// 逆序释放：模块 → 事件总线 → 队列 → 搜索 → 缓存 → 数据库
    pub async fn shutdown(&self) {
        tracing::info!("开始释放应用资源...");
        let report = self.modules.shutdown_all().await;
        if !report.is_clean() {
            tracing::warn!(failed = ?report.failed, "部分模块关闭失败");
        }

        self.events.stop_relay();
        self.events.clear();

        if let Err(e) = self.queue.close().await {
            tracing::warn!("关闭任务队列失败: {}", e);
        }
        disconnect_quietly(&self.store, Some(&self.cache), self.search.as_ref()).await;
        tracing::info!("应用资源已释放");
    }
}
