use saas_backend::shutdown::teardown_within;
use saas_backend::{AppConfig, Collaborators, ShutdownManager, bootstrap};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "saas_backend=info,tower_http=info".into()),
        )
        .init();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("配置加载失败: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown_manager = ShutdownManager::new();
    if let Err(e) = shutdown_manager.start_signal_handler() {
        tracing::error!("信号处理器启动失败: {}", e);
        std::process::exit(1);
    }

    let addr = config.server_addr();
    let shutdown_timeout = config.shutdown.timeout_duration();
    let collaborators = Collaborators::from_config(&config);
    let ctx = match bootstrap(config, collaborators).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("启动失败: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("绑定地址失败 {}: {}", addr, e);
            ctx.shutdown().await;
            std::process::exit(1);
        }
    };

    tracing::info!("Server: http://{}", addr);
    tracing::info!("Docs: http://{}/docs", addr);
    tracing::info!("Health: http://{}/health", addr);

    let signal = shutdown_manager.clone();
    let graceful = axum::serve(listener, ctx.router()).with_graceful_shutdown(async move {
        let reason = signal.wait_for_shutdown().await;
        tracing::info!("接收到退出信号: {:?}，停止接收新请求...", reason);
    });

    let served = graceful.await;
    if let Err(e) = &served {
        tracing::error!("服务器运行错误: {}", e);
    }

    tracing::info!("优雅退出超时时间: {}秒", shutdown_timeout.as_secs());
    match teardown_within(shutdown_timeout, ctx.shutdown()).await {
        Ok(()) => tracing::info!("优雅退出完成"),
        Err(e) => tracing::warn!("{}，强制退出", e),
    }

    if served.is_err() {
        std::process::exit(1);
    }
}
