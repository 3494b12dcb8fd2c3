use std::fs;

use crate::config::{AppConfig, CacheBackend};
use crate::error::AppError;
use crate::health::checks;

/// 执行启动检查
///
/// 1. 检查并创建 SQLite 数据目录
/// 2. 校验健康检查配置
/// 3. 校验缓存后端与外部服务地址
pub fn run_startup_checks(config: &AppConfig) -> Result<(), AppError> {
    tracing::info!("🔍 开始执行启动检查...");

    ensure_data_folder(config)?;
    check_health_config(config)?;
    check_cache_backend(config)?;
    check_external_services(config)?;

    tracing::info!("✅ 启动检查完成");
    Ok(())
}

/// 确保 SQLite 文件所在目录存在（内存库跳过）
fn ensure_data_folder(config: &AppConfig) -> Result<(), AppError> {
    let Some(file) = config.database.sqlite_file() else {
        tracing::info!("✅ 使用内存数据库，跳过数据目录检查");
        return Ok(());
    };
    let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };

    if !dir.exists() {
        tracing::warn!("📁 未找到数据目录，正在创建: {:?}", dir);
        fs::create_dir_all(dir)
            .map_err(|e| AppError::Internal(format!("创建数据目录失败: {e}")))?;
        tracing::info!("✅ 数据目录创建成功");
    } else {
        tracing::info!("✅ 数据目录已存在: {:?}", dir);
    }
    Ok(())
}

fn check_health_config(config: &AppConfig) -> Result<(), AppError> {
    let health = &config.health;
    if health.check_timeout_ms == 0 {
        return Err(AppError::Validation(
            "health.check_timeout_ms 必须大于 0".to_string(),
        ));
    }
    if health.slow_threshold_ms >= health.check_timeout_ms {
        return Err(AppError::Validation(format!(
            "health.slow_threshold_ms ({}) 必须小于 health.check_timeout_ms ({})",
            health.slow_threshold_ms, health.check_timeout_ms
        )));
    }
    if let Some(unknown) = health
        .escalation
        .keys()
        .find(|name| !checks::ALL.iter().any(|c| *c == name.as_str()))
    {
        return Err(AppError::Validation(format!(
            "health.escalation 中存在未知的检查项: {unknown}（可选: {}）",
            checks::ALL.join(", ")
        )));
    }
    if config.modules.health_timeout_ms == 0 {
        return Err(AppError::Validation(
            "modules.health_timeout_ms 必须大于 0".to_string(),
        ));
    }
    if config.modules.health_timeout_ms >= health.check_timeout_ms {
        return Err(AppError::Validation(format!(
            "modules.health_timeout_ms ({}) 必须小于 health.check_timeout_ms ({})",
            config.modules.health_timeout_ms, health.check_timeout_ms
        )));
    }
    Ok(())
}

fn check_cache_backend(config: &AppConfig) -> Result<(), AppError> {
    match config.cache.backend {
        CacheBackend::Memory => {
            if config.events.relay {
                tracing::info!("内存缓存后端下事件中继仅在本进程内生效");
            }
            Ok(())
        }
        CacheBackend::Redis if !cfg!(feature = "redis-cache") => Err(AppError::Validation(
            "cache.backend = \"redis\" 需要启用 redis-cache 特性".to_string(),
        )),
        CacheBackend::Redis if config.cache.url.trim().is_empty() => Err(
            AppError::Validation("cache.backend = \"redis\" 时必须配置 cache.url".to_string()),
        ),
        CacheBackend::Redis => Ok(()),
    }
}

fn check_external_services(config: &AppConfig) -> Result<(), AppError> {
    for service in &config.health.external_services {
        if service.name.trim().is_empty() {
            return Err(AppError::Validation("外部服务名称不能为空".to_string()));
        }
        reqwest::Url::parse(&service.url).map_err(|e| {
            AppError::Validation(format!("外部服务 {} 的地址无效: {e}", service.name))
        })?;
    }
    Ok(())
}
