use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::health::Escalation;

/// 默认配置文件路径（可用 `APP_CONFIG` 覆盖）
const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }
    fn default_port() -> u16 {
        3000
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// 关系存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 连接串，例如 `sqlite://./data/app.db`
    #[serde(default = "DatabaseConfig::default_url")]
    pub url: String,
    /// 连接池上限
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
    /// 是否启用 WAL
    #[serde(default = "DatabaseConfig::default_wal")]
    pub wal: bool,
    /// 获取连接超时（毫秒）
    #[serde(default = "DatabaseConfig::default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
    fn default_url() -> String {
        "sqlite://./data/app.db".to_string()
    }
    fn default_max_connections() -> u32 {
        5
    }
    fn default_wal() -> bool {
        true
    }
    fn default_acquire_timeout() -> u64 {
        3000
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// SQLite 文件路径（内存库或非 sqlite 连接串时为 None）
    pub fn sqlite_file(&self) -> Option<PathBuf> {
        let rest = self
            .url
            .strip_prefix("sqlite://")
            .or_else(|| self.url.strip_prefix("sqlite:"))?;
        let path = rest.split('?').next().unwrap_or(rest);
        if path.is_empty() || path == ":memory:" {
            return None;
        }
        Some(PathBuf::from(path))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            max_connections: Self::default_max_connections(),
            wal: Self::default_wal(),
            acquire_timeout_ms: Self::default_acquire_timeout(),
        }
    }
}

/// 缓存后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// 进程内（单实例）
    #[default]
    Memory,
    /// Redis（多实例共享，支持跨进程事件）
    Redis,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Redis 连接串（backend = redis 时必填）
    #[serde(default = "CacheConfig::default_url")]
    pub url: String,
    /// 进程内缓存最大条目数
    #[serde(default = "CacheConfig::default_max_entries")]
    pub max_entries: u64,
}

impl CacheConfig {
    fn default_url() -> String {
        "redis://127.0.0.1:6379".to_string()
    }
    fn default_max_entries() -> u64 {
        10_000
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            url: Self::default_url(),
            max_entries: Self::default_max_entries(),
        }
    }
}

/// 任务队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// 单个队列等待任务数超过该值即视为积压
    #[serde(default = "QueueConfig::default_backlog_threshold")]
    pub backlog_threshold: u64,
}

impl QueueConfig {
    fn default_backlog_threshold() -> u64 {
        1000
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backlog_threshold: Self::default_backlog_threshold(),
        }
    }
}

/// 搜索集群配置（可选）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "SearchConfig::default_url")]
    pub url: String,
    #[serde(default = "SearchConfig::default_timeout")]
    pub timeout_ms: u64,
}

impl SearchConfig {
    fn default_url() -> String {
        "http://127.0.0.1:9200".to_string()
    }
    fn default_timeout() -> u64 {
        3000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: Self::default_url(),
            timeout_ms: Self::default_timeout(),
        }
    }
}

/// 需要探活的外部服务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalServiceConfig {
    pub name: String,
    pub url: String,
}

/// 健康检查配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// 单个子检查的超时（毫秒），超时按 unhealthy 处理
    #[serde(default = "HealthConfig::default_check_timeout")]
    pub check_timeout_ms: u64,
    /// 响应慢于该阈值的健康子检查降级为 degraded
    #[serde(default = "HealthConfig::default_slow_threshold")]
    pub slow_threshold_ms: u64,
    /// 完整快照的缓存时间（毫秒，0=不缓存）
    #[serde(default = "HealthConfig::default_cache_ttl")]
    pub cache_ttl_ms: u64,
    /// 覆盖默认升级策略：检查名 -> ignore|degraded|unhealthy
    #[serde(default)]
    pub escalation: BTreeMap<String, Escalation>,
    /// 外部服务探活列表
    #[serde(default)]
    pub external_services: Vec<ExternalServiceConfig>,
}

impl HealthConfig {
    fn default_check_timeout() -> u64 {
        5000
    }
    fn default_slow_threshold() -> u64 {
        1000
    }
    fn default_cache_ttl() -> u64 {
        1000
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: Self::default_check_timeout(),
            slow_threshold_ms: Self::default_slow_threshold(),
            cache_ttl_ms: Self::default_cache_ttl(),
            escalation: BTreeMap::new(),
            external_services: Vec::new(),
        }
    }
}

/// 模块系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// 启用的模块依赖了被禁用的模块时是否视为配置错误
    #[serde(default = "ModulesConfig::default_strict")]
    pub strict_dependencies: bool,
    /// 单个模块健康检查超时（毫秒）
    #[serde(default = "ModulesConfig::default_health_timeout")]
    pub health_timeout_ms: u64,
}

impl ModulesConfig {
    fn default_strict() -> bool {
        true
    }
    fn default_health_timeout() -> u64 {
        3000
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            strict_dependencies: Self::default_strict(),
            health_timeout_ms: Self::default_health_timeout(),
        }
    }
}

/// 事件总线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// 是否经由缓存频道做跨进程广播
    #[serde(default = "EventsConfig::default_relay")]
    pub relay: bool,
    /// 广播频道名
    #[serde(default = "EventsConfig::default_channel")]
    pub channel: String,
    /// `wait_for` 默认超时（毫秒）
    #[serde(default = "EventsConfig::default_wait_timeout")]
    pub wait_timeout_ms: u64,
}

impl EventsConfig {
    fn default_relay() -> bool {
        true
    }
    fn default_channel() -> String {
        "app:events".to_string()
    }
    fn default_wait_timeout() -> u64 {
        30_000
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            relay: Self::default_relay(),
            channel: Self::default_channel(),
            wait_timeout_ms: Self::default_wait_timeout(),
        }
    }
}

/// 优雅退出配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// 优雅退出超时时间（秒）
    #[serde(default = "ShutdownConfig::default_timeout")]
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    fn default_timeout() -> u64 {
        30
    }

    /// 获取优雅退出超时时间
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl AppConfig {
    /// 从配置文件加载配置，支持环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::get_config_path())
    }

    /// 从指定文件加载（文件可不存在），再叠加 `APP__` 前缀的环境变量，
    /// 例如 `APP__HEALTH__CHECK_TIMEOUT_MS=2000`
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        tracing::info!("正在从 {:?} 加载配置文件", path);

        let builder = ConfigBuilder::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        builder.try_deserialize()
    }

    /// 获取配置文件路径
    fn get_config_path() -> PathBuf {
        std::env::var_os("APP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// 获取服务器监听地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server_addr(), "0.0.0.0:3000");
        assert_eq!(cfg.cache.backend, CacheBackend::Memory);
        assert!(cfg.modules.strict_dependencies);
        assert!(!cfg.search.enabled);
        assert!(cfg.health.slow_threshold() < cfg.health.check_timeout());
    }

    #[test]
    fn sqlite_file_is_extracted_from_url() {
        let mut db = DatabaseConfig::default();
        assert_eq!(db.sqlite_file(), Some(PathBuf::from("./data/app.db")));

        db.url = "sqlite::memory:".to_string();
        assert_eq!(db.sqlite_file(), None);

        db.url = "sqlite://data/x.db?mode=rwc".to_string();
        assert_eq!(db.sqlite_file(), Some(PathBuf::from("data/x.db")));
    }

    #[test]
    fn load_from_file_with_partial_sections() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("tempfile");
        writeln!(
            file,
            r#"
[server]
port = 8088

[health]
slow_threshold_ms = 250
escalation = {{ database = "unhealthy", search = "ignore" }}

[[health.external_services]]
name = "payments"
url = "https://payments.example.com/status"
"#
        )
        .expect("write");

        let cfg = AppConfig::load_from(file.path().to_path_buf()).expect("load");
        assert_eq!(cfg.server.port, 8088);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.health.slow_threshold_ms, 250);
        assert_eq!(
            cfg.health.escalation.get("database"),
            Some(&Escalation::Unhealthy)
        );
        assert_eq!(cfg.health.external_services.len(), 1);
        assert_eq!(cfg.events.channel, "app:events");
    }
}
