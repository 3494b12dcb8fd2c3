use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use sqlx::{
    ConnectOptions, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};

use super::{CollaboratorError, PoolStats, RelationalStore};
use crate::config::DatabaseConfig;

/// 基于 sqlx 的 SQLite 关系存储
pub struct SqliteStore {
    config: DatabaseConfig,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteStore {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
        }
    }

    /// 当前连接池（未连接时为 None）
    pub fn pool(&self) -> Option<SqlitePool> {
        self.pool.read().ok().and_then(|guard| guard.clone())
    }

    fn require_pool(&self) -> Result<SqlitePool, CollaboratorError> {
        self.pool().ok_or(CollaboratorError::NotConnected("database"))
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    async fn connect(&self) -> Result<(), CollaboratorError> {
        if self.pool().is_some() {
            return Ok(());
        }
        let journal = if self.config.wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };
        let opt = SqliteConnectOptions::from_str(&self.config.url)?
            .create_if_missing(true)
            .journal_mode(journal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .log_statements(tracing::log::LevelFilter::Off);
        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(self.config.acquire_timeout())
            .connect_with(opt)
            .await?;
        tracing::info!(url = %self.config.url, "数据库连接已建立");
        if let Ok(mut guard) = self.pool.write() {
            *guard = Some(pool);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CollaboratorError> {
        let pool = self.pool.write().ok().and_then(|mut guard| guard.take());
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!("数据库连接已关闭");
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), CollaboratorError> {
        let pool = self.require_pool()?;
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await?;
        if one != 1 {
            return Err(CollaboratorError::Protocol(format!(
                "SELECT 1 返回了 {one}"
            )));
        }
        Ok(())
    }

    fn stats(&self) -> Option<PoolStats> {
        self.pool().map(|pool| {
            let idle = u32::try_from(pool.num_idle()).unwrap_or(u32::MAX);
            PoolStats {
                size: pool.size(),
                idle,
                max_connections: self.config.max_connections,
            }
        })
    }
}
