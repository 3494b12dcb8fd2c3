use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{ClusterHealth, CollaboratorError, SearchIndex};
use crate::config::SearchConfig;

/// 通过 HTTP `/_cluster/health` 访问搜索集群
pub struct HttpSearchIndex {
    base_url: String,
    timeout: Duration,
    connected: AtomicBool,
}

impl HttpSearchIndex {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: config.timeout(),
            connected: AtomicBool::new(false),
        }
    }

    async fn fetch_health(&self) -> Result<ClusterHealth, CollaboratorError> {
        let client = crate::http::client_default()?;
        let resp = client
            .get(format!("{}/_cluster/health", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Timeout
                } else {
                    CollaboratorError::Http(e)
                }
            })?
            .error_for_status()?;
        let health: ClusterHealth = resp
            .json()
            .await
            .map_err(|e| CollaboratorError::Protocol(format!("集群健康响应无法解析: {e}")))?;
        Ok(health)
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn connect(&self) -> Result<(), CollaboratorError> {
        let health = self.fetch_health().await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(url = %self.base_url, status = ?health.status, "搜索集群已连接");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CollaboratorError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn cluster_health(&self) -> Result<ClusterHealth, CollaboratorError> {
        if !self.is_connected() {
            return Err(CollaboratorError::NotConnected("search"));
        }
        self.fetch_health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ClusterColor;
    use axum::{Json, Router, routing::get};
    use serde_json::json;

    async fn start_cluster(status: &'static str) -> std::net::SocketAddr {
        let app = Router::new().route(
            "/_cluster/health",
            get(move || async move {
                Json(json!({ "status": status, "cluster_name": "test", "number_of_nodes": 1 }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    fn config_for(url: String) -> SearchConfig {
        SearchConfig {
            enabled: true,
            url,
            timeout_ms: 500,
        }
    }

    #[tokio::test]
    async fn connect_marks_index_connected() {
        let addr = start_cluster("yellow").await;
        let index = HttpSearchIndex::new(&config_for(format!("http://{addr}/")));
        assert!(!index.is_connected());
        assert!(index.cluster_health().await.is_err());

        index.connect().await.expect("connect");
        assert!(index.is_connected());
        let health = index.cluster_health().await.expect("health");
        assert_eq!(health.status, ClusterColor::Yellow);
        assert_eq!(health.cluster_name.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn connect_failure_leaves_index_disconnected() {
        // 端口 1 上通常没有服务
        let index = HttpSearchIndex::new(&config_for("http://127.0.0.1:1".to_string()));
        assert!(index.connect().await.is_err());
        assert!(!index.is_connected());
    }
}
