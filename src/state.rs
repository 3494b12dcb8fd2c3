use std::sync::Arc;
use std::time::Instant;

use crate::health::{HealthAggregator, LiveMetrics};
use crate::lifecycle::ModuleManager;

/// 聚合的应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthAggregator>,
    pub modules: Arc<ModuleManager>,
    pub live_metrics: Arc<LiveMetrics>,
    pub started_at: Instant,
}
