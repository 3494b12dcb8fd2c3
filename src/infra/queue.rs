use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CollaboratorError, JobOptions, JobQueue, QueueHealth, QueueStatus};

/// 已入队的任务记录
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: VecDeque<JobRecord>,
    /// 周期任务按名称去重，重复注册只替换计划
    repeatable: BTreeMap<String, JobRecord>,
}

/// 进程内任务队列。
///
/// 只负责入队记账与健康上报，任务的实际消费由外部 worker 完成。
pub struct MemoryQueue {
    queues: Mutex<BTreeMap<String, QueueState>>,
    backlog_threshold: u64,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new(backlog_threshold: u64) -> Self {
        Self {
            queues: Mutex::new(BTreeMap::new()),
            backlog_threshold,
            closed: AtomicBool::new(false),
        }
    }

    /// 取出指定队列最早的等待任务
    pub fn take_next(&self, queue: &str) -> Option<JobRecord> {
        let mut guard = self.queues.lock().ok()?;
        guard.get_mut(queue)?.waiting.pop_front()
    }

    /// 指定队列上登记的周期任务
    pub fn repeatable_jobs(&self, queue: &str) -> Vec<JobRecord> {
        self.queues
            .lock()
            .ok()
            .and_then(|guard| {
                guard
                    .get(queue)
                    .map(|q| q.repeatable.values().cloned().collect())
            })
            .unwrap_or_default()
    }

    pub fn waiting_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .ok()
            .and_then(|guard| guard.get(queue).map(|q| q.waiting.len()))
            .unwrap_or(0)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn add_job(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<String, CollaboratorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Closed("queue"));
        }
        let record = JobRecord {
            id: Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            payload,
            options,
            enqueued_at: Utc::now(),
        };
        let id = record.id.clone();
        let mut guard = self
            .queues
            .lock()
            .map_err(|_| CollaboratorError::Connection("队列表锁已损坏".to_string()))?;
        let state = guard.entry(queue.to_string()).or_default();
        if let Some(repeat) = &record.options.repeat {
            tracing::debug!(queue, job = name, cron = %repeat.cron, "登记周期任务");
            state.repeatable.insert(name.to_string(), record);
        } else {
            state.waiting.push_back(record);
        }
        Ok(id)
    }

    async fn health_check(&self) -> Result<QueueHealth, CollaboratorError> {
        let closed = self.closed.load(Ordering::SeqCst);
        let guard = self
            .queues
            .lock()
            .map_err(|_| CollaboratorError::Connection("队列表锁已损坏".to_string()))?;
        let queues = guard
            .iter()
            .map(|(name, state)| {
                let waiting = state.waiting.len() as u64;
                let backlog = waiting > self.backlog_threshold;
                let message = if closed {
                    Some("队列已关闭".to_string())
                } else if backlog {
                    Some(format!("积压 {waiting} 个任务，超过阈值 {}", self.backlog_threshold))
                } else {
                    None
                };
                let status = QueueStatus {
                    healthy: !closed && !backlog,
                    waiting,
                    repeatable: state.repeatable.len() as u64,
                    message,
                };
                (name.clone(), status)
            })
            .collect();
        Ok(QueueHealth { closed, queues })
    }

    async fn close(&self) -> Result<(), CollaboratorError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::info!("任务队列已关闭");
        }
        Ok(())
    }
}
