use std::sync::{Arc, Mutex};

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// 主机与进程资源概况，只用于展示
#[derive(Debug, Clone, Default, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// 全部 CPU 平均使用率（0-100）
    pub cpu_usage: f32,
    pub cpu_cores: usize,
    /// 1/5/15 分钟负载
    #[schema(value_type = Vec<f64>)]
    pub load_average: [f64; 3],
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_usage_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_memory_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_uptime_secs: Option<u64>,
}

/// 复用同一个 `System`，CPU 使用率需要两次刷新之间的差值
#[derive(Clone)]
pub struct SystemCollector {
    system: Arc<Mutex<System>>,
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    /// 在阻塞线程池上采集
    pub async fn collect(&self) -> SystemMetrics {
        let system = Arc::clone(&self.system);
        match tokio::task::spawn_blocking(move || {
            let mut guard = match system.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            sample(&mut guard)
        })
        .await
        {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!("系统指标采集失败: {}", e);
                SystemMetrics::default()
            }
        }
    }
}

fn sample(system: &mut System) -> SystemMetrics {
    system.refresh_cpu_all();
    system.refresh_memory();

    let cpus = system.cpus();
    let cpu_usage = if cpus.is_empty() {
        0.0
    } else {
        cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
    };
    let total = system.total_memory();
    let used = system.used_memory();
    let memory_usage_percent = if total > 0 {
        (used as f32 / total as f32) * 100.0
    } else {
        0.0
    };

    let pid = Pid::from(std::process::id() as usize);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let process = system.process(pid);

    let load = System::load_average();
    SystemMetrics {
        cpu_usage,
        cpu_cores: num_cpus::get(),
        load_average: [load.one, load.five, load.fifteen],
        memory_total_bytes: total,
        memory_used_bytes: used,
        memory_usage_percent,
        process_memory_bytes: process.map(|p| p.memory()),
        process_uptime_secs: process.map(|p| p.run_time()),
    }
}
