//! 任务执行器配置

use serde::{Deserialize, Serialize};

/// 任务执行器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// 同时运行的最大任务数，超出的任务保持排队
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// 终止任务的保留时长（秒）
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_max_concurrent_tasks() -> usize {
    8
}

fn default_retention_secs() -> u64 {
    3600
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl TaskManagerConfig {
    /// 设置并发上限
    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// 设置保留时长
    pub fn retention_secs(mut self, secs: u64) -> Self {
        self.retention_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_to_partial_input() {
        let config: TaskManagerConfig = serde_json::from_str(r#"{"max_concurrent_tasks": 2}"#).unwrap();
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.retention_secs, 3600);
    }
}
