//! 任务状态机

use chrono::{DateTime, Utc};
use dcm_common::Guid;
use serde::{Deserialize, Serialize};

/// 任务生命周期状态
///
/// `Queued -> Running -> {Finished | Failed}`，快速任务可以从 `Queued`
/// 直接进入终止状态。终止状态不可再变更。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Finished,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// 状态转换只能向前
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running | Self::Finished | Self::Failed) => true,
            (Self::Running, Self::Finished | Self::Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务句柄，调用方凭此轮询状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: Guid,
    /// 触发该任务的命令 ID
    pub correlation_id: Guid,
}

/// 任务状态快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncTaskStatus {
    pub task_id: Guid,
    pub correlation_id: Guid,
    pub state: TaskState,
    /// 失败原因，仅在 `Failed` 时存在
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AsyncTaskStatus {
    pub fn queued(handle: TaskHandle) -> Self {
        let now = Utc::now();
        Self {
            task_id: handle.task_id,
            correlation_id: handle.correlation_id,
            state: TaskState::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            task_id: self.task_id,
            correlation_id: self.correlation_id,
        }
    }
}
