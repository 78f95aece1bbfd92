//! 创建状态投影
//!
//! 把后台任务状态映射为调用方可见的三态。每次轮询重新计算，不做存储。

use dcm_tasks::{AsyncTaskStatus, TaskState};
use serde::{Deserialize, Serialize};

use crate::{CommandError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreationStatus {
    Pending,
    InProgress,
    Complete,
}

impl CreationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for CreationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `failed` 没有对应的创建状态，以执行错误返回
pub fn project_status(status: &AsyncTaskStatus) -> Result<CreationStatus> {
    match status.state {
        TaskState::Queued => Ok(CreationStatus::Pending),
        TaskState::Running => Ok(CreationStatus::InProgress),
        TaskState::Finished => Ok(CreationStatus::Complete),
        TaskState::Failed => Err(failure(status)),
    }
}

/// 多个任务的合并状态
///
/// 没有任务时返回 `None`；任一失败即失败；全部完成为 `Complete`；
/// 有运行中的任务，或已完成与排队混合时为 `InProgress`；否则为 `Pending`。
pub fn aggregate_creation_status(statuses: &[AsyncTaskStatus]) -> Result<Option<CreationStatus>> {
    if statuses.is_empty() {
        return Ok(None);
    }
    if let Some(failed) = statuses.iter().find(|s| s.state == TaskState::Failed) {
        return Err(failure(failed));
    }

    let count = |state: TaskState| statuses.iter().filter(|s| s.state == state).count();
    let finished = count(TaskState::Finished);
    let running = count(TaskState::Running);

    let status = if finished == statuses.len() {
        CreationStatus::Complete
    } else if running > 0 || finished > 0 {
        CreationStatus::InProgress
    } else {
        CreationStatus::Pending
    };
    Ok(Some(status))
}

fn failure(status: &AsyncTaskStatus) -> CommandError {
    CommandError::ExecutionFailed(format!(
        "task {} failed: {}",
        status.task_id,
        status.error.as_deref().unwrap_or("unknown error")
    ))
}
