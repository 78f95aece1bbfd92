//! DCM 异步任务
//!
//! 命令的长耗时工作在这里以后台任务运行，调用方凭 [`TaskHandle`] 轮询。

mod config;
mod manager;
mod state;

pub use config::TaskManagerConfig;
pub use manager::TaskManager;
pub use state::{AsyncTaskStatus, TaskHandle, TaskState};

use async_trait::async_trait;
use dcm_common::Guid;
use futures_util::future::BoxFuture;
use thiserror::Error;

/// 任务错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("任务不存在: {0}")]
    NotFound(Guid),

    #[error("命令 {correlation_id} 已有活动任务 {task_id}")]
    AlreadyActive { correlation_id: Guid, task_id: Guid },

    #[error("任务 {task_id} 状态非法转换: {from} -> {to}")]
    InvalidTransition {
        task_id: Guid,
        from: TaskState,
        to: TaskState,
    },

    #[error("任务仍在运行: {0}")]
    StillActive(Guid),
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// 提交给执行器的工作单元
pub type TaskWork = BoxFuture<'static, anyhow::Result<()>>;

/// 异步任务执行器
#[async_trait]
pub trait AsyncTaskRunner: Send + Sync {
    /// 提交任务，立即返回句柄
    async fn enqueue(&self, correlation_id: Guid, work: TaskWork) -> Result<TaskHandle>;

    /// 查询任务状态
    async fn poll(&self, handle: &TaskHandle) -> Result<AsyncTaskStatus>;
}
