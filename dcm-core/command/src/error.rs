use dcm_storage::StorageError;
use dcm_tasks::TaskError;
use thiserror::Error;

use crate::{ActionType, ValidationOutcome};

/// 命令引擎错误
///
/// 校验失败与执行失败分属不同变体，调用方据此选择重试策略。
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("校验失败: {0}")]
    ValidationFailed(ValidationOutcome),

    #[error("执行失败: {0}")]
    ExecutionFailed(String),

    #[error("未知操作: {0}")]
    UnknownOperation(String),

    #[error("{action} 参数不完整: {reason}")]
    InvalidParameters { action: ActionType, reason: String },

    #[error("{0} 未声明权限主体")]
    MissingPermissionSubjects(ActionType),

    #[error("权限检查失败: {0}")]
    Permission(String),

    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("任务错误: {0}")]
    Task(#[from] TaskError),
}

impl CommandError {
    pub fn invalid_parameters(action: ActionType, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            action,
            reason: reason.into(),
        }
    }

    pub fn is_validation_failure(&self) -> bool {
        matches!(self, Self::ValidationFailed(_))
    }

    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::ExecutionFailed(_))
    }

    /// 校验失败的结论
    pub fn validation_outcome(&self) -> Option<&ValidationOutcome> {
        match self {
            Self::ValidationFailed(outcome) => Some(outcome),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
