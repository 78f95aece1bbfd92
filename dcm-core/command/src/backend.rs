//! 命令执行入口

use std::sync::Arc;

use dcm_common::Guid;
use dcm_storage::Repositories;
use dcm_tasks::{TaskHandle, TaskManager};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    aggregate_creation_status, project_status, ActionParameters, ActionType, CommandContext,
    CommandRegistry, CreationStatus, EngineConfig, ExecutionResult, PermissionChecker,
    PermissionSubject, PreparedCommand, Result, ValidationOutcome,
};

/// 一次命令调用的返回值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReturnValue {
    pub action_type: ActionType,
    pub command_id: Guid,
    pub result: ExecutionResult,
    /// 同步命令为 None
    pub creation_status: Option<CreationStatus>,
}

/// 进程内的命令分发器
pub struct Backend {
    registry: CommandRegistry,
    context: CommandContext,
    /// 由本分发器创建的任务管理器，负责按保留时长清理任务表
    task_manager: Option<TaskManager>,
}

impl Backend {
    pub fn new(context: CommandContext) -> Self {
        Self {
            registry: CommandRegistry::with_defaults(),
            context,
            task_manager: None,
        }
    }

    /// 按配置组装任务执行器与权限检查
    pub fn from_config(
        config: &EngineConfig,
        repos: Repositories,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        let manager = TaskManager::new(config.tasks.clone());
        let mut context = CommandContext::new(repos, Arc::new(manager.clone()))
            .with_transfer_config(config.transfer.clone());

        if config.permissions.enabled {
            context = context.with_permissions(permissions);
        } else {
            warn!("Permission checks are disabled");
        }
        Self {
            task_manager: Some(manager),
            ..Self::new(context)
        }
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    /// 清理超过保留时长的终止任务，外部注入的执行器自行管理
    pub async fn purge_expired_tasks(&self) -> usize {
        match &self.task_manager {
            Some(manager) => manager.purge_expired().await,
            None => 0,
        }
    }

    pub fn create_command(
        &self,
        action: ActionType,
        params: ActionParameters,
    ) -> Result<PreparedCommand> {
        debug!("Creating {} command", action);
        self.registry.create(action, params)
    }

    pub fn permission_check_subjects(
        &self,
        action: ActionType,
        params: ActionParameters,
    ) -> Result<Vec<PermissionSubject>> {
        Ok(self
            .create_command(action, params)?
            .permission_subjects()
            .to_vec())
    }

    /// 只校验不执行
    pub async fn validate(
        &self,
        action: ActionType,
        params: ActionParameters,
        user_id: Guid,
    ) -> Result<ValidationOutcome> {
        let command = self.create_command(action, params)?;
        Ok(command.validate(&self.context, user_id).await?.outcome())
    }

    /// 校验并执行，校验失败返回 `ValidationFailed`
    pub async fn run_action(
        &self,
        action: ActionType,
        params: ActionParameters,
        user_id: Guid,
    ) -> Result<ActionReturnValue> {
        self.purge_expired_tasks().await;

        let command = self.create_command(action, params)?;
        let command_id = command.command_id();

        let validated = command
            .validate(&self.context, user_id)
            .await?
            .into_validated()?;
        let result = validated.execute(&self.context).await?;

        let creation_status = match &result.task {
            Some(handle) => Some(self.project_status(handle).await?),
            None => None,
        };
        info!(
            "{} ({}) accepted, creation status: {:?}",
            action, command_id, creation_status
        );

        Ok(ActionReturnValue {
            action_type: action,
            command_id,
            result,
            creation_status,
        })
    }

    /// 轮询一个任务的创建状态
    pub async fn project_status(&self, handle: &TaskHandle) -> Result<CreationStatus> {
        let status = self.context.tasks.poll(handle).await?;
        project_status(&status)
    }

    /// 多个任务的合并创建状态
    pub async fn creation_status(&self, handles: &[TaskHandle]) -> Result<Option<CreationStatus>> {
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(self.context.tasks.poll(handle).await?);
        }
        aggregate_creation_status(&statuses)
    }
}
