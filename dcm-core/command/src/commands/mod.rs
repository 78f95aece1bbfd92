//! 命令与执行流水线
//!
//! 每个命令走同一条流水线：
//! [`PreparedCommand`]（计算权限主体）→ 权限检查 → 校验链 →
//! [`ValidatedCommand`] → 执行。执行会消耗 [`ValidatedCommand`]，
//! 因此一次校验结论只能用于同一实例的一次执行。

mod add_vm;
mod remove_vm;
mod transfer_disk_image;

pub use add_vm::AddVmCommand;
pub use remove_vm::RemoveVmCommand;
pub use transfer_disk_image::TransferDiskImageCommand;

use std::collections::HashMap;

use async_trait::async_trait;
use dcm_common::Guid;
use dcm_tasks::TaskHandle;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    ActionParameters, ActionType, CommandContext, CommandError, EngineMessage, PermissionSubject,
    Result, ValidationOutcome, ValidationResult,
};

/// 执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// 被创建或操作的对象
    pub target_id: Guid,
    /// 同步完成的命令没有后台任务
    pub task: Option<TaskHandle>,
}

/// 命令
#[async_trait]
pub trait Command: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// 命令 ID，也是后台任务的关联 ID
    fn command_id(&self) -> Guid;

    /// 只依赖参数，每个目标对象一项
    fn permission_check_subjects(&self) -> Vec<PermissionSubject>;

    /// 读取实体快照并按固定顺序求值校验链
    async fn validate(&mut self, ctx: &CommandContext) -> Result<ValidationResult>;

    /// 只能在同一实例校验通过后调用
    async fn execute_command(&mut self, ctx: &CommandContext) -> Result<ExecutionResult>;
}

/// 已构造、尚未校验的命令
pub struct PreparedCommand {
    command: Box<dyn Command>,
    subjects: Vec<PermissionSubject>,
}

/// 校验结论
pub enum Validation {
    Passed(ValidatedCommand),
    Failed(ValidationOutcome),
}

impl Validation {
    pub fn outcome(&self) -> ValidationOutcome {
        match self {
            Self::Passed(_) => ValidationOutcome::passed(),
            Self::Failed(outcome) => outcome.clone(),
        }
    }

    /// 失败时转为 `ValidationFailed` 错误
    pub fn into_validated(self) -> Result<ValidatedCommand> {
        match self {
            Self::Passed(command) => Ok(command),
            Self::Failed(outcome) => Err(CommandError::ValidationFailed(outcome)),
        }
    }
}

impl PreparedCommand {
    /// 变更类命令必须声明至少一个权限主体
    pub fn new(command: Box<dyn Command>) -> Result<Self> {
        let subjects = command.permission_check_subjects();
        if subjects.is_empty() {
            return Err(CommandError::MissingPermissionSubjects(command.action_type()));
        }
        Ok(Self { command, subjects })
    }

    pub fn action_type(&self) -> ActionType {
        self.command.action_type()
    }

    pub fn command_id(&self) -> Guid {
        self.command.command_id()
    }

    pub fn permission_subjects(&self) -> &[PermissionSubject] {
        &self.subjects
    }

    /// 权限检查后运行校验链
    pub async fn validate(mut self, ctx: &CommandContext, user_id: Guid) -> Result<Validation> {
        let action = self.command.action_type();

        if let Some(checker) = &ctx.permissions {
            let authorized = checker
                .is_authorized(user_id, &self.subjects)
                .await
                .map_err(|e| CommandError::Permission(format!("{:#}", e)))?;
            if !authorized {
                warn!("User {} is not authorized to run {}", user_id, action);
                return Ok(Validation::Failed(
                    ValidationResult::fail(EngineMessage::UserNotAuthorizedToPerformAction).into(),
                ));
            }
        }

        let result = self.command.validate(ctx).await?;
        if !result.is_valid() {
            let outcome = ValidationOutcome::from(result);
            info!(
                "{} ({}) failed validation: {}",
                action,
                self.command.command_id(),
                outcome
            );
            return Ok(Validation::Failed(outcome));
        }

        debug!("{} ({}) passed validation", action, self.command.command_id());
        Ok(Validation::Passed(ValidatedCommand {
            command: self.command,
        }))
    }
}

/// 校验通过、等待执行的命令
pub struct ValidatedCommand {
    command: Box<dyn Command>,
}

impl ValidatedCommand {
    pub fn action_type(&self) -> ActionType {
        self.command.action_type()
    }

    pub fn command_id(&self) -> Guid {
        self.command.command_id()
    }

    pub async fn execute(mut self, ctx: &CommandContext) -> Result<ExecutionResult> {
        let action = self.command.action_type();
        let command_id = self.command.command_id();
        info!("Executing {} ({})", action, command_id);

        let result = self.command.execute_command(ctx).await?;
        info!(
            "{} ({}) executed on {}, task: {:?}",
            action,
            command_id,
            result.target_id,
            result.task.map(|t| t.task_id)
        );
        Ok(result)
    }
}

/// 命令构造函数
pub type CommandFactory = fn(ActionType, ActionParameters) -> Result<Box<dyn Command>>;

/// 按操作类型查找命令实现
#[derive(Clone, Default)]
pub struct CommandRegistry {
    factories: HashMap<ActionType, CommandFactory>,
}

impl CommandRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置命令
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ActionType::TransferDiskImage, TransferDiskImageCommand::create);
        for action in [
            ActionType::AddVm,
            ActionType::AddVmFromScratch,
            ActionType::AddVmFromTemplate,
            ActionType::AddVmFromSnapshot,
        ] {
            registry.register(action, AddVmCommand::create);
        }
        registry.register(ActionType::RemoveVm, RemoveVmCommand::create);
        registry
    }

    pub fn register(&mut self, action: ActionType, factory: CommandFactory) {
        self.factories.insert(action, factory);
    }

    pub fn is_registered(&self, action: ActionType) -> bool {
        self.factories.contains_key(&action)
    }

    /// 构造命令，参数不完整时直接失败
    pub fn create(&self, action: ActionType, params: ActionParameters) -> Result<PreparedCommand> {
        let factory = self
            .factories
            .get(&action)
            .ok_or_else(|| CommandError::UnknownOperation(action.to_string()))?;
        PreparedCommand::new(factory(action, params)?)
    }
}

/// 参数变体与操作类型不匹配
pub(crate) fn mismatched(action: ActionType, params: &ActionParameters) -> CommandError {
    let kind = match params {
        ActionParameters::TransferDiskImage(_) => "transfer disk image",
        ActionParameters::AddVm(_) => "add vm",
        ActionParameters::RemoveVm(_) => "remove vm",
    };
    CommandError::invalid_parameters(action, format!("unexpected {} parameters", kind))
}
