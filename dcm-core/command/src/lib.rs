//! DCM 命令引擎
//!
//! 对共享基础设施资源（磁盘镜像、存储域、虚拟机）的变更操作都以命令形式运行：
//! 计算权限主体，按固定顺序求值校验链，校验通过后执行，并可提交后台任务。
//! 调用方通过轮询任务得到 PENDING / IN_PROGRESS / COMPLETE 创建状态。

mod backend;
mod commands;
mod config;
mod context;
mod data_plane;
mod error;
mod message;
mod parameters;
mod permission;
mod status;
mod validation;
pub mod validator;

pub use backend::{ActionReturnValue, Backend};
pub use commands::{
    AddVmCommand, Command, CommandFactory, CommandRegistry, ExecutionResult, PreparedCommand,
    RemoveVmCommand, TransferDiskImageCommand, Validation, ValidatedCommand,
};
pub use config::{EngineConfig, PermissionConfig, TransferConfig};
pub use context::CommandContext;
pub use data_plane::{NoopDataPlane, StorageDataPlane};
pub use error::{CommandError, Result};
pub use message::EngineMessage;
pub use parameters::{
    ActionParameters, ActionType, AddVmParameters, NewDiskSpec, NewImageSpec,
    RemoveVmParameters, TransferDiskImageParameters,
};
pub use permission::{AllowAll, PermissionChecker, PermissionSubject};
pub use status::{aggregate_creation_status, project_status, CreationStatus};
pub use validation::{evaluate_chain, ValidationOutcome, ValidationResult, ValidationRule};
