//! 校验失败原因码

use serde::{Deserialize, Serialize};
use std::fmt;

/// 引擎消息（校验失败原因码）
///
/// 序列化形式是原因码本身，例如 `DISKS_LOCKED`；
/// [`EngineMessage::message_key`] 给出面向展示层的完整消息键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineMessage {
    // 磁盘
    DiskNotExist,
    DisksLocked,
    DisksIllegal,
    DiskPluggedToNonDownVms,
    DiskAlreadyExists,

    // 存储域
    StorageDomainStatusIllegal2,
    DiskSpaceLowOnStorageDomain,

    // 虚拟机
    ClusterCanNotBeEmpty,
    NameAlreadyUsed,
    NameMayNotBeEmpty,
    NameMayNotContainSpecialChars,
    NameLengthIsTooLong,
    TemplateDoesNotExist,
    VmSnapshotDoesNotExist,
    VmNotFound,
    VmIsRunning,
    VmIsLocked,

    // 权限
    UserNotAuthorizedToPerformAction,
}

impl EngineMessage {
    /// 原因码
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiskNotExist => "DISK_NOT_EXIST",
            Self::DisksLocked => "DISKS_LOCKED",
            Self::DisksIllegal => "DISKS_ILLEGAL",
            Self::DiskPluggedToNonDownVms => "DISK_PLUGGED_TO_NON_DOWN_VMS",
            Self::DiskAlreadyExists => "DISK_ALREADY_EXISTS",
            Self::StorageDomainStatusIllegal2 => "STORAGE_DOMAIN_STATUS_ILLEGAL2",
            Self::DiskSpaceLowOnStorageDomain => "DISK_SPACE_LOW_ON_STORAGE_DOMAIN",
            Self::ClusterCanNotBeEmpty => "CLUSTER_CAN_NOT_BE_EMPTY",
            Self::NameAlreadyUsed => "NAME_ALREADY_USED",
            Self::NameMayNotBeEmpty => "NAME_MAY_NOT_BE_EMPTY",
            Self::NameMayNotContainSpecialChars => "NAME_MAY_NOT_CONTAIN_SPECIAL_CHARS",
            Self::NameLengthIsTooLong => "NAME_LENGTH_IS_TOO_LONG",
            Self::TemplateDoesNotExist => "TEMPLATE_DOES_NOT_EXIST",
            Self::VmSnapshotDoesNotExist => "VM_SNAPSHOT_DOES_NOT_EXIST",
            Self::VmNotFound => "VM_NOT_FOUND",
            Self::VmIsRunning => "VM_IS_RUNNING",
            Self::VmIsLocked => "VM_IS_LOCKED",
            Self::UserNotAuthorizedToPerformAction => "USER_NOT_AUTHORIZED_TO_PERFORM_ACTION",
        }
    }

    /// 完整消息键，权限失败之外的原因都带 `ACTION_TYPE_FAILED_` 前缀
    pub fn message_key(&self) -> String {
        match self {
            Self::UserNotAuthorizedToPerformAction => self.as_str().to_string(),
            other => format!("ACTION_TYPE_FAILED_{}", other.as_str()),
        }
    }
}

impl fmt::Display for EngineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
