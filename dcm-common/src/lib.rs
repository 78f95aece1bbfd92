//! DCM 通用类型定义
//!
//! 此 crate 包含存储层、任务层和命令引擎之间共享的标识符与业务实体。

mod entities;

pub use entities::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 全局唯一标识符
///
/// 所有业务实体（镜像、存储域、虚拟机、任务、命令）都使用该类型作为主键。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(Uuid);

impl Guid {
    /// 空标识符（全零）
    pub const EMPTY: Guid = Guid(Uuid::nil());

    /// 生成新的随机标识符
    pub fn new_guid() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Guid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// 权限检查的对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    System,
    Cluster,
    Storage,
    Disk,
    Vm,
    VmTemplate,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::Cluster => "Cluster",
            Self::Storage => "Storage",
            Self::Disk => "Disk",
            Self::Vm => "VM",
            Self::VmTemplate => "VmTemplate",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 操作权限组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionGroup {
    CreateVm,
    DeleteVm,
    CreateDisk,
    EditDiskProperties,
}

impl ActionGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateVm => "CREATE_VM",
            Self::DeleteVm => "DELETE_VM",
            Self::CreateDisk => "CREATE_DISK",
            Self::EditDiskProperties => "EDIT_DISK_PROPERTIES",
        }
    }
}

impl fmt::Display for ActionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
