//! 命令类型与参数

use dcm_common::{Guid, TransferDirection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CommandError;

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    TransferDiskImage,
    /// 基于模板的精简创建，同步完成
    AddVm,
    AddVmFromScratch,
    AddVmFromTemplate,
    AddVmFromSnapshot,
    RemoveVm,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        Self::TransferDiskImage,
        Self::AddVm,
        Self::AddVmFromScratch,
        Self::AddVmFromTemplate,
        Self::AddVmFromSnapshot,
        Self::RemoveVm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransferDiskImage => "TransferDiskImage",
            Self::AddVm => "AddVm",
            Self::AddVmFromScratch => "AddVmFromScratch",
            Self::AddVmFromTemplate => "AddVmFromTemplate",
            Self::AddVmFromSnapshot => "AddVmFromSnapshot",
            Self::RemoveVm => "RemoveVm",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CommandError::UnknownOperation(s.to_string()))
    }
}

/// 命令参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionParameters {
    TransferDiskImage(TransferDiskImageParameters),
    AddVm(AddVmParameters),
    RemoveVm(RemoveVmParameters),
}

impl From<TransferDiskImageParameters> for ActionParameters {
    fn from(params: TransferDiskImageParameters) -> Self {
        Self::TransferDiskImage(params)
    }
}

impl From<AddVmParameters> for ActionParameters {
    fn from(params: AddVmParameters) -> Self {
        Self::AddVm(params)
    }
}

impl From<RemoveVmParameters> for ActionParameters {
    fn from(params: RemoveVmParameters) -> Self {
        Self::RemoveVm(params)
    }
}

// ============================================
// 镜像传输
// ============================================

/// 新建镜像的预分配信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewImageSpec {
    pub image_id: Guid,
    pub disk_id: Guid,
    pub alias: String,
    pub size_bytes: u64,
}

/// 镜像传输参数
///
/// 带 `image_id` 表示传输已有镜像，否则先按 `new_image` 新建。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDiskImageParameters {
    pub image_id: Option<Guid>,
    /// 已有镜像所属的磁盘
    pub image_group_id: Option<Guid>,
    pub storage_domain_id: Option<Guid>,
    pub new_image: Option<NewImageSpec>,
    #[serde(default = "default_direction")]
    pub direction: TransferDirection,
    /// 跳过「磁盘插在运行中虚拟机上」的检查
    #[serde(default)]
    pub force: bool,
}

fn default_direction() -> TransferDirection {
    TransferDirection::Upload
}

impl TransferDiskImageParameters {
    /// 传输已有镜像
    pub fn for_existing_image(image_id: Guid, image_group_id: Guid) -> Self {
        Self {
            image_id: Some(image_id),
            image_group_id: Some(image_group_id),
            storage_domain_id: None,
            new_image: None,
            direction: default_direction(),
            force: false,
        }
    }

    /// 上传到新建镜像
    pub fn for_new_image(storage_domain_id: Guid, new_image: NewImageSpec) -> Self {
        Self {
            image_id: None,
            image_group_id: None,
            storage_domain_id: Some(storage_domain_id),
            new_image: Some(new_image),
            direction: TransferDirection::Upload,
            force: false,
        }
    }

    pub fn storage_domain(mut self, domain_id: Guid) -> Self {
        self.storage_domain_id = Some(domain_id);
        self
    }

    pub fn direction(mut self, direction: TransferDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// 是否传输调用方提供的已有镜像
    pub fn has_supplied_image(&self) -> bool {
        self.image_id.is_some()
    }
}

// ============================================
// 虚拟机创建 / 删除
// ============================================

/// 空白创建时的新磁盘
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDiskSpec {
    pub image_id: Guid,
    pub disk_id: Guid,
    pub alias: String,
    pub size_bytes: u64,
}

impl NewDiskSpec {
    pub fn new(alias: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            image_id: Guid::new_guid(),
            disk_id: Guid::new_guid(),
            alias: alias.into(),
            size_bytes,
        }
    }
}

/// 虚拟机创建参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddVmParameters {
    /// 预分配的虚拟机 ID
    pub vm_id: Guid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub cluster_id: Guid,
    #[serde(default)]
    pub template_id: Option<Guid>,
    #[serde(default)]
    pub snapshot_id: Option<Guid>,
    /// 新磁盘的目标存储域，缺省时沿用源镜像所在的存储域
    #[serde(default)]
    pub storage_domain_id: Option<Guid>,
    #[serde(default)]
    pub disks: Vec<NewDiskSpec>,
}

impl AddVmParameters {
    pub fn new(name: impl Into<String>, cluster_id: Guid) -> Self {
        Self {
            vm_id: Guid::new_guid(),
            name: name.into(),
            description: None,
            cluster_id,
            template_id: None,
            snapshot_id: None,
            storage_domain_id: None,
            disks: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn template(mut self, template_id: Guid) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn snapshot(mut self, snapshot_id: Guid) -> Self {
        self.snapshot_id = Some(snapshot_id);
        self
    }

    pub fn storage_domain(mut self, domain_id: Guid) -> Self {
        self.storage_domain_id = Some(domain_id);
        self
    }

    pub fn disk(mut self, disk: NewDiskSpec) -> Self {
        self.disks.push(disk);
        self
    }
}

/// 虚拟机删除参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveVmParameters {
    pub vm_id: Guid,
    /// 允许删除镜像锁定中的虚拟机
    #[serde(default)]
    pub force: bool,
    /// 同时删除磁盘
    #[serde(default = "default_remove_disks")]
    pub remove_disks: bool,
}

fn default_remove_disks() -> bool {
    true
}

impl RemoveVmParameters {
    pub fn new(vm_id: Guid) -> Self {
        Self {
            vm_id,
            force: false,
            remove_disks: default_remove_disks(),
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn remove_disks(mut self, remove: bool) -> Self {
        self.remove_disks = remove;
        self
    }
}
