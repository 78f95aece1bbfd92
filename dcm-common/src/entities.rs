//! 业务实体
//!
//! 这些实体由外部持久层保存，命令只读取其快照，不跨调用缓存。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Guid;

// ============================================
// 磁盘镜像
// ============================================

/// 存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Nfs,
    Iscsi,
    Fcp,
    Localfs,
    Glusterfs,
    Posixfs,
}

/// 镜像状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageStatus {
    /// 可用
    Ok,
    /// 有操作正在进行
    Locked,
    /// 损坏或不完整
    Illegal,
}

/// 磁盘镜像
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskImage {
    /// 镜像 ID
    pub image_id: Guid,
    /// 所属磁盘 ID（镜像组）
    pub disk_id: Guid,
    /// 磁盘别名
    pub disk_alias: String,
    /// 是否为活动卷
    pub active: bool,
    /// 镜像状态
    pub image_status: ImageStatus,
    /// 所在存储域 ID 列表
    pub storage_ids: Vec<Guid>,
    /// 与 storage_ids 一一对应的存储类型
    pub storage_types: Vec<StorageType>,
    /// 虚拟大小（字节）
    pub size_bytes: u64,
    /// 父镜像（精简复制时指向模板镜像）
    pub parent_id: Option<Guid>,
    pub created_at: DateTime<Utc>,
}

impl DiskImage {
    /// 创建一个状态为 OK 的活动镜像
    pub fn new(
        image_id: Guid,
        disk_id: Guid,
        disk_alias: impl Into<String>,
        storage_domain_id: Guid,
        storage_type: StorageType,
        size_bytes: u64,
    ) -> Self {
        Self {
            image_id,
            disk_id,
            disk_alias: disk_alias.into(),
            active: true,
            image_status: ImageStatus::Ok,
            storage_ids: vec![storage_domain_id],
            storage_types: vec![storage_type],
            size_bytes,
            parent_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ImageStatus) -> Self {
        self.image_status = status;
        self
    }

    pub fn is_locked(&self) -> bool {
        self.image_status == ImageStatus::Locked
    }

    pub fn is_illegal(&self) -> bool {
        self.image_status == ImageStatus::Illegal
    }

    /// 镜像所在的首个存储域
    pub fn primary_storage_id(&self) -> Option<Guid> {
        self.storage_ids.first().copied()
    }

    /// (存储域, 存储类型) 对
    pub fn storage_pairs(&self) -> impl Iterator<Item = (Guid, StorageType)> + '_ {
        self.storage_ids
            .iter()
            .copied()
            .zip(self.storage_types.iter().copied())
    }
}

// ============================================
// 存储域
// ============================================

/// 存储域状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageDomainStatus {
    Active,
    Inactive,
    Locked,
    Maintenance,
    Unknown,
}

impl std::fmt::Display for StorageDomainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// 存储域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDomain {
    pub id: Guid,
    pub name: String,
    pub status: StorageDomainStatus,
    pub storage_type: StorageType,
    /// 可用空间（字节）
    pub available_bytes: u64,
}

impl StorageDomain {
    pub fn new(id: Guid, name: impl Into<String>, storage_type: StorageType) -> Self {
        Self {
            id,
            name: name.into(),
            status: StorageDomainStatus::Active,
            storage_type,
            available_bytes: u64::MAX,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == StorageDomainStatus::Active
    }
}

// ============================================
// 虚拟机
// ============================================

/// 虚拟机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmStatus {
    Down,
    Up,
    PoweringUp,
    PoweringDown,
    Paused,
    MigratingFrom,
    /// 磁盘正在创建或复制
    ImageLocked,
    Unknown,
}

impl VmStatus {
    pub fn is_down(&self) -> bool {
        matches!(self, Self::Down)
    }
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// 虚拟机
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    pub id: Guid,
    pub name: String,
    pub description: Option<String>,
    pub cluster_id: Guid,
    /// 来源模板，空白创建时为 None
    pub template_id: Option<Guid>,
    pub status: VmStatus,
    pub created_at: DateTime<Utc>,
}

impl Vm {
    pub fn new(id: Guid, name: impl Into<String>, cluster_id: Guid) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            cluster_id,
            template_id: None,
            status: VmStatus::Down,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: VmStatus) -> Self {
        self.status = status;
        self
    }
}

/// 磁盘与虚拟机的挂载关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskVmElement {
    pub disk_id: Guid,
    pub vm_id: Guid,
    /// 是否已热插入
    pub plugged: bool,
}

/// 虚拟机模板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmTemplate {
    pub id: Guid,
    pub name: String,
    pub cluster_id: Option<Guid>,
    /// 模板磁盘的镜像 ID
    pub disk_image_ids: Vec<Guid>,
}

/// 虚拟机快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Guid,
    pub vm_id: Guid,
    pub description: String,
    /// 快照包含的镜像 ID
    pub disk_image_ids: Vec<Guid>,
    pub created_at: DateTime<Utc>,
}

/// 集群
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Guid,
    pub name: String,
}

// ============================================
// 镜像传输会话
// ============================================

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// 传输阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Initializing,
    Transferring,
    FinishedSuccess,
    FinishedFailure,
}

impl TransferPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinishedSuccess | Self::FinishedFailure)
    }
}

/// 镜像传输会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTransfer {
    /// 会话 ID（即发起传输的命令 ID）
    pub id: Guid,
    pub disk_id: Guid,
    pub image_id: Guid,
    pub direction: TransferDirection,
    pub phase: TransferPhase,
    /// 数据代理地址
    pub proxy_url: String,
    /// 无活动超时（秒）
    pub inactivity_timeout_secs: u64,
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
