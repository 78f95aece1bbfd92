//! 磁盘镜像仓储

use async_trait::async_trait;
use dcm_common::{DiskImage, Guid, ImageStatus};

use crate::error::Result;

/// 磁盘镜像仓储
///
/// 镜像的锁状态以此处记录为准。并发命令之间的互斥依赖
/// [`compare_and_set_status`](DiskImageRepository::compare_and_set_status)
/// 的原子性，而不是命令进程内的共享状态。
#[async_trait]
pub trait DiskImageRepository: Send + Sync {
    /// 根据镜像 ID 获取镜像，不存在时返回 `NotFound`
    async fn get(&self, image_id: Guid) -> Result<DiskImage>;

    /// 获取某个磁盘（镜像组）下的全部镜像
    async fn get_by_disk_id(&self, disk_id: Guid) -> Result<Vec<DiskImage>>;

    /// 插入新镜像，ID 已存在时返回 `AlreadyExists`
    async fn insert(&self, image: DiskImage) -> Result<()>;

    /// 原子地将状态从 `expected` 切换为 `new`
    ///
    /// 当前状态不是 `expected` 时返回 `Conflict`。
    async fn compare_and_set_status(
        &self,
        image_id: Guid,
        expected: ImageStatus,
        new: ImageStatus,
    ) -> Result<DiskImage>;

    /// 删除镜像
    async fn remove(&self, image_id: Guid) -> Result<()>;
}
