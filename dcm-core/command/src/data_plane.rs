//! 存储数据面
//!
//! 真正的卷操作由外部组件完成，后台任务通过该 trait 调用它们。

use async_trait::async_trait;
use dcm_common::{DiskImage, Guid, ImageTransfer};
use tracing::debug;

#[async_trait]
pub trait StorageDataPlane: Send + Sync {
    /// 在存储域上分配空白卷
    async fn create_volume(&self, domain_id: Guid, image_id: Guid, size_bytes: u64)
        -> anyhow::Result<()>;

    /// 将源镜像复制为目标存储域上的新卷
    async fn copy_image(
        &self,
        source: &DiskImage,
        target_domain_id: Guid,
        target_image_id: Guid,
    ) -> anyhow::Result<()>;

    /// 执行一次镜像传输，返回已传输字节数
    async fn transfer(&self, transfer: &ImageTransfer) -> anyhow::Result<u64>;

    async fn delete_volume(&self, domain_id: Guid, image_id: Guid) -> anyhow::Result<()>;
}

/// 不做任何实际 I/O 的数据面
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDataPlane;

#[async_trait]
impl StorageDataPlane for NoopDataPlane {
    async fn create_volume(&self, domain_id: Guid, image_id: Guid, _: u64) -> anyhow::Result<()> {
        debug!("noop: create volume {} on {}", image_id, domain_id);
        Ok(())
    }

    async fn copy_image(
        &self,
        source: &DiskImage,
        target_domain_id: Guid,
        target_image_id: Guid,
    ) -> anyhow::Result<()> {
        debug!(
            "noop: copy image {} to {} on {}",
            source.image_id, target_image_id, target_domain_id
        );
        Ok(())
    }

    async fn transfer(&self, transfer: &ImageTransfer) -> anyhow::Result<u64> {
        Ok(transfer.bytes_total)
    }

    async fn delete_volume(&self, domain_id: Guid, image_id: Guid) -> anyhow::Result<()> {
        debug!("noop: delete volume {} on {}", image_id, domain_id);
        Ok(())
    }
}
