//! 镜像传输会话仓储

use async_trait::async_trait;
use dcm_common::{Guid, ImageTransfer, TransferPhase};

use crate::error::Result;

#[async_trait]
pub trait ImageTransferRepository: Send + Sync {
    /// 根据会话 ID 获取传输会话
    async fn get(&self, transfer_id: Guid) -> Result<ImageTransfer>;

    /// 保存新会话，同一 ID 已存在时返回 `AlreadyExists`
    async fn create(&self, transfer: ImageTransfer) -> Result<()>;

    /// 更新会话阶段与已传输字节数
    ///
    /// 已处于终止阶段的会话不可再变更，返回 `Conflict`。
    async fn update_phase(
        &self,
        transfer_id: Guid,
        phase: TransferPhase,
        bytes_sent: u64,
    ) -> Result<ImageTransfer>;
}
