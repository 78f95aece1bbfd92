//! 存储域仓储

use async_trait::async_trait;
use dcm_common::{Guid, StorageDomain};

use crate::error::Result;

#[async_trait]
pub trait StorageDomainRepository: Send + Sync {
    /// 根据 ID 获取存储域，不存在时返回 `NotFound`
    async fn get(&self, domain_id: Guid) -> Result<StorageDomain>;

    /// 插入或更新存储域
    async fn upsert(&self, domain: StorageDomain) -> Result<()>;
}
