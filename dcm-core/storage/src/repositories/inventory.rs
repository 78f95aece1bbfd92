//! 模板、快照、集群仓储

use async_trait::async_trait;
use dcm_common::{Cluster, Guid, Snapshot, VmTemplate};

use crate::error::Result;

#[async_trait]
pub trait VmTemplateRepository: Send + Sync {
    async fn get(&self, template_id: Guid) -> Result<VmTemplate>;
    async fn upsert(&self, template: VmTemplate) -> Result<()>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn get(&self, snapshot_id: Guid) -> Result<Snapshot>;
    async fn upsert(&self, snapshot: Snapshot) -> Result<()>;
}

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn get(&self, cluster_id: Guid) -> Result<Cluster>;
    async fn upsert(&self, cluster: Cluster) -> Result<()>;
}
