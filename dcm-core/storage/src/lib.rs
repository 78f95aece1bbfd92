//! DCM 存储层
//!
//! 定义命令引擎消费的仓储契约，并提供进程内的内存实现。

mod error;
mod memory;
mod repositories;

pub use error::{OptionalExt, Result, StorageError};
pub use memory::MemoryStore;
pub use repositories::*;

use std::sync::Arc;

/// 统一的数据访问层入口
#[derive(Clone)]
pub struct Repositories {
    disk_images: Arc<dyn DiskImageRepository>,
    storage_domains: Arc<dyn StorageDomainRepository>,
    vms: Arc<dyn VmRepository>,
    templates: Arc<dyn VmTemplateRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    clusters: Arc<dyn ClusterRepository>,
    image_transfers: Arc<dyn ImageTransferRepository>,
}

impl Repositories {
    /// 所有仓储共享同一个内存存储
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            disk_images: store.clone(),
            storage_domains: store.clone(),
            vms: store.clone(),
            templates: store.clone(),
            snapshots: store.clone(),
            clusters: store.clone(),
            image_transfers: store,
        }
    }

    /// 替换镜像仓储
    pub fn with_disk_images(mut self, repo: Arc<dyn DiskImageRepository>) -> Self {
        self.disk_images = repo;
        self
    }

    /// 替换存储域仓储
    pub fn with_storage_domains(mut self, repo: Arc<dyn StorageDomainRepository>) -> Self {
        self.storage_domains = repo;
        self
    }

    /// 替换虚拟机仓储
    pub fn with_vms(mut self, repo: Arc<dyn VmRepository>) -> Self {
        self.vms = repo;
        self
    }

    /// 替换传输会话仓储
    pub fn with_image_transfers(mut self, repo: Arc<dyn ImageTransferRepository>) -> Self {
        self.image_transfers = repo;
        self
    }

    /// 获取镜像仓储
    pub fn disk_images(&self) -> &Arc<dyn DiskImageRepository> {
        &self.disk_images
    }

    /// 获取存储域仓储
    pub fn storage_domains(&self) -> &Arc<dyn StorageDomainRepository> {
        &self.storage_domains
    }

    /// 获取虚拟机仓储
    pub fn vms(&self) -> &Arc<dyn VmRepository> {
        &self.vms
    }

    /// 获取模板仓储
    pub fn templates(&self) -> &Arc<dyn VmTemplateRepository> {
        &self.templates
    }

    /// 获取快照仓储
    pub fn snapshots(&self) -> &Arc<dyn SnapshotRepository> {
        &self.snapshots
    }

    /// 获取集群仓储
    pub fn clusters(&self) -> &Arc<dyn ClusterRepository> {
        &self.clusters
    }

    /// 获取传输会话仓储
    pub fn image_transfers(&self) -> &Arc<dyn ImageTransferRepository> {
        &self.image_transfers
    }
}
