//! 内存存储
//!
//! 所有仓储契约的进程内实现，用于测试和单节点部署。
//! 每张表各自持有一把读写锁，比较并交换在写锁内完成。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use dcm_common::{
    Cluster, DiskImage, DiskVmElement, Guid, ImageStatus, ImageTransfer, Snapshot, StorageDomain,
    TransferPhase, Vm, VmStatus, VmTemplate,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StorageError};
use crate::repositories::{
    ClusterRepository, DiskImageRepository, ImageTransferRepository, SnapshotRepository,
    StorageDomainRepository, VmRepository, VmTemplateRepository,
};

/// 内存存储
#[derive(Default)]
pub struct MemoryStore {
    disk_images: RwLock<HashMap<Guid, DiskImage>>,
    storage_domains: RwLock<HashMap<Guid, StorageDomain>>,
    vms: RwLock<HashMap<Guid, Vm>>,
    disk_vm_elements: RwLock<Vec<DiskVmElement>>,
    templates: RwLock<HashMap<Guid, VmTemplate>>,
    snapshots: RwLock<HashMap<Guid, Snapshot>>,
    clusters: RwLock<HashMap<Guid, Cluster>>,
    image_transfers: RwLock<HashMap<Guid, ImageTransfer>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiskImageRepository for MemoryStore {
    async fn get(&self, image_id: Guid) -> Result<DiskImage> {
        self.disk_images
            .read()
            .await
            .get(&image_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("disk image", image_id))
    }

    async fn get_by_disk_id(&self, disk_id: Guid) -> Result<Vec<DiskImage>> {
        let images = self.disk_images.read().await;
        let mut found: Vec<DiskImage> = images
            .values()
            .filter(|image| image.disk_id == disk_id)
            .cloned()
            .collect();
        found.sort_by_key(|image| image.created_at);
        Ok(found)
    }

    async fn insert(&self, image: DiskImage) -> Result<()> {
        let mut images = self.disk_images.write().await;
        if images.contains_key(&image.image_id) {
            return Err(StorageError::AlreadyExists(format!(
                "disk image {}",
                image.image_id
            )));
        }
        debug!("Inserted disk image: {}", image.image_id);
        images.insert(image.image_id, image);
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        image_id: Guid,
        expected: ImageStatus,
        new: ImageStatus,
    ) -> Result<DiskImage> {
        let mut images = self.disk_images.write().await;
        let image = images
            .get_mut(&image_id)
            .ok_or_else(|| StorageError::not_found("disk image", image_id))?;

        if image.image_status != expected {
            return Err(StorageError::Conflict(format!(
                "disk image {} is {:?}, expected {:?}",
                image_id, image.image_status, expected
            )));
        }

        image.image_status = new;
        debug!("Disk image {} status {:?} -> {:?}", image_id, expected, new);
        Ok(image.clone())
    }

    async fn remove(&self, image_id: Guid) -> Result<()> {
        self.disk_images
            .write()
            .await
            .remove(&image_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("disk image", image_id))
    }
}

#[async_trait]
impl StorageDomainRepository for MemoryStore {
    async fn get(&self, domain_id: Guid) -> Result<StorageDomain> {
        self.storage_domains
            .read()
            .await
            .get(&domain_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("storage domain", domain_id))
    }

    async fn upsert(&self, domain: StorageDomain) -> Result<()> {
        debug!("Upserted storage domain: {}", domain.id);
        self.storage_domains.write().await.insert(domain.id, domain);
        Ok(())
    }
}

#[async_trait]
impl VmRepository for MemoryStore {
    async fn get(&self, vm_id: Guid) -> Result<Vm> {
        self.vms
            .read()
            .await
            .get(&vm_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("vm", vm_id))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Vm>> {
        Ok(self
            .vms
            .read()
            .await
            .values()
            .find(|vm| vm.name == name)
            .cloned())
    }

    async fn insert(&self, vm: Vm) -> Result<()> {
        let mut vms = self.vms.write().await;
        if vms.contains_key(&vm.id) {
            return Err(StorageError::AlreadyExists(format!("vm {}", vm.id)));
        }
        debug!("Inserted vm: {} ({})", vm.id, vm.name);
        vms.insert(vm.id, vm);
        Ok(())
    }

    async fn update_status(&self, vm_id: Guid, status: VmStatus) -> Result<Vm> {
        let mut vms = self.vms.write().await;
        let vm = vms
            .get_mut(&vm_id)
            .ok_or_else(|| StorageError::not_found("vm", vm_id))?;
        vm.status = status;
        Ok(vm.clone())
    }

    async fn remove(&self, vm_id: Guid) -> Result<()> {
        self.vms
            .write()
            .await
            .remove(&vm_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("vm", vm_id))
    }

    async fn attach_disk(&self, element: DiskVmElement) -> Result<()> {
        let mut elements = self.disk_vm_elements.write().await;
        if elements
            .iter()
            .any(|e| e.disk_id == element.disk_id && e.vm_id == element.vm_id)
        {
            return Err(StorageError::AlreadyExists(format!(
                "disk {} on vm {}",
                element.disk_id, element.vm_id
            )));
        }
        elements.push(element);
        Ok(())
    }

    async fn get_elements_for_disk(&self, disk_id: Guid) -> Result<Vec<DiskVmElement>> {
        Ok(self
            .disk_vm_elements
            .read()
            .await
            .iter()
            .filter(|e| e.disk_id == disk_id)
            .cloned()
            .collect())
    }

    async fn get_elements_for_vm(&self, vm_id: Guid) -> Result<Vec<DiskVmElement>> {
        Ok(self
            .disk_vm_elements
            .read()
            .await
            .iter()
            .filter(|e| e.vm_id == vm_id)
            .cloned()
            .collect())
    }

    async fn detach_all_disks(&self, vm_id: Guid) -> Result<Vec<DiskVmElement>> {
        let mut elements = self.disk_vm_elements.write().await;
        let (detached, kept): (Vec<_>, Vec<_>) =
            elements.drain(..).partition(|e| e.vm_id == vm_id);
        *elements = kept;
        Ok(detached)
    }
}

#[async_trait]
impl VmTemplateRepository for MemoryStore {
    async fn get(&self, template_id: Guid) -> Result<VmTemplate> {
        self.templates
            .read()
            .await
            .get(&template_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("template", template_id))
    }

    async fn upsert(&self, template: VmTemplate) -> Result<()> {
        self.templates.write().await.insert(template.id, template);
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for MemoryStore {
    async fn get(&self, snapshot_id: Guid) -> Result<Snapshot> {
        self.snapshots
            .read()
            .await
            .get(&snapshot_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("snapshot", snapshot_id))
    }

    async fn upsert(&self, snapshot: Snapshot) -> Result<()> {
        self.snapshots.write().await.insert(snapshot.id, snapshot);
        Ok(())
    }
}

#[async_trait]
impl ClusterRepository for MemoryStore {
    async fn get(&self, cluster_id: Guid) -> Result<Cluster> {
        self.clusters
            .read()
            .await
            .get(&cluster_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("cluster", cluster_id))
    }

    async fn upsert(&self, cluster: Cluster) -> Result<()> {
        self.clusters.write().await.insert(cluster.id, cluster);
        Ok(())
    }
}

#[async_trait]
impl ImageTransferRepository for MemoryStore {
    async fn get(&self, transfer_id: Guid) -> Result<ImageTransfer> {
        self.image_transfers
            .read()
            .await
            .get(&transfer_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("image transfer", transfer_id))
    }

    async fn create(&self, transfer: ImageTransfer) -> Result<()> {
        let mut transfers = self.image_transfers.write().await;
        if transfers.contains_key(&transfer.id) {
            return Err(StorageError::AlreadyExists(format!(
                "image transfer {}",
                transfer.id
            )));
        }
        debug!(
            "Created image transfer {} for image {}",
            transfer.id, transfer.image_id
        );
        transfers.insert(transfer.id, transfer);
        Ok(())
    }

    async fn update_phase(
        &self,
        transfer_id: Guid,
        phase: TransferPhase,
        bytes_sent: u64,
    ) -> Result<ImageTransfer> {
        let mut transfers = self.image_transfers.write().await;
        let transfer = transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| StorageError::not_found("image transfer", transfer_id))?;

        if transfer.phase.is_terminal() {
            return Err(StorageError::Conflict(format!(
                "image transfer {} already ended in {:?}",
                transfer_id, transfer.phase
            )));
        }

        transfer.phase = phase;
        transfer.bytes_sent = bytes_sent;
        transfer.updated_at = Utc::now();
        Ok(transfer.clone())
    }
}
