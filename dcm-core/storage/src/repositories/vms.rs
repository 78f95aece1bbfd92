//! 虚拟机仓储
//!
//! 同时维护磁盘与虚拟机之间的挂载关系。

use async_trait::async_trait;
use dcm_common::{DiskVmElement, Guid, Vm, VmStatus};

use crate::error::Result;

#[async_trait]
pub trait VmRepository: Send + Sync {
    /// 根据 ID 获取虚拟机，不存在时返回 `NotFound`
    async fn get(&self, vm_id: Guid) -> Result<Vm>;

    /// 根据名称查找虚拟机
    async fn get_by_name(&self, name: &str) -> Result<Option<Vm>>;

    /// 插入新虚拟机
    async fn insert(&self, vm: Vm) -> Result<()>;

    /// 更新虚拟机状态，返回更新后的快照
    async fn update_status(&self, vm_id: Guid, status: VmStatus) -> Result<Vm>;

    /// 删除虚拟机
    async fn remove(&self, vm_id: Guid) -> Result<()>;

    /// 将磁盘挂载到虚拟机
    async fn attach_disk(&self, element: DiskVmElement) -> Result<()>;

    /// 查询挂载了指定磁盘的全部关系
    async fn get_elements_for_disk(&self, disk_id: Guid) -> Result<Vec<DiskVmElement>>;

    /// 查询虚拟机的全部磁盘挂载关系
    async fn get_elements_for_vm(&self, vm_id: Guid) -> Result<Vec<DiskVmElement>>;

    /// 卸载虚拟机的全部磁盘，返回被移除的关系
    async fn detach_all_disks(&self, vm_id: Guid) -> Result<Vec<DiskVmElement>>;
}
