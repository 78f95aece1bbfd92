// 测试公共设施：记录型仓储、脚本化任务执行器、权限检查与数据面替身
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dcm_command::{
    Backend, CommandContext, CreationStatus, PermissionChecker, PermissionSubject,
    StorageDataPlane,
};
use dcm_common::{
    Cluster, DiskImage, DiskVmElement, Guid, ImageStatus, ImageTransfer, StorageDomain,
    StorageDomainStatus, StorageType, TransferPhase, Vm, VmStatus, VmTemplate,
};
use dcm_storage::{
    DiskImageRepository, ImageTransferRepository, MemoryStore, Repositories, Result, StorageError,
};
use dcm_tasks::{
    AsyncTaskRunner, AsyncTaskStatus, TaskError, TaskHandle, TaskManager, TaskManagerConfig,
    TaskState, TaskWork,
};
use tokio::sync::Semaphore;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================
// 记录型仓储
// ============================================

/// 统计新建镜像次数，可配置为拒绝插入
pub struct RecordingDiskImages {
    inner: Arc<MemoryStore>,
    inserts: AtomicUsize,
    reject_inserts: AtomicBool,
}

impl RecordingDiskImages {
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn reject_inserts(&self) {
        self.reject_inserts.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DiskImageRepository for RecordingDiskImages {
    async fn get(&self, image_id: Guid) -> Result<DiskImage> {
        DiskImageRepository::get(self.inner.as_ref(), image_id).await
    }

    async fn get_by_disk_id(&self, disk_id: Guid) -> Result<Vec<DiskImage>> {
        self.inner.get_by_disk_id(disk_id).await
    }

    async fn insert(&self, image: DiskImage) -> Result<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.reject_inserts.load(Ordering::SeqCst) {
            return Err(StorageError::Conflict(format!("disk image {}", image.image_id)));
        }
        self.inner.insert(image).await
    }

    async fn compare_and_set_status(
        &self,
        image_id: Guid,
        expected: ImageStatus,
        new: ImageStatus,
    ) -> Result<DiskImage> {
        self.inner
            .compare_and_set_status(image_id, expected, new)
            .await
    }

    async fn remove(&self, image_id: Guid) -> Result<()> {
        DiskImageRepository::remove(self.inner.as_ref(), image_id).await
    }
}

/// 统计传输会话建立次数，可配置为拒绝阶段更新
pub struct RecordingTransfers {
    inner: Arc<MemoryStore>,
    creates: AtomicUsize,
    reject_phase_updates: AtomicBool,
}

impl RecordingTransfers {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn reject_phase_updates(&self) {
        self.reject_phase_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageTransferRepository for RecordingTransfers {
    async fn get(&self, transfer_id: Guid) -> Result<ImageTransfer> {
        ImageTransferRepository::get(self.inner.as_ref(), transfer_id).await
    }

    async fn create(&self, transfer: ImageTransfer) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(transfer).await
    }

    async fn update_phase(
        &self,
        transfer_id: Guid,
        phase: TransferPhase,
        bytes_sent: u64,
    ) -> Result<ImageTransfer> {
        if self.reject_phase_updates.load(Ordering::SeqCst) {
            return Err(StorageError::Conflict(format!("image transfer {}", transfer_id)));
        }
        self.inner
            .update_phase(transfer_id, phase, bytes_sent)
            .await
    }
}

// ============================================
// 任务执行器
// ============================================

/// 手动推进状态的任务执行器
///
/// 提交的工作不会自动运行，测试通过 `set_state` 或 `run_pending` 推进。
#[derive(Default)]
pub struct ScriptedTaskRunner {
    statuses: Mutex<HashMap<Guid, AsyncTaskStatus>>,
    pending: Mutex<Vec<(TaskHandle, TaskWork)>>,
    reject: AtomicBool,
}

impl ScriptedTaskRunner {
    /// 之后的提交都以关联 ID 已有活动任务为由被拒绝
    pub fn reject_enqueue(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn set_state(&self, handle: &TaskHandle, state: TaskState) {
        let mut statuses = self.statuses.lock().unwrap();
        let status = statuses.get_mut(&handle.task_id).unwrap();
        status.state = state;
        if state == TaskState::Failed {
            status.error = Some("scripted failure".into());
        }
    }

    pub fn enqueued(&self) -> usize {
        self.statuses.lock().unwrap().len()
    }

    /// 依次运行全部挂起的工作
    pub async fn run_pending(&self) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for (handle, work) in pending {
            let state = match work.await {
                Ok(()) => TaskState::Finished,
                Err(_) => TaskState::Failed,
            };
            self.set_state(&handle, state);
        }
    }
}

#[async_trait]
impl AsyncTaskRunner for ScriptedTaskRunner {
    async fn enqueue(
        &self,
        correlation_id: Guid,
        work: TaskWork,
    ) -> std::result::Result<TaskHandle, TaskError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(TaskError::AlreadyActive {
                correlation_id,
                task_id: Guid::new_guid(),
            });
        }
        let handle = TaskHandle {
            task_id: Guid::new_guid(),
            correlation_id,
        };
        self.statuses
            .lock()
            .unwrap()
            .insert(handle.task_id, AsyncTaskStatus::queued(handle));
        self.pending.lock().unwrap().push((handle, work));
        Ok(handle)
    }

    async fn poll(&self, handle: &TaskHandle) -> std::result::Result<AsyncTaskStatus, TaskError> {
        self.statuses
            .lock()
            .unwrap()
            .get(&handle.task_id)
            .cloned()
            .ok_or(TaskError::NotFound(handle.task_id))
    }
}

// ============================================
// 权限检查
// ============================================

pub struct DenyAll;

#[async_trait]
impl PermissionChecker for DenyAll {
    async fn is_authorized(&self, _: Guid, _: &[PermissionSubject]) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// 记录收到的权限主体
#[derive(Default)]
pub struct RecordingChecker {
    pub seen: Mutex<Vec<PermissionSubject>>,
}

#[async_trait]
impl PermissionChecker for RecordingChecker {
    async fn is_authorized(
        &self,
        _: Guid,
        subjects: &[PermissionSubject],
    ) -> anyhow::Result<bool> {
        self.seen.lock().unwrap().extend_from_slice(subjects);
        Ok(true)
    }
}

// ============================================
// 数据面
// ============================================

/// 传输在开闸前阻塞，可配置为失败
pub struct GatedDataPlane {
    gate: Semaphore,
    fail: bool,
}

impl GatedDataPlane {
    pub fn new(fail: bool) -> Self {
        Self {
            gate: Semaphore::new(0),
            fail,
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1024);
    }

    async fn pass(&self, what: &str) -> anyhow::Result<()> {
        let _permit = self.gate.acquire().await?;
        if self.fail {
            anyhow::bail!("{} failed", what);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageDataPlane for GatedDataPlane {
    async fn create_volume(&self, _: Guid, _: Guid, _: u64) -> anyhow::Result<()> {
        self.pass("create volume").await
    }

    async fn copy_image(&self, _: &DiskImage, _: Guid, _: Guid) -> anyhow::Result<()> {
        self.pass("copy image").await
    }

    async fn transfer(&self, transfer: &ImageTransfer) -> anyhow::Result<u64> {
        self.pass("transfer").await?;
        Ok(transfer.bytes_total)
    }

    async fn delete_volume(&self, _: Guid, _: Guid) -> anyhow::Result<()> {
        self.pass("delete volume").await
    }
}

// ============================================
// 测试夹具
// ============================================

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub repos: Repositories,
    pub disk_images: Arc<RecordingDiskImages>,
    pub transfers: Arc<RecordingTransfers>,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let disk_images = Arc::new(RecordingDiskImages {
            inner: store.clone(),
            inserts: AtomicUsize::new(0),
            reject_inserts: AtomicBool::new(false),
        });
        let transfers = Arc::new(RecordingTransfers {
            inner: store.clone(),
            creates: AtomicUsize::new(0),
            reject_phase_updates: AtomicBool::new(false),
        });
        let repos = Repositories::in_memory(store.clone())
            .with_disk_images(disk_images.clone())
            .with_image_transfers(transfers.clone());

        Self {
            store,
            repos,
            disk_images,
            transfers,
        }
    }

    /// 使用脚本化任务执行器的后端
    pub fn scripted_backend(&self) -> (Backend, Arc<ScriptedTaskRunner>) {
        let tasks = Arc::new(ScriptedTaskRunner::default());
        let context = CommandContext::new(self.repos.clone(), tasks.clone());
        (Backend::new(context), tasks)
    }

    /// 使用真实任务执行器的后端
    pub fn backend_with(&self, data_plane: Arc<dyn StorageDataPlane>) -> Backend {
        let tasks = Arc::new(TaskManager::new(TaskManagerConfig::default()));
        let context = CommandContext::new(self.repos.clone(), tasks).with_data_plane(data_plane);
        Backend::new(context)
    }

    pub async fn add_domain(&self, status: StorageDomainStatus, available_bytes: u64) -> StorageDomain {
        let mut domain = StorageDomain::new(Guid::new_guid(), "data1", StorageType::Nfs);
        domain.status = status;
        domain.available_bytes = available_bytes;
        self.repos.storage_domains().upsert(domain.clone()).await.unwrap();
        domain
    }

    pub async fn add_image(&self, domain: &StorageDomain, alias: &str, status: ImageStatus) -> DiskImage {
        let image = DiskImage::new(
            Guid::new_guid(),
            Guid::new_guid(),
            alias,
            domain.id,
            domain.storage_type,
            1 << 30,
        )
        .with_status(status);
        self.store.insert(image.clone()).await.unwrap();
        image
    }

    /// 同一磁盘下的另一个镜像（快照链上的一层）
    pub async fn add_sibling(&self, image: &DiskImage, status: ImageStatus) -> DiskImage {
        let mut sibling = image.clone().with_status(status);
        sibling.image_id = Guid::new_guid();
        sibling.parent_id = Some(image.image_id);
        self.store.insert(sibling.clone()).await.unwrap();
        sibling
    }

    pub async fn add_cluster(&self) -> Cluster {
        let cluster = Cluster {
            id: Guid::new_guid(),
            name: "default".into(),
        };
        self.repos.clusters().upsert(cluster.clone()).await.unwrap();
        cluster
    }

    pub async fn add_vm(&self, name: &str, status: VmStatus) -> Vm {
        let vm = Vm::new(Guid::new_guid(), name, Guid::new_guid()).with_status(status);
        self.repos.vms().insert(vm.clone()).await.unwrap();
        vm
    }

    pub async fn plug(&self, image: &DiskImage, vm: &Vm) {
        self.repos
            .vms()
            .attach_disk(DiskVmElement {
                disk_id: image.disk_id,
                vm_id: vm.id,
                plugged: true,
            })
            .await
            .unwrap();
    }

    pub async fn add_template(&self, images: &[&DiskImage]) -> VmTemplate {
        let template = VmTemplate {
            id: Guid::new_guid(),
            name: "base".into(),
            cluster_id: None,
            disk_image_ids: images.iter().map(|i| i.image_id).collect(),
        };
        self.repos.templates().upsert(template.clone()).await.unwrap();
        template
    }

    pub async fn image_status(&self, image_id: Guid) -> ImageStatus {
        DiskImageRepository::get(self.store.as_ref(), image_id)
            .await
            .unwrap()
            .image_status
    }
}

/// 轮询直到任务进入终止状态
pub async fn wait_until_done(backend: &Backend, handle: &TaskHandle) -> dcm_command::Result<CreationStatus> {
    for _ in 0..400 {
        match backend.project_status(handle).await {
            Ok(CreationStatus::Complete) => return Ok(CreationStatus::Complete),
            Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(e) => return Err(e),
        }
    }
    panic!("task {} did not finish", handle.task_id);
}
