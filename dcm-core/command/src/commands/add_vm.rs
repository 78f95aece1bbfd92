//! 虚拟机创建
//!
//! `AddVm` 基于模板创建精简虚拟机，新磁盘只是模板镜像上的一层，同步完成。
//! 其余三种创建方式在后台任务中分配或复制磁盘，期间虚拟机处于镜像锁定状态。

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use dcm_common::{
    ActionGroup, Cluster, DiskImage, DiskVmElement, Guid, ImageStatus, ObjectType, StorageDomain,
    Vm, VmStatus,
};
use dcm_storage::{OptionalExt, Repositories};
use dcm_tasks::TaskWork;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use super::{mismatched, Command, ExecutionResult};
use crate::validator::{
    ClusterValidator, DiskImagesValidator, StorageDomainValidator, VmNameValidator,
};
use crate::{
    evaluate_chain, ActionParameters, ActionType, AddVmParameters, CommandContext, CommandError,
    EngineMessage, PermissionSubject, Result, StorageDataPlane, ValidationResult, ValidationRule,
};

/// 磁盘来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VmSource {
    Blank,
    Template(Guid),
    Snapshot(Guid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddVmRule {
    NameValid,
    ClusterExists,
    NameNotUsed,
    NewDisksUnique,
    SourceExists,
    SourceDisksExist,
    SourceDisksNotLocked,
    SourceDisksNotIllegal,
    DomainExistAndActive,
    DomainHasSpace,
}

#[derive(Debug, Default)]
pub(crate) struct AddVmSubject {
    name: String,
    cluster: Option<Cluster>,
    /// 已使用同名的虚拟机
    name_owner: Option<Vm>,
    /// 来源缺失时的原因码
    source_missing: Option<EngineMessage>,
    source_images: Vec<DiskImage>,
    /// 来源中已不存在的镜像
    missing_source_images: Vec<Guid>,
    /// ID 重复或已被占用的新磁盘别名
    conflicting_disks: Vec<String>,
    domain: Option<StorageDomain>,
    required_bytes: u64,
}

impl AddVmRule {
    fn chain(action: ActionType, creates_disks: bool) -> Vec<Self> {
        let mut rules = vec![Self::NameValid, Self::ClusterExists, Self::NameNotUsed];
        if action == ActionType::AddVmFromScratch {
            if creates_disks {
                rules.push(Self::NewDisksUnique);
            }
        } else {
            rules.extend([
                Self::SourceExists,
                Self::SourceDisksExist,
                Self::SourceDisksNotLocked,
                Self::SourceDisksNotIllegal,
            ]);
        }
        // 精简创建不分配新卷
        if action != ActionType::AddVm && creates_disks {
            rules.extend([Self::DomainExistAndActive, Self::DomainHasSpace]);
        }
        rules
    }
}

impl ValidationRule for AddVmRule {
    type Subject = AddVmSubject;

    fn name(&self) -> &'static str {
        match self {
            Self::NameValid => "name_valid",
            Self::ClusterExists => "cluster_exists",
            Self::NameNotUsed => "name_not_used",
            Self::NewDisksUnique => "new_disks_unique",
            Self::SourceExists => "source_exists",
            Self::SourceDisksExist => "source_disks_exist",
            Self::SourceDisksNotLocked => "source_disks_not_locked",
            Self::SourceDisksNotIllegal => "source_disks_not_illegal",
            Self::DomainExistAndActive => "domain_exist_and_active",
            Self::DomainHasSpace => "domain_has_space",
        }
    }

    fn evaluate(&self, subject: &AddVmSubject) -> ValidationResult {
        let name = VmNameValidator::new(&subject.name, subject.name_owner.as_ref());
        let images = DiskImagesValidator::new(&subject.source_images);
        let domain = StorageDomainValidator::new(subject.domain.as_ref());

        match self {
            Self::NameValid => name.is_name_valid(),
            Self::ClusterExists => ClusterValidator::new(subject.cluster.as_ref()).cluster_exists(),
            Self::NameNotUsed => name.is_name_not_used(),
            Self::NewDisksUnique => {
                if subject.conflicting_disks.is_empty() {
                    ValidationResult::valid()
                } else {
                    ValidationResult::fail(EngineMessage::DiskAlreadyExists)
                        .with_variable("diskAliases", subject.conflicting_disks.join(", "))
                }
            }
            Self::SourceExists => match subject.source_missing {
                Some(message) => ValidationResult::fail(message),
                None => ValidationResult::valid(),
            },
            Self::SourceDisksExist => {
                if subject.missing_source_images.is_empty() {
                    ValidationResult::valid()
                } else {
                    let ids: Vec<String> = subject
                        .missing_source_images
                        .iter()
                        .map(Guid::to_string)
                        .collect();
                    ValidationResult::fail(EngineMessage::DiskNotExist)
                        .with_variable("diskIds", ids.join(", "))
                }
            }
            Self::SourceDisksNotLocked => images.disk_images_not_locked(),
            Self::SourceDisksNotIllegal => images.disk_images_not_illegal(),
            Self::DomainExistAndActive => domain.is_domain_exist_and_active(),
            Self::DomainHasSpace => domain.has_space_for_new_disks(subject.required_bytes),
        }
    }
}

/// 后台任务中要分配的一块磁盘
#[derive(Debug, Clone)]
struct DiskOp {
    image: DiskImage,
    /// 复制来源，空白磁盘为 None
    source: Option<DiskImage>,
}

/// 虚拟机创建命令
pub struct AddVmCommand {
    action: ActionType,
    command_id: Guid,
    params: AddVmParameters,
    source: VmSource,
    source_images: Vec<DiskImage>,
    domain: Option<StorageDomain>,
}

impl AddVmCommand {
    pub fn new(action: ActionType, params: AddVmParameters) -> Result<Self> {
        let source = match action {
            ActionType::AddVm | ActionType::AddVmFromTemplate => {
                let template_id = params.template_id.ok_or_else(|| {
                    CommandError::invalid_parameters(action, "template_id is required")
                })?;
                VmSource::Template(template_id)
            }
            ActionType::AddVmFromSnapshot => {
                let snapshot_id = params.snapshot_id.ok_or_else(|| {
                    CommandError::invalid_parameters(action, "snapshot_id is required")
                })?;
                VmSource::Snapshot(snapshot_id)
            }
            ActionType::AddVmFromScratch => {
                if !params.disks.is_empty() && params.storage_domain_id.is_none() {
                    return Err(CommandError::invalid_parameters(
                        action,
                        "storage_domain_id is required when creating disks",
                    ));
                }
                VmSource::Blank
            }
            other => {
                return Err(CommandError::invalid_parameters(
                    other,
                    "not a vm creation action",
                ))
            }
        };

        Ok(Self {
            action,
            command_id: Guid::new_guid(),
            params,
            source,
            source_images: Vec::new(),
            domain: None,
        })
    }

    pub(crate) fn create(action: ActionType, params: ActionParameters) -> Result<Box<dyn Command>> {
        match params {
            ActionParameters::AddVm(params) => Ok(Box::new(Self::new(action, params)?)),
            other => Err(mismatched(action, &other)),
        }
    }

    fn is_thin(&self) -> bool {
        self.action == ActionType::AddVm
    }

    async fn load_subject(&self, ctx: &CommandContext) -> Result<AddVmSubject> {
        let repos = &ctx.repos;
        let mut subject = AddVmSubject {
            name: self.params.name.clone(),
            cluster: repos.clusters().get(self.params.cluster_id).await.optional()?,
            name_owner: repos.vms().get_by_name(&self.params.name).await?,
            ..Default::default()
        };

        let source_image_ids = match self.source {
            VmSource::Blank => Vec::new(),
            VmSource::Template(id) => match repos.templates().get(id).await.optional()? {
                Some(template) => template.disk_image_ids,
                None => {
                    subject.source_missing = Some(EngineMessage::TemplateDoesNotExist);
                    Vec::new()
                }
            },
            VmSource::Snapshot(id) => match repos.snapshots().get(id).await.optional()? {
                Some(snapshot) => snapshot.disk_image_ids,
                None => {
                    subject.source_missing = Some(EngineMessage::VmSnapshotDoesNotExist);
                    Vec::new()
                }
            },
        };
        for image_id in source_image_ids {
            match repos.disk_images().get(image_id).await.optional()? {
                Some(image) => subject.source_images.push(image),
                None => subject.missing_source_images.push(image_id),
            }
        }

        // 新磁盘的镜像 ID 与磁盘 ID 既不能互相重复，也不能已被占用
        let mut seen = HashSet::new();
        for spec in &self.params.disks {
            let new_image = seen.insert(spec.image_id);
            let new_disk = seen.insert(spec.disk_id);
            let duplicated = !(new_image && new_disk);
            let taken = repos.disk_images().get(spec.image_id).await.optional()?.is_some()
                || !repos.disk_images().get_by_disk_id(spec.disk_id).await?.is_empty();
            if duplicated || taken {
                subject.conflicting_disks.push(spec.alias.clone());
            }
        }

        subject.required_bytes = match self.source {
            VmSource::Blank => self.params.disks.iter().map(|d| d.size_bytes).sum(),
            _ => subject.source_images.iter().map(|i| i.size_bytes).sum(),
        };

        let domain_id = self.params.storage_domain_id.or_else(|| {
            subject
                .source_images
                .first()
                .and_then(DiskImage::primary_storage_id)
        });
        if let Some(id) = domain_id {
            subject.domain = repos.storage_domains().get(id).await.optional()?;
        }

        Ok(subject)
    }

    fn creates_disks(&self, source_images: &[DiskImage]) -> bool {
        match self.source {
            VmSource::Blank => !self.params.disks.is_empty(),
            _ => !source_images.is_empty(),
        }
    }

    fn new_vm(&self, status: VmStatus) -> Vm {
        let mut vm = Vm::new(self.params.vm_id, self.params.name.as_str(), self.params.cluster_id)
            .with_status(status);
        vm.description = self.params.description.clone();
        vm.template_id = self.params.template_id;
        vm
    }

    /// 要在目标存储域上分配的磁盘
    fn plan_disks(&self) -> Result<Vec<DiskOp>> {
        if !self.creates_disks(&self.source_images) {
            return Ok(Vec::new());
        }
        let domain = self.domain.as_ref().ok_or_else(|| {
            CommandError::ExecutionFailed("target storage domain was not loaded".into())
        })?;

        let ops = match self.source {
            VmSource::Blank => self
                .params
                .disks
                .iter()
                .map(|spec| DiskOp {
                    image: DiskImage::new(
                        spec.image_id,
                        spec.disk_id,
                        spec.alias.as_str(),
                        domain.id,
                        domain.storage_type,
                        spec.size_bytes,
                    )
                    .with_status(ImageStatus::Locked),
                    source: None,
                })
                .collect(),
            _ => self
                .source_images
                .iter()
                .map(|source| DiskOp {
                    image: DiskImage::new(
                        Guid::new_guid(),
                        Guid::new_guid(),
                        source.disk_alias.as_str(),
                        domain.id,
                        domain.storage_type,
                        source.size_bytes,
                    )
                    .with_status(ImageStatus::Locked),
                    source: Some(source.clone()),
                })
                .collect(),
        };
        Ok(ops)
    }

    /// 精简创建：在模板镜像上叠加新层并直接挂载
    async fn add_thin_vm(&self, ctx: &CommandContext) -> Result<ExecutionResult> {
        let repos = &ctx.repos;
        let layers: Vec<DiskImage> = self
            .source_images
            .iter()
            .map(|source| {
                let mut layer = source.clone();
                layer.image_id = Guid::new_guid();
                layer.disk_id = Guid::new_guid();
                layer.parent_id = Some(source.image_id);
                layer.image_status = ImageStatus::Ok;
                layer.created_at = Utc::now();
                layer
            })
            .collect();

        repos.vms().insert(self.new_vm(VmStatus::Down)).await?;
        persist_disks(repos, self.params.vm_id, layers).await?;

        info!(
            "Created vm {} ({}) from template {:?} with {} thin disks",
            self.params.name,
            self.params.vm_id,
            self.params.template_id,
            self.source_images.len()
        );
        Ok(ExecutionResult {
            target_id: self.params.vm_id,
            task: None,
        })
    }

    /// 异步创建：虚拟机与磁盘先以锁定状态落库，再提交后台分配任务
    async fn add_vm_with_task(&self, ctx: &CommandContext) -> Result<ExecutionResult> {
        let repos = &ctx.repos;
        let ops = self.plan_disks()?;

        repos.vms().insert(self.new_vm(VmStatus::ImageLocked)).await?;
        let images = ops.iter().map(|op| op.image.clone()).collect();
        persist_disks(repos, self.params.vm_id, images).await?;
        debug!(
            "Vm {} locked with {} pending disks",
            self.params.vm_id,
            ops.len()
        );

        let image_ids: Vec<Guid> = ops.iter().map(|op| op.image.image_id).collect();
        let work = create_disks_work(
            repos.clone(),
            ctx.data_plane.clone(),
            self.params.vm_id,
            ops,
        );

        match ctx.tasks.enqueue(self.command_id, work).await {
            Ok(handle) => {
                info!(
                    "Creating vm {} ({}) in background task {}",
                    self.params.name, self.params.vm_id, handle.task_id
                );
                Ok(ExecutionResult {
                    target_id: self.params.vm_id,
                    task: Some(handle),
                })
            }
            Err(e) => {
                error!("Failed to enqueue creation of vm {}: {}", self.params.vm_id, e);
                finish_creation(repos, self.params.vm_id, &image_ids, ImageStatus::Illegal).await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Command for AddVmCommand {
    fn action_type(&self) -> ActionType {
        self.action
    }

    fn command_id(&self) -> Guid {
        self.command_id
    }

    fn permission_check_subjects(&self) -> Vec<PermissionSubject> {
        let mut subjects = vec![PermissionSubject::new(
            self.params.cluster_id,
            ObjectType::Cluster,
            ActionGroup::CreateVm,
        )];
        if let Some(template_id) = self.params.template_id {
            subjects.push(PermissionSubject::new(
                template_id,
                ObjectType::VmTemplate,
                ActionGroup::CreateVm,
            ));
        }
        if let (Some(domain_id), false) = (self.params.storage_domain_id, self.is_thin()) {
            subjects.push(PermissionSubject::new(
                domain_id,
                ObjectType::Storage,
                ActionGroup::CreateDisk,
            ));
        }
        subjects
    }

    async fn validate(&mut self, ctx: &CommandContext) -> Result<ValidationResult> {
        let subject = self.load_subject(ctx).await?;
        let rules = AddVmRule::chain(self.action, self.creates_disks(&subject.source_images));
        let result = evaluate_chain(&rules, &subject);

        self.source_images = subject.source_images;
        self.domain = subject.domain;
        Ok(result)
    }

    async fn execute_command(&mut self, ctx: &CommandContext) -> Result<ExecutionResult> {
        if self.is_thin() {
            self.add_thin_vm(ctx).await
        } else {
            self.add_vm_with_task(ctx).await
        }
    }
}

/// 插入并挂载磁盘，任一步失败时撤销虚拟机与已插入的磁盘
async fn persist_disks(repos: &Repositories, vm_id: Guid, images: Vec<DiskImage>) -> Result<()> {
    let mut inserted = Vec::with_capacity(images.len());
    for image in images {
        let (image_id, disk_id) = (image.image_id, image.disk_id);
        let stored = match repos.disk_images().insert(image).await {
            Ok(()) => {
                inserted.push(image_id);
                attach(repos, disk_id, vm_id).await
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            error!("Failed to store disks of vm {}, rolling back: {}", vm_id, e);
            rollback_creation(repos, vm_id, &inserted).await;
            return Err(e);
        }
    }
    Ok(())
}

/// 删除半成品虚拟机，失败只记录日志
async fn rollback_creation(repos: &Repositories, vm_id: Guid, image_ids: &[Guid]) {
    if let Err(e) = repos.vms().detach_all_disks(vm_id).await {
        warn!("Failed to detach disks of vm {}: {}", vm_id, e);
    }
    for image_id in image_ids {
        if let Err(e) = repos.disk_images().remove(*image_id).await {
            warn!("Failed to remove disk image {}: {}", image_id, e);
        }
    }
    if let Err(e) = repos.vms().remove(vm_id).await {
        warn!("Failed to remove vm {}: {}", vm_id, e);
    }
}

async fn attach(repos: &Repositories, disk_id: Guid, vm_id: Guid) -> Result<()> {
    repos
        .vms()
        .attach_disk(DiskVmElement {
            disk_id,
            vm_id,
            plugged: true,
        })
        .await?;
    Ok(())
}

/// 解锁磁盘并把虚拟机置为关机状态
async fn finish_creation(repos: &Repositories, vm_id: Guid, image_ids: &[Guid], status: ImageStatus) {
    for image_id in image_ids {
        if let Err(e) = repos
            .disk_images()
            .compare_and_set_status(*image_id, ImageStatus::Locked, status)
            .await
        {
            warn!("Failed to unlock disk image {}: {}", image_id, e);
        }
    }
    if let Err(e) = repos.vms().update_status(vm_id, VmStatus::Down).await {
        warn!("Failed to unlock vm {}: {}", vm_id, e);
    }
}

fn create_disks_work(
    repos: Repositories,
    data_plane: Arc<dyn StorageDataPlane>,
    vm_id: Guid,
    ops: Vec<DiskOp>,
) -> TaskWork {
    async move {
        let outcome = allocate_disks(data_plane.as_ref(), &ops).await;
        let status = match outcome {
            Ok(()) => ImageStatus::Ok,
            Err(_) => ImageStatus::Illegal,
        };

        let image_ids: Vec<Guid> = ops.iter().map(|op| op.image.image_id).collect();
        finish_creation(&repos, vm_id, &image_ids, status).await;

        outcome.with_context(|| format!("failed to create disks of vm {}", vm_id))
    }
    .boxed()
}

async fn allocate_disks(data_plane: &dyn StorageDataPlane, ops: &[DiskOp]) -> anyhow::Result<()> {
    for op in ops {
        let domain_id = op
            .image
            .primary_storage_id()
            .with_context(|| format!("disk image {} has no storage domain", op.image.image_id))?;
        match &op.source {
            None => {
                data_plane
                    .create_volume(domain_id, op.image.image_id, op.image.size_bytes)
                    .await?
            }
            Some(source) => {
                data_plane
                    .copy_image(source, domain_id, op.image.image_id)
                    .await?
            }
        }
    }
    Ok(())
}
