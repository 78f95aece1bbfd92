//! 磁盘镜像传输
//!
//! 传输已有镜像时对镜像加锁后建立传输会话；未提供镜像时先新建镜像，
//! 再建立会话。数据传输在后台任务中完成，结束时释放镜像锁。

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use dcm_common::{
    ActionGroup, DiskImage, Guid, ImageStatus, ImageTransfer, ObjectType, StorageDomain,
    TransferPhase, Vm,
};
use dcm_storage::{OptionalExt, Repositories, StorageError};
use dcm_tasks::{TaskHandle, TaskWork};
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use super::{mismatched, Command, ExecutionResult};
use crate::validator::{DiskImagesValidator, DiskValidator, StorageDomainValidator};
use crate::{
    ActionParameters, ActionType, CommandContext, CommandError, EngineMessage, NewImageSpec,
    PermissionSubject, Result, StorageDataPlane, TransferDiskImageParameters, ValidationResult,
    ValidationRule, evaluate_chain,
};

/// 传输目标
#[derive(Debug, Clone)]
enum TransferTarget {
    /// 调用方提供的已有镜像
    Supplied { image_id: Guid, image_group_id: Guid },
    /// 需要新建的镜像
    New { spec: NewImageSpec, domain_id: Guid },
}

/// 传输命令的校验规则，按声明顺序求值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferRule {
    DiskExists,
    DiskImagesNotLocked,
    DiskImagesNotIllegal,
    DiskNotPluggedToNonDownVm,
    DomainExistAndActive,
    DomainHasSpaceForNewDisk,
}

/// 校验快照
#[derive(Debug, Default)]
pub(crate) struct TransferSubject {
    image: Option<DiskImage>,
    /// 同一磁盘下的全部镜像
    images: Vec<DiskImage>,
    plugged_vms: Vec<Vm>,
    domain: Option<StorageDomain>,
    required_bytes: u64,
}

impl TransferRule {
    fn chain(target: &TransferTarget, force: bool) -> Vec<Self> {
        match target {
            TransferTarget::Supplied { .. } => {
                let mut rules = vec![
                    Self::DiskExists,
                    Self::DiskImagesNotLocked,
                    Self::DiskImagesNotIllegal,
                ];
                if !force {
                    rules.push(Self::DiskNotPluggedToNonDownVm);
                }
                rules.push(Self::DomainExistAndActive);
                rules
            }
            TransferTarget::New { .. } => {
                vec![Self::DomainExistAndActive, Self::DomainHasSpaceForNewDisk]
            }
        }
    }
}

impl ValidationRule for TransferRule {
    type Subject = TransferSubject;

    fn name(&self) -> &'static str {
        match self {
            Self::DiskExists => "disk_exists",
            Self::DiskImagesNotLocked => "disk_images_not_locked",
            Self::DiskImagesNotIllegal => "disk_images_not_illegal",
            Self::DiskNotPluggedToNonDownVm => "disk_not_plugged_to_non_down_vm",
            Self::DomainExistAndActive => "domain_exist_and_active",
            Self::DomainHasSpaceForNewDisk => "domain_has_space_for_new_disk",
        }
    }

    fn evaluate(&self, subject: &TransferSubject) -> ValidationResult {
        let disk = DiskValidator::new(subject.image.as_ref(), &subject.plugged_vms);
        let images = DiskImagesValidator::new(&subject.images);
        let domain = StorageDomainValidator::new(subject.domain.as_ref());

        match self {
            Self::DiskExists => disk.is_disk_exists(),
            Self::DiskImagesNotLocked => images.disk_images_not_locked(),
            Self::DiskImagesNotIllegal => images.disk_images_not_illegal(),
            Self::DiskNotPluggedToNonDownVm => disk.is_disk_plugged_to_any_non_down_vm(),
            Self::DomainExistAndActive => domain.is_domain_exist_and_active(),
            Self::DomainHasSpaceForNewDisk => domain.has_space_for_new_disks(subject.required_bytes),
        }
    }
}

/// 磁盘镜像传输命令
pub struct TransferDiskImageCommand {
    command_id: Guid,
    params: TransferDiskImageParameters,
    target: TransferTarget,
    /// 校验时读取的快照，只在本次调用内使用
    image: Option<DiskImage>,
    domain: Option<StorageDomain>,
}

impl TransferDiskImageCommand {
    pub fn new(params: TransferDiskImageParameters) -> Result<Self> {
        let action = ActionType::TransferDiskImage;
        let target = match params.image_id {
            Some(image_id) => {
                let image_group_id = params.image_group_id.ok_or_else(|| {
                    CommandError::invalid_parameters(action, "image_group_id is required")
                })?;
                TransferTarget::Supplied {
                    image_id,
                    image_group_id,
                }
            }
            None => {
                let spec = params.new_image.clone().ok_or_else(|| {
                    CommandError::invalid_parameters(action, "either image_id or new_image is required")
                })?;
                let domain_id = params.storage_domain_id.ok_or_else(|| {
                    CommandError::invalid_parameters(action, "storage_domain_id is required for a new image")
                })?;
                TransferTarget::New { spec, domain_id }
            }
        };

        Ok(Self {
            command_id: Guid::new_guid(),
            params,
            target,
            image: None,
            domain: None,
        })
    }

    pub(crate) fn create(action: ActionType, params: ActionParameters) -> Result<Box<dyn Command>> {
        match params {
            ActionParameters::TransferDiskImage(params) => Ok(Box::new(Self::new(params)?)),
            other => Err(mismatched(action, &other)),
        }
    }

    pub fn parameters(&self) -> &TransferDiskImageParameters {
        &self.params
    }

    async fn load_subject(&self, ctx: &CommandContext) -> Result<TransferSubject> {
        let repos = &ctx.repos;
        match &self.target {
            TransferTarget::Supplied { image_id, .. } => {
                let image = repos.disk_images().get(*image_id).await.optional()?;
                let Some(image) = image else {
                    return Ok(TransferSubject::default());
                };

                let images = repos.disk_images().get_by_disk_id(image.disk_id).await?;
                let mut plugged_vms = Vec::new();
                for element in repos.vms().get_elements_for_disk(image.disk_id).await? {
                    if !element.plugged {
                        continue;
                    }
                    if let Some(vm) = repos.vms().get(element.vm_id).await.optional()? {
                        plugged_vms.push(vm);
                    }
                }

                let domain_id = self
                    .params
                    .storage_domain_id
                    .or_else(|| image.primary_storage_id());
                let domain = match domain_id {
                    Some(id) => repos.storage_domains().get(id).await.optional()?,
                    None => None,
                };

                Ok(TransferSubject {
                    required_bytes: image.size_bytes,
                    image: Some(image),
                    images,
                    plugged_vms,
                    domain,
                })
            }
            TransferTarget::New { spec, domain_id } => Ok(TransferSubject {
                domain: repos.storage_domains().get(*domain_id).await.optional()?,
                required_bytes: spec.size_bytes,
                ..Default::default()
            }),
        }
    }

    /// 新建镜像记录，镜像在传输结束前保持锁定
    async fn create_image(&self, ctx: &CommandContext, spec: &NewImageSpec) -> Result<DiskImage> {
        let domain = self.domain.as_ref().ok_or_else(|| {
            CommandError::ExecutionFailed("target storage domain was not loaded".into())
        })?;

        let image = DiskImage::new(
            spec.image_id,
            spec.disk_id,
            spec.alias.as_str(),
            domain.id,
            domain.storage_type,
            spec.size_bytes,
        )
        .with_status(ImageStatus::Locked);

        ctx.repos.disk_images().insert(image.clone()).await?;
        info!(
            "Created disk image {} ({}) on storage domain {}",
            image.image_id, image.disk_alias, domain.name
        );
        Ok(image)
    }

    /// 锁定镜像、建立传输会话并提交后台传输
    async fn handle_image_is_ready_for_transfer(
        &self,
        ctx: &CommandContext,
        image: &DiskImage,
        created: bool,
    ) -> Result<TaskHandle> {
        let repos = &ctx.repos;

        if !created {
            match repos
                .disk_images()
                .compare_and_set_status(image.image_id, ImageStatus::Ok, ImageStatus::Locked)
                .await
            {
                Ok(_) => {}
                Err(StorageError::Conflict(reason)) => {
                    // 校验之后被其他命令抢先锁定
                    warn!("Lost lock race on disk image {}: {}", image.image_id, reason);
                    return Err(CommandError::ValidationFailed(
                        ValidationResult::fail(EngineMessage::DisksLocked)
                            .with_variable("diskAliases", &image.disk_alias)
                            .into(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        let failed_status = if created {
            ImageStatus::Illegal
        } else {
            ImageStatus::Ok
        };

        let now = Utc::now();
        let transfer = ImageTransfer {
            id: self.command_id,
            disk_id: image.disk_id,
            image_id: image.image_id,
            direction: self.params.direction,
            phase: TransferPhase::Initializing,
            proxy_url: ctx.transfer.proxy_url.clone(),
            inactivity_timeout_secs: ctx.transfer.inactivity_timeout_secs,
            bytes_sent: 0,
            bytes_total: image.size_bytes,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = repos.image_transfers().create(transfer.clone()).await {
            release_image(repos, image.image_id, failed_status).await;
            return Err(e.into());
        }
        debug!(
            "Image transfer {} initialized for image {}",
            transfer.id, image.image_id
        );

        let new_volume = match (&self.target, created) {
            (TransferTarget::New { domain_id, .. }, true) => Some((*domain_id, image.size_bytes)),
            _ => None,
        };
        let work = transfer_work(
            repos.clone(),
            ctx.data_plane.clone(),
            transfer,
            new_volume,
            failed_status,
        );

        match ctx.tasks.enqueue(self.command_id, work).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                error!("Failed to enqueue image transfer {}: {}", self.command_id, e);
                if let Err(e) = repos
                    .image_transfers()
                    .update_phase(self.command_id, TransferPhase::FinishedFailure, 0)
                    .await
                {
                    warn!("Failed to close image transfer {}: {}", self.command_id, e);
                }
                release_image(repos, image.image_id, failed_status).await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Command for TransferDiskImageCommand {
    fn action_type(&self) -> ActionType {
        ActionType::TransferDiskImage
    }

    fn command_id(&self) -> Guid {
        self.command_id
    }

    fn permission_check_subjects(&self) -> Vec<PermissionSubject> {
        match &self.target {
            TransferTarget::Supplied { image_group_id, .. } => vec![PermissionSubject::new(
                *image_group_id,
                ObjectType::Disk,
                ActionGroup::EditDiskProperties,
            )],
            TransferTarget::New { spec, .. } => vec![PermissionSubject::new(
                spec.image_id,
                ObjectType::Storage,
                ActionGroup::CreateDisk,
            )],
        }
    }

    async fn validate(&mut self, ctx: &CommandContext) -> Result<ValidationResult> {
        let subject = self.load_subject(ctx).await?;
        let rules = TransferRule::chain(&self.target, self.params.force);
        let result = evaluate_chain(&rules, &subject);

        self.image = subject.image;
        self.domain = subject.domain;
        Ok(result)
    }

    async fn execute_command(&mut self, ctx: &CommandContext) -> Result<ExecutionResult> {
        let (image, created) = match &self.target {
            TransferTarget::Supplied { image_id, .. } => {
                let image = match self.image.clone() {
                    Some(image) => image,
                    None => ctx.repos.disk_images().get(*image_id).await?,
                };
                (image, false)
            }
            TransferTarget::New { spec, .. } => (self.create_image(ctx, spec).await?, true),
        };

        let handle = self
            .handle_image_is_ready_for_transfer(ctx, &image, created)
            .await?;

        Ok(ExecutionResult {
            target_id: image.image_id,
            task: Some(handle),
        })
    }
}

/// 解除镜像锁，失败只记录日志
async fn release_image(repos: &Repositories, image_id: Guid, status: ImageStatus) {
    if let Err(e) = repos
        .disk_images()
        .compare_and_set_status(image_id, ImageStatus::Locked, status)
        .await
    {
        warn!("Failed to release lock on disk image {}: {}", image_id, e);
    }
}

/// 后台传输
///
/// 无论成败都会关闭传输会话并解除镜像锁。
fn transfer_work(
    repos: Repositories,
    data_plane: Arc<dyn StorageDataPlane>,
    transfer: ImageTransfer,
    new_volume: Option<(Guid, u64)>,
    failed_status: ImageStatus,
) -> TaskWork {
    async move {
        let outcome = run_transfer(&repos, data_plane.as_ref(), &transfer, new_volume).await;

        let (phase, bytes_sent, status) = match &outcome {
            Ok(bytes) => (TransferPhase::FinishedSuccess, *bytes, ImageStatus::Ok),
            Err(_) => (TransferPhase::FinishedFailure, 0, failed_status),
        };
        let closed = repos
            .image_transfers()
            .update_phase(transfer.id, phase, bytes_sent)
            .await
            .with_context(|| format!("failed to close image transfer {}", transfer.id));
        // 会话关闭失败也要解锁
        release_image(&repos, transfer.image_id, status).await;

        let bytes = outcome?;
        closed?;
        info!(
            "Image transfer {} finished, {} bytes sent",
            transfer.id, bytes
        );
        Ok::<(), anyhow::Error>(())
    }
    .boxed()
}

async fn run_transfer(
    repos: &Repositories,
    data_plane: &dyn StorageDataPlane,
    transfer: &ImageTransfer,
    new_volume: Option<(Guid, u64)>,
) -> anyhow::Result<u64> {
    if let Some((domain_id, size_bytes)) = new_volume {
        data_plane
            .create_volume(domain_id, transfer.image_id, size_bytes)
            .await
            .with_context(|| format!("failed to create volume for image {}", transfer.image_id))?;
    }

    repos
        .image_transfers()
        .update_phase(transfer.id, TransferPhase::Transferring, 0)
        .await?;

    data_plane
        .transfer(transfer)
        .await
        .with_context(|| format!("image transfer {} failed", transfer.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplied() -> TransferTarget {
        TransferTarget::Supplied {
            image_id: Guid::new_guid(),
            image_group_id: Guid::new_guid(),
        }
    }

    #[test]
    fn test_supplied_image_rule_order() {
        assert_eq!(
            TransferRule::chain(&supplied(), false),
            vec![
                TransferRule::DiskExists,
                TransferRule::DiskImagesNotLocked,
                TransferRule::DiskImagesNotIllegal,
                TransferRule::DiskNotPluggedToNonDownVm,
                TransferRule::DomainExistAndActive,
            ]
        );
    }

    #[test]
    fn test_force_skips_plugged_check() {
        let rules = TransferRule::chain(&supplied(), true);
        assert!(!rules.contains(&TransferRule::DiskNotPluggedToNonDownVm));
        assert_eq!(rules.len(), 4);
    }

    #[test]
    fn test_new_image_rules() {
        let target = TransferTarget::New {
            spec: NewImageSpec {
                image_id: Guid::new_guid(),
                disk_id: Guid::new_guid(),
                alias: "upload".into(),
                size_bytes: 1 << 30,
            },
            domain_id: Guid::new_guid(),
        };
        assert_eq!(
            TransferRule::chain(&target, false),
            vec![
                TransferRule::DomainExistAndActive,
                TransferRule::DomainHasSpaceForNewDisk
            ]
        );
    }

    #[test]
    fn test_missing_disk_fails_first_rule() {
        let rules = TransferRule::chain(&supplied(), false);
        let result = evaluate_chain(&rules, &TransferSubject::default());
        assert_eq!(result.message, Some(EngineMessage::DiskNotExist));
    }

    #[test]
    fn test_construction_requires_bound_parameters() {
        let mut params = TransferDiskImageParameters::for_existing_image(Guid::new_guid(), Guid::new_guid());
        params.image_group_id = None;
        assert!(matches!(
            TransferDiskImageCommand::new(params),
            Err(CommandError::InvalidParameters { .. })
        ));

        let mut params = TransferDiskImageParameters::for_existing_image(Guid::new_guid(), Guid::new_guid());
        params.image_id = None;
        assert!(matches!(
            TransferDiskImageCommand::new(params),
            Err(CommandError::InvalidParameters { .. })
        ));
    }
}
