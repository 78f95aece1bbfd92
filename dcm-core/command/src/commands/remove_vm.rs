//! 虚拟机删除

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use dcm_common::{ActionGroup, DiskImage, Guid, ImageStatus, ObjectType, Vm};
use dcm_storage::{OptionalExt, Repositories, StorageError};
use dcm_tasks::TaskWork;
use futures_util::FutureExt;
use tracing::{info, warn};

use super::{mismatched, Command, ExecutionResult};
use crate::validator::VmValidator;
use crate::{
    evaluate_chain, ActionParameters, ActionType, CommandContext, CommandError, EngineMessage,
    PermissionSubject, RemoveVmParameters, Result, StorageDataPlane, ValidationResult,
    ValidationRule,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoveVmRule {
    VmExists,
    VmNotLocked,
    VmDown,
    VmDisksNotLocked,
}

#[derive(Debug, Default)]
pub(crate) struct RemoveVmSubject {
    vm: Option<Vm>,
    images: Vec<DiskImage>,
}

impl RemoveVmRule {
    fn chain(force: bool) -> Vec<Self> {
        let mut rules = vec![Self::VmExists];
        if !force {
            rules.push(Self::VmNotLocked);
        }
        rules.extend([Self::VmDown, Self::VmDisksNotLocked]);
        rules
    }
}

impl ValidationRule for RemoveVmRule {
    type Subject = RemoveVmSubject;

    fn name(&self) -> &'static str {
        match self {
            Self::VmExists => "vm_exists",
            Self::VmNotLocked => "vm_not_locked",
            Self::VmDown => "vm_down",
            Self::VmDisksNotLocked => "vm_disks_not_locked",
        }
    }

    fn evaluate(&self, subject: &RemoveVmSubject) -> ValidationResult {
        let vm = VmValidator::new(subject.vm.as_ref());
        match self {
            Self::VmExists => vm.vm_exists(),
            Self::VmNotLocked => vm.vm_not_locked(),
            Self::VmDown => vm.vm_down(),
            Self::VmDisksNotLocked => vm.vm_disks_not_locked(&subject.images),
        }
    }
}

/// 虚拟机删除命令
pub struct RemoveVmCommand {
    command_id: Guid,
    params: RemoveVmParameters,
    /// 挂在虚拟机上的全部镜像
    images: Vec<DiskImage>,
}

impl RemoveVmCommand {
    pub fn new(params: RemoveVmParameters) -> Self {
        Self {
            command_id: Guid::new_guid(),
            params,
            images: Vec::new(),
        }
    }

    pub(crate) fn create(action: ActionType, params: ActionParameters) -> Result<Box<dyn Command>> {
        match params {
            ActionParameters::RemoveVm(params) => Ok(Box::new(Self::new(params))),
            other => Err(mismatched(action, &other)),
        }
    }

    async fn load_subject(&self, ctx: &CommandContext) -> Result<RemoveVmSubject> {
        let repos = &ctx.repos;
        let Some(vm) = repos.vms().get(self.params.vm_id).await.optional()? else {
            return Ok(RemoveVmSubject::default());
        };

        let mut images = Vec::new();
        for element in repos.vms().get_elements_for_vm(vm.id).await? {
            images.extend(repos.disk_images().get_by_disk_id(element.disk_id).await?);
        }
        Ok(RemoveVmSubject {
            vm: Some(vm),
            images,
        })
    }

    /// 锁定待删除的镜像，任一镜像已被锁定时回滚
    async fn lock_images(&self, repos: &Repositories) -> Result<()> {
        let mut locked: Vec<&DiskImage> = Vec::new();
        for image in &self.images {
            match repos
                .disk_images()
                .compare_and_set_status(image.image_id, image.image_status, ImageStatus::Locked)
                .await
            {
                Ok(_) => locked.push(image),
                Err(e) => {
                    unlock_images(repos, locked).await;
                    return Err(match e {
                        StorageError::Conflict(_) => CommandError::ValidationFailed(
                            ValidationResult::fail(EngineMessage::DisksLocked)
                                .with_variable("diskAliases", &image.disk_alias)
                                .into(),
                        ),
                        other => other.into(),
                    });
                }
            }
        }
        Ok(())
    }

    /// 分离磁盘并删除虚拟机，需要时提交删盘任务
    async fn remove_vm(&self, ctx: &CommandContext, remove_disks: bool) -> Result<ExecutionResult> {
        let repos = &ctx.repos;
        let vm_id = self.params.vm_id;

        let detached = repos.vms().detach_all_disks(vm_id).await?;
        repos.vms().remove(vm_id).await?;
        info!("Removed vm {}, detached {} disks", vm_id, detached.len());

        if !remove_disks {
            return Ok(ExecutionResult {
                target_id: vm_id,
                task: None,
            });
        }

        let work = remove_images_work(repos.clone(), ctx.data_plane.clone(), self.images.clone());
        let handle = ctx.tasks.enqueue(self.command_id, work).await?;
        Ok(ExecutionResult {
            target_id: vm_id,
            task: Some(handle),
        })
    }
}

#[async_trait]
impl Command for RemoveVmCommand {
    fn action_type(&self) -> ActionType {
        ActionType::RemoveVm
    }

    fn command_id(&self) -> Guid {
        self.command_id
    }

    fn permission_check_subjects(&self) -> Vec<PermissionSubject> {
        vec![PermissionSubject::new(
            self.params.vm_id,
            ObjectType::Vm,
            ActionGroup::DeleteVm,
        )]
    }

    async fn validate(&mut self, ctx: &CommandContext) -> Result<ValidationResult> {
        let subject = self.load_subject(ctx).await?;
        let result = evaluate_chain(&RemoveVmRule::chain(self.params.force), &subject);
        self.images = subject.images;
        Ok(result)
    }

    async fn execute_command(&mut self, ctx: &CommandContext) -> Result<ExecutionResult> {
        let remove_disks = self.params.remove_disks && !self.images.is_empty();
        if !remove_disks {
            return self.remove_vm(ctx, false).await;
        }

        self.lock_images(&ctx.repos).await?;
        let result = self.remove_vm(ctx, true).await;
        if result.is_err() {
            // 没有任务接管时把镜像还原为加锁前的状态
            unlock_images(&ctx.repos, &self.images).await;
        }
        result
    }
}

/// 解除镜像锁并恢复原状态，失败只记录日志
async fn unlock_images<'a>(repos: &Repositories, images: impl IntoIterator<Item = &'a DiskImage>) {
    for image in images {
        if let Err(e) = repos
            .disk_images()
            .compare_and_set_status(image.image_id, ImageStatus::Locked, image.image_status)
            .await
        {
            warn!("Failed to roll back lock on disk image {}: {}", image.image_id, e);
        }
    }
}

/// 删除卷与镜像记录，失败的镜像标记为非法
fn remove_images_work(
    repos: Repositories,
    data_plane: Arc<dyn StorageDataPlane>,
    images: Vec<DiskImage>,
) -> TaskWork {
    async move {
        let mut failures = Vec::new();
        for image in &images {
            if let Err(e) = remove_image(&repos, data_plane.as_ref(), image).await {
                warn!("Failed to remove disk image {}: {:#}", image.image_id, e);
                if let Err(e) = repos
                    .disk_images()
                    .compare_and_set_status(image.image_id, ImageStatus::Locked, ImageStatus::Illegal)
                    .await
                {
                    warn!("Failed to mark disk image {} illegal: {}", image.image_id, e);
                }
                failures.push(image.disk_alias.clone());
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("failed to remove disks: {}", failures.join(", "));
        }
        Ok(())
    }
    .boxed()
}

async fn remove_image(
    repos: &Repositories,
    data_plane: &dyn StorageDataPlane,
    image: &DiskImage,
) -> anyhow::Result<()> {
    for domain_id in &image.storage_ids {
        data_plane
            .delete_volume(*domain_id, image.image_id)
            .await
            .with_context(|| format!("failed to delete volume on {}", domain_id))?;
    }
    repos.disk_images().remove(image.image_id).await?;
    Ok(())
}
