use dcm_common::{Cluster, DiskImage, Vm, VmStatus};
use regex::Regex;

use crate::{EngineMessage, ValidationResult};

/// 虚拟机名称最大长度
pub const VM_NAME_MAX_LENGTH: usize = 64;

const VM_NAME_PATTERN: &str = r"^[\w.-]+$";

/// 新虚拟机名称的校验
pub struct VmNameValidator<'a> {
    name: &'a str,
    /// 已占用该名称的虚拟机
    existing: Option<&'a Vm>,
}

impl<'a> VmNameValidator<'a> {
    pub fn new(name: &'a str, existing: Option<&'a Vm>) -> Self {
        Self { name, existing }
    }

    /// 名称非空、长度合法且只含字母数字、`_`、`.`、`-`
    pub fn is_name_valid(&self) -> ValidationResult {
        if self.name.trim().is_empty() {
            return ValidationResult::fail(EngineMessage::NameMayNotBeEmpty);
        }
        if self.name.chars().count() > VM_NAME_MAX_LENGTH {
            return ValidationResult::fail(EngineMessage::NameLengthIsTooLong)
                .with_variable("maxLength", VM_NAME_MAX_LENGTH);
        }

        let matches = Regex::new(VM_NAME_PATTERN)
            .map(|re| re.is_match(self.name))
            .unwrap_or(false);
        ValidationResult::fail_if(!matches, EngineMessage::NameMayNotContainSpecialChars)
    }

    pub fn is_name_not_used(&self) -> ValidationResult {
        ValidationResult::fail_if(self.existing.is_some(), EngineMessage::NameAlreadyUsed)
    }
}

/// 集群校验
pub struct ClusterValidator<'a> {
    cluster: Option<&'a Cluster>,
}

impl<'a> ClusterValidator<'a> {
    pub fn new(cluster: Option<&'a Cluster>) -> Self {
        Self { cluster }
    }

    pub fn cluster_exists(&self) -> ValidationResult {
        ValidationResult::fail_if(self.cluster.is_none(), EngineMessage::ClusterCanNotBeEmpty)
    }
}

/// 已有虚拟机的校验
pub struct VmValidator<'a> {
    vm: Option<&'a Vm>,
}

impl<'a> VmValidator<'a> {
    pub fn new(vm: Option<&'a Vm>) -> Self {
        Self { vm }
    }

    pub fn vm_exists(&self) -> ValidationResult {
        ValidationResult::fail_if(self.vm.is_none(), EngineMessage::VmNotFound)
    }

    pub fn vm_not_locked(&self) -> ValidationResult {
        let locked = self
            .vm
            .map(|vm| vm.status == VmStatus::ImageLocked)
            .unwrap_or(false);
        ValidationResult::fail_if(locked, EngineMessage::VmIsLocked)
    }

    /// 镜像锁定也算非关机状态，强制删除时需要跳过该检查
    pub fn vm_down(&self) -> ValidationResult {
        match self.vm {
            Some(vm) if !vm.status.is_down() && vm.status != VmStatus::ImageLocked => {
                ValidationResult::fail(EngineMessage::VmIsRunning).with_variable("vmName", &vm.name)
            }
            _ => ValidationResult::valid(),
        }
    }

    /// 虚拟机的磁盘镜像都未锁定
    pub fn vm_disks_not_locked(&self, images: &[DiskImage]) -> ValidationResult {
        crate::validator::DiskImagesValidator::new(images).disk_images_not_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcm_common::Guid;

    #[test]
    fn test_name_rules() {
        assert!(VmNameValidator::new("web-01.prod_a", None).is_name_valid().is_valid());
        assert_eq!(
            VmNameValidator::new("  ", None).is_name_valid().message,
            Some(EngineMessage::NameMayNotBeEmpty)
        );
        assert_eq!(
            VmNameValidator::new("web 01", None).is_name_valid().message,
            Some(EngineMessage::NameMayNotContainSpecialChars)
        );
        let long = "a".repeat(VM_NAME_MAX_LENGTH + 1);
        assert_eq!(
            VmNameValidator::new(&long, None).is_name_valid().message,
            Some(EngineMessage::NameLengthIsTooLong)
        );
    }

    #[test]
    fn test_name_in_use() {
        let vm = Vm::new(Guid::new_guid(), "web", Guid::new_guid());
        assert_eq!(
            VmNameValidator::new("web", Some(&vm)).is_name_not_used().message,
            Some(EngineMessage::NameAlreadyUsed)
        );
    }

    #[test]
    fn test_vm_state_rules() {
        let up = Vm::new(Guid::new_guid(), "db", Guid::new_guid()).with_status(VmStatus::Up);
        let validator = VmValidator::new(Some(&up));
        assert!(validator.vm_exists().is_valid());
        assert!(validator.vm_not_locked().is_valid());
        assert_eq!(validator.vm_down().message, Some(EngineMessage::VmIsRunning));

        let locked = up.clone().with_status(VmStatus::ImageLocked);
        let validator = VmValidator::new(Some(&locked));
        assert_eq!(validator.vm_not_locked().message, Some(EngineMessage::VmIsLocked));
        assert!(validator.vm_down().is_valid());

        assert_eq!(
            VmValidator::new(None).vm_exists().message,
            Some(EngineMessage::VmNotFound)
        );
    }
}
