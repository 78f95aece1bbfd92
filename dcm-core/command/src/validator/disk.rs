use dcm_common::{DiskImage, Vm};

use crate::{EngineMessage, ValidationResult};

/// 单个磁盘的校验
pub struct DiskValidator<'a> {
    disk: Option<&'a DiskImage>,
    /// 插入了该磁盘的虚拟机
    plugged_vms: &'a [Vm],
}

impl<'a> DiskValidator<'a> {
    pub fn new(disk: Option<&'a DiskImage>, plugged_vms: &'a [Vm]) -> Self {
        Self { disk, plugged_vms }
    }

    pub fn is_disk_exists(&self) -> ValidationResult {
        ValidationResult::fail_if(self.disk.is_none(), EngineMessage::DiskNotExist)
    }

    /// 磁盘不能插在非关机状态的虚拟机上
    pub fn is_disk_plugged_to_any_non_down_vm(&self) -> ValidationResult {
        let names: Vec<&str> = self
            .plugged_vms
            .iter()
            .filter(|vm| !vm.status.is_down())
            .map(|vm| vm.name.as_str())
            .collect();

        if names.is_empty() {
            return ValidationResult::valid();
        }
        ValidationResult::fail(EngineMessage::DiskPluggedToNonDownVms)
            .with_variable("vmNames", names.join(", "))
    }
}
