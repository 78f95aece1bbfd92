use dcm_common::StorageDomain;

use crate::{EngineMessage, ValidationResult};

/// 存储域校验
pub struct StorageDomainValidator<'a> {
    domain: Option<&'a StorageDomain>,
}

impl<'a> StorageDomainValidator<'a> {
    pub fn new(domain: Option<&'a StorageDomain>) -> Self {
        Self { domain }
    }

    /// 存储域不存在和非活动状态使用同一个原因码
    pub fn is_domain_exist_and_active(&self) -> ValidationResult {
        match self.domain {
            None => ValidationResult::fail(EngineMessage::StorageDomainStatusIllegal2),
            Some(domain) if !domain.is_active() => {
                ValidationResult::fail(EngineMessage::StorageDomainStatusIllegal2)
                    .with_variable("status", domain.status)
            }
            Some(_) => ValidationResult::valid(),
        }
    }

    /// 存储域剩余空间能容纳 `required_bytes`
    pub fn has_space_for_new_disks(&self, required_bytes: u64) -> ValidationResult {
        match self.domain {
            Some(domain) if domain.available_bytes < required_bytes => {
                ValidationResult::fail(EngineMessage::DiskSpaceLowOnStorageDomain)
                    .with_variable("storageName", &domain.name)
            }
            _ => ValidationResult::valid(),
        }
    }
}
