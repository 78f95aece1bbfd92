//! 校验器
//!
//! 每个校验器持有一份实体快照的借用，方法是纯函数，只返回 [`ValidationResult`]。
//!
//! [`ValidationResult`]: crate::ValidationResult

mod disk;
mod disk_images;
mod storage_domain;
mod vm;

pub use disk::DiskValidator;
pub use disk_images::DiskImagesValidator;
pub use storage_domain::StorageDomainValidator;
pub use vm::{ClusterValidator, VmNameValidator, VmValidator, VM_NAME_MAX_LENGTH};
