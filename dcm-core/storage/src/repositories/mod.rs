//! 仓储契约
//!
//! 持久层实现不在本 crate 范围内，命令引擎只依赖这里的 trait。
//! 所有读取返回快照副本，调用方不得假设其在读取之后仍然新鲜。

mod disk_images;
mod image_transfers;
mod inventory;
mod storage_domains;
mod vms;

pub use disk_images::DiskImageRepository;
pub use image_transfers::ImageTransferRepository;
pub use inventory::{ClusterRepository, SnapshotRepository, VmTemplateRepository};
pub use storage_domains::StorageDomainRepository;
pub use vms::VmRepository;
