use std::sync::Arc;

use dcm_storage::Repositories;
use dcm_tasks::AsyncTaskRunner;

use crate::{NoopDataPlane, PermissionChecker, StorageDataPlane, TransferConfig};

/// 命令运行时依赖的协作者
#[derive(Clone)]
pub struct CommandContext {
    pub repos: Repositories,
    pub tasks: Arc<dyn AsyncTaskRunner>,
    pub data_plane: Arc<dyn StorageDataPlane>,
    /// 为空时跳过权限检查
    pub permissions: Option<Arc<dyn PermissionChecker>>,
    pub transfer: TransferConfig,
}

impl CommandContext {
    pub fn new(repos: Repositories, tasks: Arc<dyn AsyncTaskRunner>) -> Self {
        Self {
            repos,
            tasks,
            data_plane: Arc::new(NoopDataPlane),
            permissions: None,
            transfer: TransferConfig::default(),
        }
    }

    pub fn with_data_plane(mut self, data_plane: Arc<dyn StorageDataPlane>) -> Self {
        self.data_plane = data_plane;
        self
    }

    pub fn with_permissions(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(checker);
        self
    }

    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }
}
