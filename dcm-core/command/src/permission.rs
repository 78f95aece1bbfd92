//! 权限主体与权限检查

use async_trait::async_trait;
use dcm_common::{ActionGroup, Guid, ObjectType};
use serde::{Deserialize, Serialize};

/// 调用方执行命令所需的一项权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionSubject {
    pub object_id: Guid,
    pub object_type: ObjectType,
    pub action_group: ActionGroup,
}

impl PermissionSubject {
    pub fn new(object_id: Guid, object_type: ObjectType, action_group: ActionGroup) -> Self {
        Self {
            object_id,
            object_type,
            action_group,
        }
    }
}

impl std::fmt::Display for PermissionSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.object_type, self.object_id, self.action_group
        )
    }
}

/// 权限评估器
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// 用户对全部主体都有权限时返回 true
    async fn is_authorized(
        &self,
        user_id: Guid,
        subjects: &[PermissionSubject],
    ) -> anyhow::Result<bool>;
}

/// 放行所有请求
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn is_authorized(&self, _: Guid, _: &[PermissionSubject]) -> anyhow::Result<bool> {
        Ok(true)
    }
}
