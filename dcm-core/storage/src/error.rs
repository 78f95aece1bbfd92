use thiserror::Error;

/// Storage 层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// 数据未找到
    #[error("Data not found: {0}")]
    NotFound(String),

    /// 数据已存在
    #[error("Data already exists: {0}")]
    AlreadyExists(String),

    /// 比较并交换失败（记录已被其他操作修改）
    #[error("Conflicting update: {0}")]
    Conflict(String),
}

impl StorageError {
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} {}", kind, id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// 将 `NotFound` 转换为 `None`，其余错误原样返回
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
