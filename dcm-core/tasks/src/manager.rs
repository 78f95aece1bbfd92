//! 任务管理器
//!
//! 基于 tokio 的进程内任务执行器。任务在后台运行，发起方只轮询，不等待。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dcm_common::Guid;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::{
    AsyncTaskRunner, AsyncTaskStatus, Result, TaskError, TaskHandle, TaskManagerConfig, TaskState,
    TaskWork,
};

/// 任务表
#[derive(Default)]
struct TaskTable {
    /// 任务 ID -> 状态
    tasks: HashMap<Guid, AsyncTaskStatus>,
    /// 关联 ID -> 活动任务 ID
    active: HashMap<Guid, Guid>,
}

struct Inner {
    table: RwLock<TaskTable>,
    slots: Arc<Semaphore>,
}

/// 任务管理器
///
/// 同一关联 ID 同时最多存在一个未终止的任务。
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
    config: TaskManagerConfig,
}

impl TaskManager {
    /// 创建新的任务管理器
    pub fn new(config: TaskManagerConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(TaskTable::default()),
                slots,
            }),
            config,
        }
    }

    /// 获取配置
    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    /// 列出全部任务
    pub async fn list(&self) -> Vec<AsyncTaskStatus> {
        let table = self.inner.table.read().await;
        let mut tasks: Vec<_> = table.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// 丢弃已终止的任务
    pub async fn discard(&self, handle: &TaskHandle) -> Result<AsyncTaskStatus> {
        let mut table = self.inner.table.write().await;
        let state = table
            .tasks
            .get(&handle.task_id)
            .map(|t| t.state)
            .ok_or(TaskError::NotFound(handle.task_id))?;

        if !state.is_terminal() {
            return Err(TaskError::StillActive(handle.task_id));
        }

        debug!("Discarded task {}", handle.task_id);
        table
            .tasks
            .remove(&handle.task_id)
            .ok_or(TaskError::NotFound(handle.task_id))
    }

    /// 按配置的保留时长清理终止任务
    pub async fn purge_expired(&self) -> usize {
        self.purge_terminal(Duration::from_secs(self.config.retention_secs))
            .await
    }

    /// 清理终止时间早于 `max_age` 的任务，返回清理数量
    pub async fn purge_terminal(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now().checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut table = self.inner.table.write().await;
        let before = table.tasks.len();
        table
            .tasks
            .retain(|_, t| !(t.state.is_terminal() && t.updated_at < cutoff));
        let purged = before - table.tasks.len();
        if purged > 0 {
            info!("Purged {} terminal tasks", purged);
        }
        purged
    }
}

impl Inner {
    async fn run(self: Arc<Self>, handle: TaskHandle, work: TaskWork) {
        let _permit = match self.slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.transition(&handle, TaskState::Failed, Some("task runner closed".into()))
                    .await;
                return;
            }
        };

        self.transition(&handle, TaskState::Running, None).await;

        // 在独立任务中执行，panic 也能落到 Failed
        let outcome = match tokio::spawn(work).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(join_error) => Err(format!("task aborted: {}", join_error)),
        };

        match outcome {
            Ok(()) => self.transition(&handle, TaskState::Finished, None).await,
            Err(reason) => {
                error!("Task {} failed: {}", handle.task_id, reason);
                self.transition(&handle, TaskState::Failed, Some(reason)).await
            }
        }
    }

    async fn transition(&self, handle: &TaskHandle, next: TaskState, error: Option<String>) {
        if let Err(e) = self.table.write().await.apply(handle, next, error) {
            warn!("Ignored task update: {}", e);
        }
    }
}

impl TaskTable {
    fn apply(&mut self, handle: &TaskHandle, next: TaskState, error: Option<String>) -> Result<()> {
        let task = self
            .tasks
            .get_mut(&handle.task_id)
            .ok_or(TaskError::NotFound(handle.task_id))?;

        if !task.state.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                task_id: handle.task_id,
                from: task.state,
                to: next,
            });
        }

        debug!("Task {}: {} -> {}", handle.task_id, task.state, next);
        task.state = next;
        task.error = error;
        task.updated_at = Utc::now();

        if next.is_terminal() {
            self.active.remove(&handle.correlation_id);
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncTaskRunner for TaskManager {
    async fn enqueue(&self, correlation_id: Guid, work: TaskWork) -> Result<TaskHandle> {
        let handle = TaskHandle {
            task_id: Guid::new_guid(),
            correlation_id,
        };

        {
            let mut table = self.inner.table.write().await;
            if let Some(active) = table.active.get(&correlation_id) {
                return Err(TaskError::AlreadyActive {
                    correlation_id,
                    task_id: *active,
                });
            }
            table.active.insert(correlation_id, handle.task_id);
            table
                .tasks
                .insert(handle.task_id, AsyncTaskStatus::queued(handle));
        }

        info!(
            "Enqueued task {} for command {}",
            handle.task_id, correlation_id
        );
        tokio::spawn(self.inner.clone().run(handle, work));
        Ok(handle)
    }

    async fn poll(&self, handle: &TaskHandle) -> Result<AsyncTaskStatus> {
        self.inner
            .table
            .read()
            .await
            .tasks
            .get(&handle.task_id)
            .cloned()
            .ok_or(TaskError::NotFound(handle.task_id))
    }
}
