//! 乐观变更服务
//! 围绕一次 REST 请求驱动 快照 → 乐观写入 → 确认/回滚

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::{
    cache::{CacheKey, CacheStore, Confirmation, PendingMutation, Resolution},
    error::{AppError, Result},
    notify::{Notice, Notifier},
    remote::RemoteError,
    telemetry::metric_names,
};

/// 请求成功后如何把服务端返回体写回缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    Replace,
    UpsertItem,
    /// 返回体不是实体（例如删除），保留乐观值
    Keep,
}

#[derive(Debug, Clone)]
pub struct MutationSpec {
    pub key: CacheKey,
    /// 用于去重的操作名，例如 `update_task`
    pub operation: String,
    /// 面向用户的动作描述，例如 `update task`
    pub action: String,
    pub confirm: ConfirmMode,
}

impl MutationSpec {
    pub fn new(
        key: CacheKey,
        operation: impl Into<String>,
        action: impl Into<String>,
        confirm: ConfirmMode,
    ) -> Self {
        Self {
            key,
            operation: operation.into(),
            action: action.into(),
            confirm,
        }
    }
}

#[derive(Clone)]
pub struct SyncService {
    store: Arc<CacheStore>,
    notifier: Arc<dyn Notifier>,
}

impl SyncService {
    pub fn new(store: Arc<CacheStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// 执行一次乐观变更
    ///
    /// 乐观值立即可见；请求在独立任务中完成，调用方放弃等待也不会留下悬空的快照。
    pub async fn mutate<F, Fut>(
        &self,
        mutation: MutationSpec,
        tentative: F,
        request: Fut,
    ) -> Result<Value>
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
        Fut: Future<Output = std::result::Result<Value, RemoteError>> + Send + 'static,
    {
        let pending = self
            .store
            .begin(mutation.key.clone(), mutation.operation.clone())
            .apply(&self.store, tentative);

        tracing::debug!(
            key = %mutation.key,
            operation = %mutation.operation,
            "Optimistic mutation applied"
        );

        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let handle = tokio::spawn(async move {
            let outcome = request.await;
            settle(&store, notifier.as_ref(), pending, &mutation, outcome)
        });

        handle
            .await
            .map_err(|e| AppError::internal_error(&format!("Mutation task failed: {}", e)))?
    }
}

fn settle(
    store: &CacheStore,
    notifier: &dyn Notifier,
    pending: PendingMutation,
    mutation: &MutationSpec,
    outcome: std::result::Result<Value, RemoteError>,
) -> Result<Value> {
    match outcome {
        Ok(value) => {
            let confirmation = match mutation.confirm {
                ConfirmMode::Replace => Confirmation::Replace(value.clone()),
                ConfirmMode::UpsertItem => Confirmation::UpsertItem(value.clone()),
                ConfirmMode::Keep => Confirmation::Keep,
            };
            let resolution = pending.commit(store, confirmation);
            tracing::debug!(
                key = %mutation.key,
                operation = %mutation.operation,
                resolution = ?resolution,
                "Optimistic mutation confirmed"
            );
            Ok(value)
        }
        Err(err) => {
            let resolution = pending.rollback(store);
            metrics::counter!(
                metric_names::OPTIMISTIC_ROLLBACKS,
                "operation" => mutation.operation.clone()
            )
            .increment(1);
            tracing::warn!(
                key = %mutation.key,
                operation = %mutation.operation,
                status = ?err.status,
                superseded = resolution == Resolution::Superseded,
                error = %err,
                "Optimistic mutation rolled back"
            );

            notifier.notify(Notice::error(
                format!("Failed to {}", mutation.action),
                err.message.clone(),
            ));
            Err(AppError::MutationRejected {
                action: mutation.action.clone(),
                message: err.message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use serde_json::json;

    #[tokio::test]
    async fn test_failed_request_restores_snapshot_and_notifies() {
        let store = Arc::new(CacheStore::new());
        let key = CacheKey::task_detail("t1");
        let _ = store.set(key.clone(), json!({"id": "t1", "status": "todo"}));
        let notifier = Arc::new(MemoryNotifier::new());
        let service = SyncService::new(store.clone(), notifier.clone());

        let result = service
            .mutate(
                MutationSpec::new(key.clone(), "update_task", "update task", ConfirmMode::Replace),
                |current| {
                    let mut task = current.cloned()?;
                    task["status"] = json!("done");
                    Some(task)
                },
                async { Err(RemoteError::new(Some(500), "boom")) },
            )
            .await;

        assert!(matches!(result, Err(AppError::MutationRejected { .. })));
        assert_eq!(store.get(&key), Some(json!({"id": "t1", "status": "todo"})));
        assert_eq!(store.pending_count(), 0);

        let notices = notifier.take();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Failed to update task");
    }
}
