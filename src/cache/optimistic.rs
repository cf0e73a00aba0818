//! 乐观更新三阶段协议
//! 快照 → 乐观写入 → 确认或回滚。句柄按值消费，每条记录只能被处理一次。

use serde_json::Value;
use uuid::Uuid;

use super::{key::CacheKey, store::CacheStore};

/// 服务端确认后如何落地权威值
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    /// 用服务端返回的实体整体替换
    Replace(Value),
    /// 集合条目：撤销本地临时元素后按 `id` 更新或追加服务端返回的元素
    UpsertItem(Value),
    /// 服务端无返回体（例如删除），保留乐观值
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Committed,
    RolledBack,
    /// 同一 (键, 操作) 上更晚的乐观写入已接管，本次处理为空操作
    Superseded,
}

/// 第一阶段：已记录快照，尚未写入
#[must_use = "a snapshot must be applied and then committed or rolled back"]
#[derive(Debug)]
pub struct Snapshot {
    pub(super) id: Uuid,
    pub(super) key: CacheKey,
    pub(super) operation: String,
}

impl Snapshot {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// 第二阶段：基于当前可见值计算乐观值并立即写入（读己之写）
    pub fn apply<F>(self, store: &CacheStore, tentative: F) -> PendingMutation
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        if !store.apply_pending(&self.key, self.id, tentative) {
            tracing::debug!(
                key = %self.key,
                operation = %self.operation,
                "Optimistic mutation superseded before apply"
            );
        }

        PendingMutation {
            id: self.id,
            key: self.key,
            operation: self.operation,
        }
    }
}

/// 第三阶段：等待请求结果
#[must_use = "a pending mutation must be committed or rolled back"]
#[derive(Debug)]
pub struct PendingMutation {
    id: Uuid,
    key: CacheKey,
    operation: String,
}

impl PendingMutation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// 请求成功：以服务端权威值替换乐观值，丢弃快照
    pub fn commit(self, store: &CacheStore, confirmation: Confirmation) -> Resolution {
        store.commit_pending(&self.key, self.id, confirmation)
    }

    /// 请求失败：恢复到快照，丢弃快照
    pub fn rollback(self, store: &CacheStore) -> Resolution {
        store.rollback_pending(&self.key, self.id)
    }
}
