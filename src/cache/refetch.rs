//! 重新拉取队列
//! 过期标记在这里去重合并，后台 worker 一次性取走

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

use super::key::CacheKey;

#[derive(Default)]
pub struct RefetchQueue {
    keys: Mutex<BTreeSet<CacheKey>>,
    notify: Notify,
}

impl RefetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队；已在队列中的键只保留一份
    pub fn push(&self, key: CacheKey) {
        let inserted = self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        if inserted {
            self.notify.notify_one();
        }
    }

    pub fn push_all(&self, keys: impl IntoIterator<Item = CacheKey>) {
        for key in keys {
            self.push(key);
        }
    }

    /// 取走所有待拉取的键
    pub fn drain(&self) -> Vec<CacheKey> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *keys).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// 等待新的键入队
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}
