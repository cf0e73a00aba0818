//! 首次拉取
//! 缓存未命中时从后端拉取并写入，之后由实时事件与重新拉取维护

use std::sync::Arc;

use crate::{
    cache::{CacheKey, CacheStore, EntrySnapshot},
    error::{AppError, Result},
    remote::Fetcher,
};

pub struct CacheLoader {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheLoader {
    pub fn new(store: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { store, fetcher }
    }

    /// 命中直接返回；未命中时拉取服务端值并创建条目
    pub async fn load(&self, key: &CacheKey) -> Result<EntrySnapshot> {
        if let Some(entry) = self.store.entry(key) {
            return Ok(entry);
        }

        let value = self.fetcher.fetch(key).await.map_err(|err| {
            tracing::warn!(key = %key, status = ?err.status, error = %err, "Initial fetch failed");
            match err.status {
                Some(404) => AppError::not_found(&format!("{} not found upstream", key)),
                _ => AppError::Remote(err),
            }
        })?;

        self.store.set(key.clone(), value);
        tracing::debug!(key = %key, "Cache entry loaded");

        self.store
            .entry(key)
            .ok_or_else(|| AppError::internal_error(&format!("Cache entry {} vanished", key)))
    }
}
