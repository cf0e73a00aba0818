//! 缓存检查处理器
//! 只读查看当前缓存条目及其状态

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{cache::CacheKey, error::AppError, middleware::AppState};

/// 列出所有条目
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let entries = state.cache.entries();

    Ok(Json(json!({
        "entries": entries,
        "count": entries.len(),
        "pending_mutations": state.cache.pending_count(),
        "refetch_queue": state.cache.refetch_queue().len(),
    })))
}

/// 获取单个条目，键为点分形式，例如 `tasks.detail.t1`
///
/// 配置了后端时未命中会先拉取并写入缓存
pub async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let key: CacheKey = key.parse()?;

    let entry = match &state.loader {
        Some(loader) => loader.load(&key).await?,
        None => state
            .cache
            .entry(&key)
            .ok_or_else(|| AppError::not_found(&format!("Cache entry {} not found", key)))?,
    };

    Ok(Json(entry))
}
