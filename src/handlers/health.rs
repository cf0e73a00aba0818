//! 健康检查处理器
//! 提供 /health 端点

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::middleware::AppState;

/// 存活探针响应
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub cache_entries: usize,
    pub pending_mutations: usize,
    pub refetch_queue: usize,
    /// 推送通道断开时仍然健康，只是数据可能过期
    pub realtime_connected: bool,
}

/// 存活探针
/// 快速响应，不检查后端
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        cache_entries: state.cache.len(),
        pending_mutations: state.cache.pending_count(),
        refetch_queue: state.cache.refetch_queue().len(),
        realtime_connected: state.event_bus.is_connected(),
    })
}
