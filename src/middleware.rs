//! HTTP 中间件
//! 应用状态与请求追踪

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    cache::CacheStore,
    config::AppConfig,
    realtime::{EventBus, RoomSubscriptions},
    services::{CacheLoader, PermissionService},
};

/// 应用状态
///
/// 服务使用 Arc 包装，多个请求共享同一份缓存与事件总线
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub permission_service: Arc<PermissionService>,
    pub cache: Arc<CacheStore>,
    pub event_bus: Arc<EventBus>,
    /// 服务持有的聊天室订阅
    pub rooms: Arc<RoomSubscriptions>,
    /// 未配置后端时为空，缓存只能由实时事件维护已有条目
    pub loader: Option<Arc<CacheLoader>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        permission_service: Arc<PermissionService>,
        cache: Arc<CacheStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let rooms = Arc::new(event_bus.room_subscriptions());
        Self {
            config,
            permission_service,
            cache,
            event_bus,
            rooms,
            loader: None,
            started_at: Instant::now(),
        }
    }

    /// 启用缓存未命中时的首次拉取
    pub fn with_loader(mut self, loader: Arc<CacheLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    let uri = req.uri().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            "PATCH" => "PATCH",
            _ => "UNKNOWN",
        };
        let status_class = match status {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        // 在响应头中回传 trace_id
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
