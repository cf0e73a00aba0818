//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware::AppState};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开路由
    let public_routes = Router::new().route("/health", get(handlers::health::health_check));

    // 访问控制
    let access_routes = Router::new()
        .route("/api/v1/access/evaluate", post(handlers::access::evaluate))
        .route("/api/v1/access/roles", get(handlers::access::list_roles));

    // 缓存检查
    let cache_routes = Router::new()
        .route("/api/v1/cache", get(handlers::cache::list_entries))
        .route("/api/v1/cache/{key}", get(handlers::cache::get_entry));

    // 推送网关入口
    let realtime_routes = Router::new()
        .route("/api/v1/realtime/events", post(handlers::realtime::publish_event))
        .route(
            "/api/v1/realtime/connection",
            post(handlers::realtime::update_connection),
        )
        .route("/api/v1/realtime/rooms", get(handlers::realtime::list_rooms))
        .route(
            "/api/v1/realtime/rooms/{chat_id}",
            put(handlers::realtime::join_room).delete(handlers::realtime::leave_room),
        );

    Router::new()
        .merge(public_routes)
        .merge(access_routes)
        .merge(cache_routes)
        .merge(realtime_routes)
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
