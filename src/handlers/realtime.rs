//! 实时通道处理器
//! 推送网关把事件与连接状态转发到进程内事件总线

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::{error::AppError, middleware::AppState, realtime::RealtimeEvent};

/// 发布实时事件
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<RealtimeEvent>,
) -> Result<impl IntoResponse, AppError> {
    let event_type = event.event_type();
    let delivered = state.event_bus.publish(event)?;

    Ok(Json(json!({
        "event": event_type,
        "delivered": delivered
    })))
}

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub connected: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// 上报推送通道连接状态
pub async fn update_connection(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConnectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let delivered = if req.connected {
        state.event_bus.connect()?
    } else {
        state.event_bus.disconnect(req.reason)?
    };

    Ok(Json(json!({
        "connected": state.event_bus.is_connected(),
        "delivered": delivered
    })))
}

/// 列出服务已订阅的聊天室
pub async fn list_rooms(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rooms = state.rooms.rooms();
    Json(json!({
        "rooms": rooms,
        "count": rooms.len()
    }))
}

/// 订阅聊天室，之后该聊天室的消息才会投递给同步器
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if chat_id.trim().is_empty() {
        return Err(AppError::BadRequest("chat_id must not be empty".to_string()));
    }

    let status = if state.rooms.join(&chat_id) {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(json!({ "chat_id": chat_id, "joined": true }))))
}

/// 取消订阅聊天室
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Path(chat_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.rooms.leave(&chat_id) {
        return Err(AppError::not_found(&format!("Chat room {} not joined", chat_id)));
    }

    Ok(StatusCode::NO_CONTENT)
}
