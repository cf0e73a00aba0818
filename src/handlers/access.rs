//! 访问控制处理器
//! 对任意身份判定访问要求，并暴露角色注册表

use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::AppError,
    middleware::AppState,
    models::{
        access::AccessRequirement,
        user::{Identity, StoredIdentity},
    },
};

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    /// 缺省表示匿名
    #[serde(default)]
    pub identity: Option<StoredIdentity>,
    pub requirement: AccessRequirement,
}

/// 判定访问要求
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EvaluateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let identity = req.identity.map(Identity::from);
    let allowed = state
        .permission_service
        .evaluate(identity.as_ref(), &req.requirement);

    let effective = identity
        .as_ref()
        .map(|i| state.permission_service.effective_permissions(i))
        .unwrap_or_default();

    Ok(Json(json!({
        "allowed": allowed,
        "effective_permissions": effective,
    })))
}

/// 列出角色及其隐含权限
pub async fn list_roles(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let roles = state.permission_service.registry().roles();

    Ok(Json(json!({
        "roles": roles,
        "count": roles.len()
    })))
}
