//! 站内通知模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 推送给当前用户的通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub kind: String, // task_assigned, mention, project_update, ...
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
