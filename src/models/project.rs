//! 项目领域模型

use serde::{Deserialize, Serialize};

use super::user::UserSummary;

/// 项目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String, // planning, active, on_hold, completed
    pub owner: UserSummary,
    #[serde(default)]
    pub members: Vec<UserSummary>,
}
