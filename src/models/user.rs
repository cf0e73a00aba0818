//! 用户领域模型

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::role::{Permission, Role};

/// 访问评估器眼中的已登录用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    /// 直接授予的权限
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    #[serde(default)]
    pub online: bool,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roles: BTreeSet::new(),
            permissions: BTreeSet::new(),
            online: false,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn is_super_admin(&self) -> bool {
        self.roles.contains(&Role::SuperAdmin)
    }
}

/// 外部会话存储中的身份（宽松的字符串形式）
#[derive(Debug, Clone, Deserialize)]
pub struct StoredIdentity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub is_online: bool,
}

impl From<StoredIdentity> for Identity {
    fn from(stored: StoredIdentity) -> Self {
        let mut roles = BTreeSet::new();
        for name in &stored.roles {
            match name.parse::<Role>() {
                Ok(role) => {
                    roles.insert(role);
                }
                Err(_) => {
                    tracing::warn!(user_id = %stored.id, role = %name, "Ignoring unknown role")
                }
            }
        }

        let mut permissions = BTreeSet::new();
        for name in &stored.permissions {
            match name.parse::<Permission>() {
                Ok(permission) => {
                    permissions.insert(permission);
                }
                Err(_) => {
                    tracing::warn!(
                        user_id = %stored.id,
                        permission = %name,
                        "Ignoring unknown permission"
                    )
                }
            }
        }

        Identity {
            id: stored.id,
            name: stored.name,
            roles,
            permissions,
            online: stored.is_online,
        }
    }
}

/// 嵌入在任务、项目和聊天消息中的用户摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}

/// 嵌入式用户记录上的在线状态字段名
pub const PRESENCE_FIELD: &str = "is_online";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_identity_drops_unknown_names() {
        let stored: StoredIdentity = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "name": "Ana",
            "roles": ["manager", "intern"],
            "permissions": ["reports.view", "reports.fly"],
            "is_online": true
        }))
        .unwrap();

        let identity = Identity::from(stored);
        assert_eq!(identity.roles.len(), 1);
        assert!(identity.roles.contains(&Role::Manager));
        assert_eq!(identity.permissions.len(), 1);
        assert!(identity.permissions.contains(&Permission::ReportsView));
        assert!(identity.online);
    }

    #[test]
    fn test_user_summary_presence_field_name() {
        let summary = UserSummary {
            id: "u1".to_string(),
            name: "Ana".to_string(),
            avatar: None,
            is_online: true,
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value[PRESENCE_FIELD], true);
    }
}
