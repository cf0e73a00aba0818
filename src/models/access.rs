//! 访问要求模型

use serde::{Deserialize, Serialize};

use super::role::{Permission, Role};

/// 受保护能力对身份的要求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessRequirement {
    Permission { permission: Permission },
    AllPermissions { permissions: Vec<Permission> },
    AnyPermission { permissions: Vec<Permission> },
    Role { role: Role },
    AnyRole { roles: Vec<Role> },
    /// 路由守卫：先满足 `roles` 之一（为空则不限角色），再满足全部 `permissions`
    Guarded {
        #[serde(default)]
        roles: Vec<Role>,
        #[serde(default)]
        permissions: Vec<Permission>,
    },
}

impl AccessRequirement {
    pub fn permission(permission: Permission) -> Self {
        AccessRequirement::Permission { permission }
    }

    pub fn all_permissions(permissions: impl IntoIterator<Item = Permission>) -> Self {
        AccessRequirement::AllPermissions {
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn any_permission(permissions: impl IntoIterator<Item = Permission>) -> Self {
        AccessRequirement::AnyPermission {
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn role(role: Role) -> Self {
        AccessRequirement::Role { role }
    }

    pub fn any_role(roles: impl IntoIterator<Item = Role>) -> Self {
        AccessRequirement::AnyRole {
            roles: roles.into_iter().collect(),
        }
    }

    pub fn guarded(
        roles: impl IntoIterator<Item = Role>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        AccessRequirement::Guarded {
            roles: roles.into_iter().collect(),
            permissions: permissions.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_json_shape() {
        let req: AccessRequirement = serde_json::from_value(serde_json::json!({
            "type": "guarded",
            "roles": ["admin"],
            "permissions": ["users.manage"]
        }))
        .unwrap();
        assert_eq!(
            req,
            AccessRequirement::guarded([Role::Admin], [Permission::UsersManage])
        );

        let req: AccessRequirement = serde_json::from_value(serde_json::json!({
            "type": "permission",
            "permission": "reports.view"
        }))
        .unwrap();
        assert_eq!(req, AccessRequirement::permission(Permission::ReportsView));
    }
}
