//! 权限检查服务
//! 纯函数式的访问判定：无 I/O、无副作用，可在每次渲染时同步调用

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::{
    error::AppError,
    models::{
        access::AccessRequirement,
        role::{Permission, Role, RoleRegistry},
        user::Identity,
    },
};

/// "任一权限" 检查传入空列表时的结果。
/// 空列表不代表 "无限制"；需要无限制时调用方应直接跳过检查。
pub const EMPTY_ANY_OF_GRANTS: bool = false;

#[derive(Clone)]
pub struct PermissionService {
    registry: Arc<RoleRegistry>,
}

impl PermissionService {
    pub fn new(registry: Arc<RoleRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    /// 有效权限集合 = 直接授予的权限 ∪ 所持角色隐含的权限
    pub fn effective_permissions(&self, identity: &Identity) -> BTreeSet<Permission> {
        if identity.is_super_admin() {
            return Permission::ALL.into_iter().collect();
        }

        let mut effective = identity.permissions.clone();
        for role in &identity.roles {
            if let Some(implied) = self.registry.implied(*role) {
                effective.extend(implied.iter().copied());
            }
        }
        effective
    }

    /// 检查用户是否拥有权限（超级管理员直接通过）
    pub fn has_permission(&self, identity: &Identity, permission: Permission) -> bool {
        if identity.is_super_admin() || identity.permissions.contains(&permission) {
            return true;
        }

        identity.roles.iter().any(|role| {
            self.registry
                .implied(*role)
                .is_some_and(|implied| implied.contains(&permission))
        })
    }

    pub fn has_any_permission(&self, identity: &Identity, permissions: &[Permission]) -> bool {
        if permissions.is_empty() {
            return EMPTY_ANY_OF_GRANTS;
        }
        permissions.iter().any(|p| self.has_permission(identity, *p))
    }

    /// 空列表为真（空真）
    pub fn has_all_permissions(&self, identity: &Identity, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.has_permission(identity, *p))
    }

    /// 角色检查只看字面成员关系，超级管理员不会自动满足其他角色
    pub fn has_role(&self, identity: &Identity, role: Role) -> bool {
        identity.roles.contains(&role)
    }

    pub fn has_any_role(&self, identity: &Identity, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(identity, *r))
    }

    /// 判定访问要求。匿名用户不满足任何要求；超级管理员满足所有要求。
    pub fn evaluate(&self, identity: Option<&Identity>, requirement: &AccessRequirement) -> bool {
        let Some(identity) = identity else {
            return false;
        };

        if identity.is_super_admin() {
            return true;
        }

        match requirement {
            AccessRequirement::Permission { permission } => {
                self.has_permission(identity, *permission)
            }
            AccessRequirement::AllPermissions { permissions } => {
                self.has_all_permissions(identity, permissions)
            }
            AccessRequirement::AnyPermission { permissions } => {
                self.has_any_permission(identity, permissions)
            }
            AccessRequirement::Role { role } => self.has_role(identity, *role),
            AccessRequirement::AnyRole { roles } => self.has_any_role(identity, roles),
            AccessRequirement::Guarded { roles, permissions } => {
                // 先检查角色，失败即拒绝，不再检查权限
                if !roles.is_empty() && !self.has_any_role(identity, roles) {
                    return false;
                }
                self.has_all_permissions(identity, permissions)
            }
        }
    }

    /// 检查访问要求，如果无权限则返回错误
    pub fn require(
        &self,
        identity: Option<&Identity>,
        requirement: &AccessRequirement,
    ) -> Result<(), AppError> {
        if !self.evaluate(identity, requirement) {
            tracing::warn!(
                user_id = identity.map(|i| i.id.as_str()).unwrap_or("anonymous"),
                requirement = ?requirement,
                "Permission denied"
            );
            return Err(AppError::Forbidden);
        }

        Ok(())
    }
}
