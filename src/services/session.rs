//! 当前会话
//! 持有已登录身份与缓存；登出时清空缓存，避免下一个用户看到旧数据

use std::sync::{Arc, PoisonError, RwLock};

use crate::{
    cache::CacheStore,
    guard,
    models::{access::AccessRequirement, user::Identity},
    services::PermissionService,
};

pub struct Session {
    identity: RwLock<Option<Identity>>,
    cache: Arc<CacheStore>,
    permissions: PermissionService,
}

impl Session {
    pub fn new(cache: Arc<CacheStore>, permissions: PermissionService) -> Self {
        Self {
            identity: RwLock::new(None),
            cache,
            permissions,
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        tracing::info!(user_id = %identity.id, roles = ?identity.roles, "Signed in");
        *self.identity.write().unwrap_or_else(PoisonError::into_inner) = Some(identity);
    }

    pub fn sign_out(&self) {
        let previous = self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.cache.clear();
        if let Some(identity) = previous {
            tracing::info!(user_id = %identity.id, "Signed out");
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn can(&self, requirement: &AccessRequirement) -> bool {
        let identity = self.identity.read().unwrap_or_else(PoisonError::into_inner);
        self.permissions.evaluate(identity.as_ref(), requirement)
    }

    /// 以当前身份执行守卫
    pub fn guard<T>(
        &self,
        requirement: &AccessRequirement,
        authorized: impl FnOnce() -> T,
        fallback: impl FnOnce() -> T,
    ) -> T {
        // 先克隆身份，分支闭包内可以再次访问会话
        let identity = self.identity();
        guard::guard(
            &self.permissions,
            identity.as_ref(),
            requirement,
            authorized,
            fallback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::models::role::{Permission, Role, RoleRegistry};
    use serde_json::json;

    fn session() -> Session {
        Session::new(
            Arc::new(CacheStore::new()),
            PermissionService::new(Arc::new(RoleRegistry::default())),
        )
    }

    #[test]
    fn test_sign_out_clears_cache_and_identity() {
        let session = session();
        session.sign_in(Identity::new("u1", "Ana").with_role(Role::Manager));
        let _ = session.cache().set(CacheKey::task_lists(), json!([]));
        assert!(session.can(&AccessRequirement::permission(Permission::ReportsView)));

        session.sign_out();
        assert!(!session.is_authenticated());
        assert!(session.cache().is_empty());
        assert!(!session.can(&AccessRequirement::permission(Permission::TasksView)));
    }

    #[test]
    fn test_guard_without_identity_falls_back() {
        let session = session();
        let out = session.guard(
            &AccessRequirement::all_permissions([]),
            || "content",
            || "login",
        );
        assert_eq!(out, "login");
    }
}
