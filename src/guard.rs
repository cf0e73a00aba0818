//! 声明式访问守卫
//! 根据访问要求在"已授权"与"回退"两个分支之间选择，回退可以是空内容或跳转

use crate::{
    models::{access::AccessRequirement, user::Identity},
    services::PermissionService,
};

/// 满足要求时执行 `authorized`，否则执行 `fallback`；两者只会执行其一
pub fn guard<T>(
    evaluator: &PermissionService,
    identity: Option<&Identity>,
    requirement: &AccessRequirement,
    authorized: impl FnOnce() -> T,
    fallback: impl FnOnce() -> T,
) -> T {
    if evaluator.evaluate(identity, requirement) {
        authorized()
    } else {
        tracing::debug!(
            user_id = identity.map(|i| i.id.as_str()).unwrap_or("anonymous"),
            requirement = ?requirement,
            "Guard fell back"
        );
        fallback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::{Permission, Role, RoleRegistry};
    use std::sync::Arc;

    #[test]
    fn test_guard_selects_branch() {
        let evaluator = PermissionService::new(Arc::new(RoleRegistry::default()));
        let member = Identity::new("u1", "Ana").with_role(Role::Member);
        let requirement = AccessRequirement::permission(Permission::ReportsView);

        let shown = guard(&evaluator, Some(&member), &requirement, || "report", || "redirect:/");
        assert_eq!(shown, "redirect:/");

        let shown = guard(
            &evaluator,
            Some(&member),
            &AccessRequirement::permission(Permission::TasksView),
            || "tasks",
            || "",
        );
        assert_eq!(shown, "tasks");
    }
}
