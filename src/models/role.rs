//! 角色与权限领域模型

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// 原子权限，以点分名称标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "dashboard.view")]
    DashboardView,

    #[serde(rename = "tasks.view")]
    TasksView,
    #[serde(rename = "tasks.create")]
    TasksCreate,
    #[serde(rename = "tasks.edit")]
    TasksEdit,
    #[serde(rename = "tasks.delete")]
    TasksDelete,
    #[serde(rename = "tasks.assign")]
    TasksAssign,

    #[serde(rename = "projects.view")]
    ProjectsView,
    #[serde(rename = "projects.create")]
    ProjectsCreate,
    #[serde(rename = "projects.edit")]
    ProjectsEdit,
    #[serde(rename = "projects.delete")]
    ProjectsDelete,
    #[serde(rename = "projects.manage_members")]
    ProjectsManageMembers,

    #[serde(rename = "notes.view")]
    NotesView,
    #[serde(rename = "notes.create")]
    NotesCreate,
    #[serde(rename = "notes.edit")]
    NotesEdit,
    #[serde(rename = "notes.delete")]
    NotesDelete,

    #[serde(rename = "chat.view")]
    ChatView,
    #[serde(rename = "chat.send")]
    ChatSend,
    #[serde(rename = "chat.manage")]
    ChatManage,

    #[serde(rename = "reports.view")]
    ReportsView,
    #[serde(rename = "reports.export")]
    ReportsExport,

    #[serde(rename = "users.view")]
    UsersView,
    #[serde(rename = "users.manage")]
    UsersManage,
    #[serde(rename = "roles.manage")]
    RolesManage,
    #[serde(rename = "settings.manage")]
    SettingsManage,
}

impl Permission {
    pub const ALL: [Permission; 24] = [
        Permission::DashboardView,
        Permission::TasksView,
        Permission::TasksCreate,
        Permission::TasksEdit,
        Permission::TasksDelete,
        Permission::TasksAssign,
        Permission::ProjectsView,
        Permission::ProjectsCreate,
        Permission::ProjectsEdit,
        Permission::ProjectsDelete,
        Permission::ProjectsManageMembers,
        Permission::NotesView,
        Permission::NotesCreate,
        Permission::NotesEdit,
        Permission::NotesDelete,
        Permission::ChatView,
        Permission::ChatSend,
        Permission::ChatManage,
        Permission::ReportsView,
        Permission::ReportsExport,
        Permission::UsersView,
        Permission::UsersManage,
        Permission::RolesManage,
        Permission::SettingsManage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::DashboardView => "dashboard.view",
            Permission::TasksView => "tasks.view",
            Permission::TasksCreate => "tasks.create",
            Permission::TasksEdit => "tasks.edit",
            Permission::TasksDelete => "tasks.delete",
            Permission::TasksAssign => "tasks.assign",
            Permission::ProjectsView => "projects.view",
            Permission::ProjectsCreate => "projects.create",
            Permission::ProjectsEdit => "projects.edit",
            Permission::ProjectsDelete => "projects.delete",
            Permission::ProjectsManageMembers => "projects.manage_members",
            Permission::NotesView => "notes.view",
            Permission::NotesCreate => "notes.create",
            Permission::NotesEdit => "notes.edit",
            Permission::NotesDelete => "notes.delete",
            Permission::ChatView => "chat.view",
            Permission::ChatSend => "chat.send",
            Permission::ChatManage => "chat.manage",
            Permission::ReportsView => "reports.view",
            Permission::ReportsExport => "reports.export",
            Permission::UsersView => "users.view",
            Permission::UsersManage => "users.manage",
            Permission::RolesManage => "roles.manage",
            Permission::SettingsManage => "settings.manage",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AppError::validation(&format!("Unknown permission: {}", s)))
    }
}

/// 命名的权限集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Manager,
    Member,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::Admin, Role::Manager, Role::Member];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AppError::validation(&format!("Unknown role: {}", s)))
    }
}

/// 角色 → 隐含权限的静态映射，评估期间只读
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRegistry {
    roles: BTreeMap<Role, BTreeSet<Permission>>,
}

impl RoleRegistry {
    pub fn new(roles: BTreeMap<Role, BTreeSet<Permission>>) -> Self {
        Self { roles }
    }

    /// 从 JSON 文档加载，例如 `{"roles": {"manager": ["tasks.view"]}}`
    pub fn from_json(json: &str) -> Result<Self, AppError> {
        serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("Invalid role registry: {}", e)))
    }

    /// 从文件加载
    pub fn from_file(path: &str) -> Result<Self, AppError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Cannot read role registry {}: {}", path, e)))?;
        Self::from_json(&contents)
    }

    /// 角色隐含的权限；未登记的角色不隐含任何权限
    pub fn implied(&self, role: Role) -> Option<&BTreeSet<Permission>> {
        self.roles.get(&role)
    }

    pub fn roles(&self) -> &BTreeMap<Role, BTreeSet<Permission>> {
        &self.roles
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        use self::Permission::*;

        let everything: BTreeSet<Permission> = Permission::ALL.into_iter().collect();

        let manager = [
            DashboardView,
            TasksView,
            TasksCreate,
            TasksEdit,
            TasksDelete,
            TasksAssign,
            ProjectsView,
            ProjectsCreate,
            ProjectsEdit,
            ProjectsManageMembers,
            NotesView,
            NotesCreate,
            NotesEdit,
            NotesDelete,
            ChatView,
            ChatSend,
            ReportsView,
            UsersView,
        ];

        let member = [
            DashboardView,
            TasksView,
            TasksCreate,
            TasksEdit,
            ProjectsView,
            NotesView,
            NotesCreate,
            NotesEdit,
            ChatView,
            ChatSend,
        ];

        let mut roles = BTreeMap::new();
        roles.insert(Role::SuperAdmin, everything.clone());
        roles.insert(Role::Admin, everything);
        roles.insert(Role::Manager, manager.into_iter().collect());
        roles.insert(Role::Member, member.into_iter().collect());
        Self { roles }
    }
}
