//! 数据模型模块
//! 权限模型（角色、权限、访问要求）与工作区实体（任务、项目、聊天、通知）

pub mod access;
pub mod chat;
pub mod notification;
pub mod project;
pub mod role;
pub mod task;
pub mod user;
