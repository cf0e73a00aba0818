//! 缓存键寻址
//! 以点号分隔的分段路径定位缓存条目，例如 `tasks.detail.<id>`

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::str::FromStr;

use crate::error::AppError;

/// 缓存条目的分段路径
///
/// 分段按字面比较。文本形式中分段内的 `.` 与 `\` 以 `\` 转义，
/// 因此任意 id 都能原样往返。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey {
    segments: Vec<String>,
}

impl CacheKey {
    /// 由分段构造键
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// 实体类型（第一段）
    pub fn entity(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or_default()
    }

    /// 是否以给定前缀开头（按段比较）
    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments.iter().zip(&prefix.segments).all(|(a, b)| a == b)
    }

    /// 追加一个分段
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    // ===== 任务 =====

    pub fn task_lists() -> Self {
        Self::new(["tasks", "list"])
    }

    pub fn project_task_list(project_id: &str) -> Self {
        Self::new(["tasks", "list", "project", project_id])
    }

    pub fn task_detail(task_id: &str) -> Self {
        Self::new(["tasks", "detail", task_id])
    }

    // ===== 项目 =====

    pub fn project_lists() -> Self {
        Self::new(["projects", "list"])
    }

    pub fn project_detail(project_id: &str) -> Self {
        Self::new(["projects", "detail", project_id])
    }

    // ===== 聊天 =====

    pub fn chat_rooms() -> Self {
        Self::new(["chat", "rooms"])
    }

    pub fn chat_messages(chat_id: &str) -> Self {
        Self::new(["chat", "messages", chat_id])
    }

    // ===== 通知 =====

    pub fn notifications() -> Self {
        Self::new(["notifications", "list"])
    }

    pub fn unread_count() -> Self {
        Self::new(["notifications", "unread"])
    }

    // ===== 用户 =====

    pub fn team_members() -> Self {
        Self::new(["users", "list"])
    }

    pub fn user_detail(user_id: &str) -> Self {
        Self::new(["users", "detail", user_id])
    }

    /// 映射到后端 REST 资源路径（用于后台重新拉取）
    pub fn resource_path(&self) -> Option<String> {
        let parts: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        let path = match parts.as_slice() {
            ["tasks", "list"] => "/tasks".to_string(),
            ["tasks", "list", "project", id] => format!("/projects/{}/tasks", id),
            ["tasks", "detail", id] => format!("/tasks/{}", id),
            ["projects", "list"] => "/projects".to_string(),
            ["projects", "detail", id] => format!("/projects/{}", id),
            ["chat", "rooms"] => "/chats".to_string(),
            ["chat", "messages", id] => format!("/chats/{}/messages", id),
            ["notifications", "list"] => "/notifications".to_string(),
            ["notifications", "unread"] => "/notifications/unread-count".to_string(),
            ["users", "list"] => "/users".to_string(),
            ["users", "detail", id] => format!("/users/{}", id),
            _ => return None,
        };
        Some(path)
    }
}

const SEPARATOR: char = '.';
const ESCAPE: char = '\\';

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                f.write_char(SEPARATOR)?;
            }
            for ch in segment.chars() {
                if ch == SEPARATOR || ch == ESCAPE {
                    f.write_char(ESCAPE)?;
                }
                f.write_char(ch)?;
            }
        }
        Ok(())
    }
}

impl FromStr for CacheKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::validation(&format!("Invalid cache key: {:?}", s));

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = s.chars();
        while let Some(ch) = chars.next() {
            match ch {
                ESCAPE => current.push(chars.next().ok_or_else(invalid)?),
                SEPARATOR => segments.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }
        segments.push(current);

        if segments.iter().any(String::is_empty) {
            return Err(invalid());
        }
        Ok(Self { segments })
    }
}

impl TryFrom<String> for CacheKey {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}
