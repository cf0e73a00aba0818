//! 测试公共模块
//! 提供测试配置、身份和示例实体

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use taskmaster_core::{
    cache::{CacheKey, CacheStore},
    config::{
        AccessConfig, ApiConfig, AppConfig, LoggingConfig, RealtimeConfig, RefetchConfig,
        ServerConfig,
    },
    middleware::AppState,
    models::{
        role::{Permission, Role, RoleRegistry},
        user::Identity,
    },
    notify::MemoryNotifier,
    realtime::{EventBus, RealtimeSynchronizer},
    remote::{Fetcher, RemoteError},
    services::{CacheLoader, PermissionService},
};

/// 创建测试配置
pub fn create_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(), // 使用随机端口
            graceful_shutdown_timeout_secs: 5,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        realtime: RealtimeConfig { bus_capacity: 64 },
        refetch: RefetchConfig {
            debounce_ms: 0,
            backoff_base_ms: 1,
            max_attempts: 3,
        },
        api: ApiConfig {
            base_url: None,
            request_timeout_ms: 1000,
            token: None,
        },
        access: AccessConfig::default(),
    }
}

/// 创建测试应用状态（使用内置角色注册表）
pub fn create_test_app_state() -> Arc<AppState> {
    create_test_app_state_with(Arc::new(CacheStore::new()))
}

/// 使用给定缓存创建应用状态，便于同时挂接同步器
pub fn create_test_app_state_with(cache: Arc<CacheStore>) -> Arc<AppState> {
    Arc::new(AppState::new(
        create_test_config(),
        Arc::new(PermissionService::new(Arc::new(RoleRegistry::default()))),
        cache,
        Arc::new(EventBus::new(64)),
    ))
}

/// 内存后端：按键返回预置的资源，未知键返回 404
#[derive(Default)]
pub struct InMemoryBackend {
    resources: HashMap<CacheKey, Value>,
    calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn with(mut self, key: CacheKey, value: Value) -> Self {
        self.resources.insert(key, value);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for InMemoryBackend {
    async fn fetch(&self, key: &CacheKey) -> Result<Value, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.resources
            .get(key)
            .cloned()
            .ok_or_else(|| RemoteError::new(Some(404), format!("{} not found", key)))
    }
}

/// 带首次拉取的应用状态
pub fn create_test_app_state_with_backend(
    cache: Arc<CacheStore>,
    backend: Arc<InMemoryBackend>,
) -> Arc<AppState> {
    let loader = Arc::new(CacheLoader::new(cache.clone(), backend));
    let state = AppState::new(
        create_test_config(),
        Arc::new(PermissionService::new(Arc::new(RoleRegistry::default()))),
        cache,
        Arc::new(EventBus::new(64)),
    );
    Arc::new(state.with_loader(loader))
}

pub fn default_evaluator() -> PermissionService {
    PermissionService::new(Arc::new(RoleRegistry::default()))
}

/// manager 只隐含 projects.view 的注册表
pub fn narrow_manager_registry() -> RoleRegistry {
    RoleRegistry::from_json(
        r#"{"roles": {
            "manager": ["projects.view", "tasks.view"],
            "member": ["tasks.view"]
        }}"#,
    )
    .expect("valid registry")
}

pub fn super_admin() -> Identity {
    Identity::new("root", "Root").with_role(Role::SuperAdmin)
}

pub fn manager() -> Identity {
    Identity::new("u-manager", "Mia").with_role(Role::Manager)
}

pub fn member_with(permissions: &[Permission]) -> Identity {
    permissions
        .iter()
        .fold(Identity::new("u-member", "Max").with_role(Role::Member), |identity, p| {
            identity.with_permission(*p)
        })
}

/// 同步器 + 内存通知
pub fn synchronizer() -> (Arc<CacheStore>, Arc<MemoryNotifier>, RealtimeSynchronizer) {
    let store = Arc::new(CacheStore::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let sync = RealtimeSynchronizer::new(store.clone(), notifier.clone());
    (store, notifier, sync)
}

pub fn user_json(id: &str, online: bool) -> Value {
    json!({"id": id, "name": format!("User {}", id), "is_online": online})
}

pub fn task_json(id: &str, assignees: &[Value]) -> Value {
    json!({
        "id": id,
        "title": "Write release notes",
        "status": "todo",
        "priority": "medium",
        "assignees": assignees,
        "updated_at": "2026-01-05T10:00:00Z"
    })
}

pub fn project_json(id: &str, members: &[Value]) -> Value {
    json!({
        "id": id,
        "name": "Apollo",
        "status": "active",
        "owner": user_json("owner", true),
        "members": members
    })
}

pub fn message_json(chat_id: &str, id: &str, content: &str) -> Value {
    json!({
        "id": id,
        "chat_id": chat_id,
        "sender": user_json("u1", true),
        "content": content,
        "created_at": "2026-01-05T10:00:00Z"
    })
}
