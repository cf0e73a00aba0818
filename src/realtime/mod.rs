//! 实时事件
//! 推送通道的事件定义与进程内事件总线

pub mod sync;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::error::{AppError, Result};
use crate::models::{
    chat::ChatMessage, notification::Notification, project::Project, task::TaskChanges,
};

pub use sync::RealtimeSynchronizer;

/// 服务端推送的实时事件
///
/// JSON 形如 `{"type": "task_changed", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// 任务部分字段变更
    TaskChanged {
        task_id: String,
        changes: TaskChanges,
    },
    /// 项目整体变更
    ProjectChanged { project: Project },
    /// 聊天室新消息
    MessageArrived {
        chat_id: String,
        message: ChatMessage,
    },
    /// 用户上下线
    UserPresenceChanged { user_id: String, online: bool },
    /// 新通知
    NotificationArrived { notification: Notification },
}

impl RealtimeEvent {
    /// 获取事件类型名称
    pub fn event_type(&self) -> &'static str {
        match self {
            RealtimeEvent::TaskChanged { .. } => "task_changed",
            RealtimeEvent::ProjectChanged { .. } => "project_changed",
            RealtimeEvent::MessageArrived { .. } => "message_arrived",
            RealtimeEvent::UserPresenceChanged { .. } => "user_presence_changed",
            RealtimeEvent::NotificationArrived { .. } => "notification_arrived",
        }
    }
}

/// 总线上传递的信号：连接状态变化或事件
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Connected,
    Disconnected { reason: Option<String> },
    Event(RealtimeEvent),
}

type RoomCounts = Arc<Mutex<HashMap<String, usize>>>;

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    /// 广播发送器（用于向所有订阅者发送信号）
    sender: broadcast::Sender<ChannelSignal>,
    /// 聊天室 → 加入者计数
    rooms: RoomCounts,
    connected: Arc<AtomicBool>,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            rooms: Arc::new(Mutex::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 发布事件，返回收到的订阅者数量
    ///
    /// 未加入的聊天室的消息不会投递
    pub fn publish(&self, event: RealtimeEvent) -> Result<usize> {
        if let RealtimeEvent::MessageArrived { chat_id, .. } = &event {
            if !self.is_joined(chat_id) {
                tracing::debug!(chat_id = %chat_id, "Dropping message for unjoined room");
                return Ok(0);
            }
        }

        self.send(ChannelSignal::Event(event))
    }

    /// 推送通道已连接
    pub fn connect(&self) -> Result<usize> {
        self.connected.store(true, Ordering::SeqCst);
        self.send(ChannelSignal::Connected)
    }

    /// 推送通道已断开
    pub fn disconnect(&self, reason: Option<String>) -> Result<usize> {
        self.connected.store(false, Ordering::SeqCst);
        self.send(ChannelSignal::Disconnected { reason })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// 订阅信号
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelSignal> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// 加入聊天室；返回的句柄被丢弃时自动离开
    pub fn join_room(&self, chat_id: impl Into<String>) -> RoomMembership {
        enter_room(&self.rooms, chat_id.into())
    }

    pub fn is_joined(&self, chat_id: &str) -> bool {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(chat_id)
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let mut joined: Vec<String> = rooms.keys().cloned().collect();
        joined.sort();
        joined
    }

    /// 由服务持有的聊天室订阅，生命周期与同步器一致
    pub fn room_subscriptions(&self) -> RoomSubscriptions {
        RoomSubscriptions {
            bus_rooms: self.rooms.clone(),
            held: Mutex::new(HashMap::new()),
        }
    }

    fn send(&self, signal: ChannelSignal) -> Result<usize> {
        self.sender
            .send(signal)
            .map_err(|e| AppError::internal_error(&format!("Failed to publish event: {}", e)))
    }
}

fn enter_room(rooms: &RoomCounts, chat_id: String) -> RoomMembership {
    let count = {
        let mut counts = rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(chat_id.clone()).or_insert(0);
        *count += 1;
        *count
    };
    if count == 1 {
        tracing::debug!(chat_id = %chat_id, "Joined chat room");
    }

    RoomMembership {
        chat_id,
        rooms: rooms.clone(),
    }
}

/// 聊天室成员资格
#[must_use = "dropping the membership leaves the room immediately"]
pub struct RoomMembership {
    chat_id: String,
    rooms: RoomCounts,
}

impl RoomMembership {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }
}

/// 以聊天室 id 为键持有成员资格，供 HTTP 接口加入和离开
pub struct RoomSubscriptions {
    bus_rooms: RoomCounts,
    held: Mutex<HashMap<String, RoomMembership>>,
}

impl RoomSubscriptions {
    /// 加入聊天室；已加入时返回 false
    pub fn join(&self, chat_id: &str) -> bool {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.contains_key(chat_id) {
            return false;
        }

        let membership = enter_room(&self.bus_rooms, chat_id.to_string());
        held.insert(chat_id.to_string(), membership);
        tracing::info!(chat_id = %chat_id, "Subscribed to chat room");
        true
    }

    /// 离开聊天室；未加入时返回 false
    pub fn leave(&self, chat_id: &str) -> bool {
        let removed = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(chat_id);
        if removed.is_some() {
            tracing::info!(chat_id = %chat_id, "Unsubscribed from chat room");
        }
        removed.is_some()
    }

    pub fn rooms(&self) -> Vec<String> {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rooms: Vec<String> = held.keys().cloned().collect();
        rooms.sort();
        rooms
    }
}

impl Drop for RoomMembership {
    fn drop(&mut self) {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = rooms.get_mut(&self.chat_id) {
            *count -= 1;
            if *count == 0 {
                rooms.remove(&self.chat_id);
                tracing::debug!(chat_id = %self.chat_id, "Left chat room");
            }
        }
    }
}
