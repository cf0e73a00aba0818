//! 实时同步器
//! 把推送事件翻译成缓存命令，按到达顺序逐条执行

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use super::{ChannelSignal, RealtimeEvent};
use crate::cache::{ApplyReport, CacheCommand, CacheKey, CacheStore, Origin};
use crate::error::{AppError, Result};
use crate::models::user::PRESENCE_FIELD;
use crate::notify::{Notice, Notifier};
use crate::telemetry::metric_names;

pub struct RealtimeSynchronizer {
    store: Arc<CacheStore>,
    notifier: Arc<dyn Notifier>,
    /// 曾经断开过；下一次连接时需要整体失效
    was_disconnected: AtomicBool,
}

impl RealtimeSynchronizer {
    pub fn new(store: Arc<CacheStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            was_disconnected: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// 事件 → 缓存命令（纯函数）
    pub fn plan(event: &RealtimeEvent) -> Result<Vec<CacheCommand>> {
        let commands = match event {
            RealtimeEvent::TaskChanged { task_id, changes } => vec![
                CacheCommand::Merge {
                    key: CacheKey::task_detail(task_id),
                    patch: changes.clone(),
                },
                // 列表可能受排序或筛选影响，交给重新拉取
                CacheCommand::InvalidatePrefix {
                    prefix: CacheKey::task_lists(),
                },
            ],
            RealtimeEvent::ProjectChanged { project } => vec![
                CacheCommand::Replace {
                    key: CacheKey::project_detail(&project.id),
                    value: to_value(project)?,
                },
                CacheCommand::InvalidatePrefix {
                    prefix: CacheKey::project_lists(),
                },
            ],
            RealtimeEvent::MessageArrived { chat_id, message } => vec![
                CacheCommand::AppendUnique {
                    key: CacheKey::chat_messages(chat_id),
                    item: to_value(message)?,
                },
                // 最后一条消息与未读数
                CacheCommand::Invalidate {
                    key: CacheKey::chat_rooms(),
                },
            ],
            RealtimeEvent::UserPresenceChanged { user_id, online } => {
                vec![CacheCommand::PatchEmbedded {
                    id: user_id.clone(),
                    field: PRESENCE_FIELD.to_string(),
                    value: Value::Bool(*online),
                }]
            }
            // 去重与计数在同一把锁内完成
            RealtimeEvent::NotificationArrived { notification } => {
                vec![CacheCommand::PrependCounted {
                    key: CacheKey::notifications(),
                    item: to_value(notification)?,
                    counter: CacheKey::unread_count(),
                    by: 1,
                }]
            }
        };

        Ok(commands)
    }

    /// 执行单个事件
    pub fn handle(&self, event: &RealtimeEvent) -> Result<ApplyReport> {
        let commands = Self::plan(event)?;
        let report = self.store.apply(&commands, Origin::Realtime);

        if let RealtimeEvent::NotificationArrived { notification } = event {
            if !report.duplicates.is_empty() {
                tracing::debug!(
                    notification_id = %notification.id,
                    "Duplicate notification ignored"
                );
                return Ok(report);
            }
        }

        metrics::counter!(metric_names::REALTIME_EVENTS_APPLIED, "event" => event.event_type())
            .increment(1);
        tracing::debug!(
            event = event.event_type(),
            changed = report.changed.len(),
            staled = report.staled.len(),
            "Realtime event applied"
        );

        if let RealtimeEvent::NotificationArrived { notification } = event {
            self.notifier.notify(Notice::info(&notification.title, &notification.message));
        }

        Ok(report)
    }

    /// 处理总线信号
    pub fn handle_signal(&self, signal: &ChannelSignal) {
        match signal {
            ChannelSignal::Connected => {
                if self.was_disconnected.swap(false, Ordering::SeqCst) {
                    // 断线期间的事件已丢失
                    let report = self.store.invalidate_all();
                    tracing::info!(
                        staled = report.staled.len(),
                        "Realtime channel reconnected, cache invalidated"
                    );
                } else {
                    tracing::info!("Realtime channel connected");
                }
            }
            ChannelSignal::Disconnected { reason } => {
                self.was_disconnected.store(true, Ordering::SeqCst);
                tracing::warn!(
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "Realtime channel disconnected, cache may go stale"
                );
            }
            ChannelSignal::Event(event) => {
                if let Err(e) = self.handle(event) {
                    tracing::warn!(
                        event = event.event_type(),
                        error = %e,
                        "Failed to apply realtime event"
                    );
                }
            }
        }
    }

    /// 消费总线直到通道关闭
    pub async fn run(&self, mut receiver: broadcast::Receiver<ChannelSignal>) {
        loop {
            match receiver.recv().await {
                Ok(signal) => self.handle_signal(&signal),
                Err(RecvError::Lagged(skipped)) => {
                    let report = self.store.invalidate_all();
                    tracing::warn!(
                        skipped = skipped,
                        staled = report.staled.len(),
                        "Realtime receiver lagged, cache invalidated"
                    );
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Realtime channel closed, running without live updates");
                    break;
                }
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| AppError::internal_error(&format!("Failed to encode event payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_changed_plan() {
        let event = RealtimeEvent::TaskChanged {
            task_id: "t1".to_string(),
            changes: json!({"status": "done"}).as_object().unwrap().clone(),
        };
        let commands = RealtimeSynchronizer::plan(&event).unwrap();

        assert_eq!(commands.len(), 2);
        assert!(matches!(
            &commands[0],
            CacheCommand::Merge { key, .. } if *key == CacheKey::task_detail("t1")
        ));
        assert!(matches!(
            &commands[1],
            CacheCommand::InvalidatePrefix { prefix } if *prefix == CacheKey::task_lists()
        ));
    }

    #[test]
    fn test_presence_plan_is_cross_entry() {
        let event = RealtimeEvent::UserPresenceChanged {
            user_id: "u7".to_string(),
            online: true,
        };
        let commands = RealtimeSynchronizer::plan(&event).unwrap();

        assert_eq!(
            commands,
            vec![CacheCommand::PatchEmbedded {
                id: "u7".to_string(),
                field: "is_online".to_string(),
                value: Value::Bool(true),
            }]
        );
    }
}
