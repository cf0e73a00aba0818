//! 后台重新拉取
//! 消费去重队列，把过期条目刷新为服务端最新值

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

use crate::{
    cache::{CacheKey, CacheStore},
    config::RefetchConfig,
    notify::{Notice, Notifier},
    remote::Fetcher,
    telemetry::metric_names,
};

/// 单键拉取结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchOutcome {
    /// 已刷新为 Fresh
    Refreshed,
    /// 写入了新值，但拉取期间又被标记过期
    StillStale,
    /// 条目已不存在
    Skipped,
    /// 失败，已安排重试
    Retrying,
    /// 失败且达到最大次数
    GaveUp,
}

pub struct RefetchWorker {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    config: RefetchConfig,
    attempts: Mutex<HashMap<CacheKey, u32>>,
}

impl RefetchWorker {
    pub fn new(
        store: Arc<CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
        config: RefetchConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.store.refetch_queue();
        tracing::info!(debounce_ms = self.config.debounce_ms, "Refetch worker started");

        loop {
            tokio::select! {
                _ = queue.wait() => {}
                _ = shutdown.changed() => break,
            }

            // 等待一小段时间，让同一批过期标记合并
            tokio::time::sleep(Duration::from_millis(self.config.debounce_ms)).await;
            self.run_once().await;
        }

        tracing::info!("Refetch worker stopped");
    }

    /// 取走当前队列中的全部键并逐个拉取
    pub async fn run_once(&self) -> Vec<(CacheKey, RefetchOutcome)> {
        let keys = self.store.refetch_queue().drain();
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = self.refetch(&key).await;
            outcomes.push((key, outcome));
        }
        outcomes
    }

    pub async fn refetch(&self, key: &CacheKey) -> RefetchOutcome {
        let Some(epoch) = self.store.begin_refetch(key) else {
            // 条目已被移除或清空，之前的失败计数作废
            self.attempts_mut().remove(key);
            return RefetchOutcome::Skipped;
        };

        match self.fetcher.fetch(key).await {
            Ok(value) => {
                self.attempts_mut().remove(key);
                if self.store.complete_refetch(key, epoch, value) {
                    tracing::debug!(key = %key, "Cache entry refreshed");
                    RefetchOutcome::Refreshed
                } else {
                    RefetchOutcome::StillStale
                }
            }
            Err(err) => {
                metrics::counter!(metric_names::REFETCH_FAILURES).increment(1);

                let attempt = {
                    let mut attempts = self.attempts_mut();
                    let count = attempts.entry(key.clone()).or_insert(0);
                    *count += 1;
                    *count
                };

                if attempt >= self.config.max_attempts {
                    self.attempts_mut().remove(key);
                    tracing::warn!(key = %key, attempts = attempt, error = %err, "Refetch gave up");
                    self.notifier.notify(Notice::warning(
                        "Could not refresh data",
                        format!("{}: {}", key, err.message),
                    ));
                    return RefetchOutcome::GaveUp;
                }

                let delay = self.backoff(attempt);
                tracing::debug!(
                    key = %key,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Refetch failed, retrying"
                );

                let queue = self.store.refetch_queue();
                let key = key.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.push(key);
                });
                RefetchOutcome::Retrying
            }
        }
    }

    /// 第 n 次失败后的等待时间：base * 2^(n-1)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.config.backoff_base_ms.saturating_mul(1u64 << exponent))
    }

    /// 当前连续失败次数
    pub fn failed_attempts(&self, key: &CacheKey) -> u32 {
        self.attempts_mut().get(key).copied().unwrap_or(0)
    }

    fn attempts_mut(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, u32>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Unreachable;

    #[async_trait]
    impl Fetcher for Unreachable {
        async fn fetch(&self, _key: &CacheKey) -> std::result::Result<Value, RemoteError> {
            Err(RemoteError::new(None, "connection refused"))
        }
    }

    fn worker(max_attempts: u32) -> RefetchWorker {
        RefetchWorker::new(
            Arc::new(CacheStore::new()),
            Arc::new(Unreachable),
            Arc::new(MemoryNotifier::new()),
            RefetchConfig {
                debounce_ms: 0,
                backoff_base_ms: 100,
                max_attempts,
            },
        )
    }

    #[test]
    fn test_backoff_doubles() {
        let worker = worker(3);
        assert_eq!(worker.backoff(1), Duration::from_millis(100));
        assert_eq!(worker.backoff(2), Duration::from_millis(200));
        assert_eq!(worker.backoff(4), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_skipped_key_forgets_failed_attempts() {
        let worker = worker(3);
        let key = CacheKey::task_lists();
        worker.store.set(key.clone(), serde_json::json!([]));

        assert_eq!(worker.refetch(&key).await, RefetchOutcome::Retrying);
        assert_eq!(worker.failed_attempts(&key), 1);

        worker.store.clear();
        assert_eq!(worker.refetch(&key).await, RefetchOutcome::Skipped);
        assert_eq!(worker.failed_attempts(&key), 0);
    }

    #[tokio::test]
    async fn test_missing_entry_is_skipped() {
        let worker = worker(3);
        assert_eq!(
            worker.refetch(&CacheKey::task_lists()).await,
            RefetchOutcome::Skipped
        );
    }
}
