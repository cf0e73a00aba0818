//! 缓存存储
//! 进程级共享状态，只能通过这里的变更接口修改；读取一律返回副本。
//! 所有变更都在同一把写锁内完成，多条命令原子生效。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{
    claim::Claim,
    command::{self, CacheCommand},
    key::CacheKey,
    optimistic::{Confirmation, Resolution, Snapshot},
    refetch::RefetchQueue,
};

/// 条目的可观察状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// 与最后一次服务端确认的值一致
    Fresh,
    /// 有本地乐观写入等待请求结果
    OptimisticPending,
    /// 需要重新拉取（可继续展示当前值）
    Stale,
}

/// 权威写入的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Fetch,
    Realtime,
    Refetch,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Fetch => "fetch",
            Origin::Realtime => "realtime",
            Origin::Refetch => "refetch",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub key: CacheKey,
    pub value: Option<Value>,
    pub state: EntryState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub changed: Vec<CacheKey>,
    pub staled: Vec<CacheKey>,
    /// 因 `id` 已存在而整体跳过的命令所针对的键
    pub duplicates: Vec<CacheKey>,
}

struct Entry {
    value: Option<Value>,
    stale: bool,
    /// 每次标记过期递增，用于判断拉取期间是否又被标记
    epoch: u64,
    updated_at: DateTime<Utc>,
}

impl Entry {
    fn empty() -> Self {
        Self {
            value: None,
            stale: false,
            epoch: 0,
            updated_at: Utc::now(),
        }
    }
}

struct PendingRecord {
    id: Uuid,
    operation: String,
    /// 回滚基线，会随权威写入一起变基
    snapshot: Option<Value>,
    claim: Claim,
    /// 是否接管了同一操作更早的乐观写入
    supersedes: bool,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<CacheKey, Entry>,
    pending: BTreeMap<CacheKey, Vec<PendingRecord>>,
}

impl Inner {
    fn state_of(&self, key: &CacheKey, entry: &Entry) -> EntryState {
        if entry.stale {
            EntryState::Stale
        } else if self.pending.get(key).is_some_and(|records| !records.is_empty()) {
            EntryState::OptimisticPending
        } else {
            EntryState::Fresh
        }
    }

    fn snapshot_of(&self, key: &CacheKey, entry: &Entry) -> EntrySnapshot {
        EntrySnapshot {
            key: key.clone(),
            value: entry.value.clone(),
            state: self.state_of(key, entry),
            updated_at: entry.updated_at,
        }
    }

    /// 权威写入：同时作用于可见值和所有待确认快照，再把待确认的乐观改动覆盖回去
    fn write_authoritative<F>(&mut self, key: &CacheKey, create: bool, write: F) -> bool
    where
        F: Fn(&mut Option<Value>) -> bool,
    {
        if !create && !self.entries.contains_key(key) {
            return false;
        }

        let entry = self.entries.entry(key.clone()).or_insert_with(Entry::empty);
        let changed = write(&mut entry.value);

        if let Some(records) = self.pending.get_mut(key) {
            for record in records.iter_mut() {
                write(&mut record.snapshot);
            }
            for record in records.iter() {
                record.claim.overlay(&mut entry.value);
            }
        }

        if changed {
            entry.updated_at = Utc::now();
        }
        changed
    }

    fn mark_stale(&mut self, key: &CacheKey, report: &mut ApplyReport) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.stale = true;
            entry.epoch += 1;
            report.staled.push(key.clone());
        }
    }

    fn take_pending(&mut self, key: &CacheKey, id: Uuid) -> Option<PendingRecord> {
        let records = self.pending.get_mut(key)?;
        let position = records.iter().position(|record| record.id == id)?;
        let record = records.remove(position);
        if records.is_empty() {
            self.pending.remove(key);
        }
        Some(record)
    }

    fn apply_command(&mut self, cmd: &CacheCommand, report: &mut ApplyReport) {
        let changed = match cmd {
            CacheCommand::Set { key, value } => self.write_authoritative(key, true, |v| {
                let changed = v.as_ref() != Some(value);
                *v = Some(value.clone());
                changed
            }),
            CacheCommand::Replace { key, value } => self.write_authoritative(key, false, |v| {
                let changed = v.as_ref() != Some(value);
                *v = Some(value.clone());
                changed
            }),
            CacheCommand::Merge { key, patch } => {
                self.write_authoritative(key, false, |v| command::merge_fields(v, patch))
            }
            CacheCommand::AppendUnique { key, item } => {
                self.write_authoritative(key, false, |v| command::append_unique(v, item))
            }
            CacheCommand::Prepend { key, item } => {
                self.write_authoritative(key, false, |v| command::prepend_unique(v, item))
            }
            CacheCommand::Increment { key, by } => {
                self.write_authoritative(key, false, |v| command::increment(v, *by))
            }
            CacheCommand::PrependCounted {
                key,
                item,
                counter,
                by,
            } => {
                let visible = self.entries.get(key).and_then(|entry| entry.value.as_ref());
                if command::has_item(visible, item) {
                    report.duplicates.push(key.clone());
                    return;
                }
                let prepended =
                    self.write_authoritative(key, false, |v| command::prepend_unique(v, item));
                if self.write_authoritative(counter, false, |v| command::increment(v, *by)) {
                    report.changed.push(counter.clone());
                }
                prepended
            }
            CacheCommand::PatchEmbedded { id, field, value } => {
                let keys: Vec<CacheKey> = self.entries.keys().cloned().collect();
                for key in keys {
                    let patched = self.write_authoritative(&key, false, |v| {
                        v.as_mut()
                            .is_some_and(|inner| command::patch_embedded(inner, id, field, value))
                    });
                    if patched {
                        report.changed.push(key);
                    }
                }
                false
            }
            CacheCommand::Invalidate { key } => {
                self.mark_stale(key, report);
                false
            }
            CacheCommand::InvalidatePrefix { prefix } => {
                let keys: Vec<CacheKey> = self
                    .entries
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect();
                for key in keys {
                    self.mark_stale(&key, report);
                }
                false
            }
            CacheCommand::Remove { key } => {
                self.pending.remove(key);
                self.entries.remove(key).is_some()
            }
        };

        if changed {
            if let Some(key) = cmd.key() {
                report.changed.push(key.clone());
            }
        }
    }
}

/// 服务端状态的进程级缓存，按 [`CacheKey`] 寻址
pub struct CacheStore {
    inner: RwLock<Inner>,
    refetch: Arc<RefetchQueue>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            refetch: Arc::new(RefetchQueue::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 过期条目进入的重新拉取队列
    pub fn refetch_queue(&self) -> Arc<RefetchQueue> {
        self.refetch.clone()
    }

    // ===== 读取（返回副本） =====

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.read().entries.get(key).and_then(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.read().entries.contains_key(key)
    }

    pub fn entry(&self, key: &CacheKey) -> Option<EntrySnapshot> {
        let inner = self.read();
        inner.entries.get(key).map(|entry| inner.snapshot_of(key, entry))
    }

    pub fn state(&self, key: &CacheKey) -> Option<EntryState> {
        let inner = self.read();
        inner.entries.get(key).map(|entry| inner.state_of(key, entry))
    }

    pub fn entries(&self) -> Vec<EntrySnapshot> {
        let inner = self.read();
        inner
            .entries
            .iter()
            .map(|(key, entry)| inner.snapshot_of(key, entry))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 待确认的乐观写入数量
    pub fn pending_count(&self) -> usize {
        self.read().pending.values().map(Vec::len).sum()
    }

    // ===== 权威写入 =====

    /// 原子地执行一批命令
    pub fn apply(&self, commands: &[CacheCommand], origin: Origin) -> ApplyReport {
        let mut report = ApplyReport::default();
        {
            let mut guard = self.write();
            for cmd in commands {
                guard.apply_command(cmd, &mut report);
            }
        }

        self.refetch.push_all(report.staled.iter().cloned());

        tracing::debug!(
            origin = origin.as_str(),
            commands = commands.len(),
            changed = report.changed.len(),
            staled = report.staled.len(),
            "Cache commands applied"
        );
        report
    }

    pub fn set(&self, key: CacheKey, value: Value) -> ApplyReport {
        self.apply(&[CacheCommand::Set { key, value }], Origin::Fetch)
    }

    pub fn merge(&self, key: CacheKey, patch: Map<String, Value>) -> ApplyReport {
        self.apply(&[CacheCommand::Merge { key, patch }], Origin::Fetch)
    }

    pub fn invalidate(&self, key: CacheKey) -> ApplyReport {
        self.apply(&[CacheCommand::Invalidate { key }], Origin::Fetch)
    }

    pub fn remove(&self, key: CacheKey) -> ApplyReport {
        self.apply(&[CacheCommand::Remove { key }], Origin::Fetch)
    }

    /// 全部标记过期（例如实时通道重连后可能错过了事件）
    pub fn invalidate_all(&self) -> ApplyReport {
        let mut report = ApplyReport::default();
        {
            let mut guard = self.write();
            let keys: Vec<CacheKey> = guard.entries.keys().cloned().collect();
            for key in keys {
                guard.mark_stale(&key, &mut report);
            }
        }
        self.refetch.push_all(report.staled.iter().cloned());
        report
    }

    /// 清空（登出/重置）
    pub fn clear(&self) {
        {
            let mut guard = self.write();
            guard.entries.clear();
            guard.pending.clear();
        }
        self.refetch.clear();
        tracing::info!("Cache cleared");
    }

    // ===== 后台重新拉取 =====

    /// 开始拉取，返回当前过期纪元；条目已不存在时返回 None
    pub fn begin_refetch(&self, key: &CacheKey) -> Option<u64> {
        self.read().entries.get(key).map(|entry| entry.epoch)
    }

    /// 拉取完成：写入新值；若拉取期间未再次被标记过期则恢复为 Fresh
    pub fn complete_refetch(&self, key: &CacheKey, epoch: u64, value: Value) -> bool {
        let mut guard = self.write();
        let inner = &mut *guard;

        if !inner.entries.contains_key(key) {
            return false;
        }

        inner.write_authoritative(key, false, |v| {
            let changed = v.as_ref() != Some(&value);
            *v = Some(value.clone());
            changed
        });

        match inner.entries.get_mut(key) {
            Some(entry) if entry.epoch == epoch => {
                entry.stale = false;
                true
            }
            _ => false,
        }
    }

    // ===== 乐观更新 =====

    /// 第一阶段：记录快照。同一 (键, 操作) 已有待确认记录时接管它并继承其基线。
    pub fn begin(&self, key: CacheKey, operation: impl Into<String>) -> Snapshot {
        let operation = operation.into();
        let id = Uuid::new_v4();

        let mut guard = self.write();
        let inner = &mut *guard;
        let current = inner.entries.get(&key).and_then(|entry| entry.value.clone());
        let records = inner.pending.entry(key.clone()).or_default();

        let (snapshot, claim, supersedes) =
            match records.iter().position(|record| record.operation == operation) {
                Some(position) => {
                    let earlier = records.remove(position);
                    tracing::debug!(
                        key = %key,
                        operation = %operation,
                        superseded = %earlier.id,
                        "Optimistic mutation superseded"
                    );
                    (earlier.snapshot, earlier.claim, true)
                }
                None => (current, Claim::Nothing, false),
            };

        records.push(PendingRecord {
            id,
            operation: operation.clone(),
            snapshot,
            claim,
            supersedes,
        });

        Snapshot { id, key, operation }
    }

    pub(super) fn apply_pending<F>(&self, key: &CacheKey, id: Uuid, tentative: F) -> bool
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        let mut guard = self.write();
        let inner = &mut *guard;

        let Some(record) = inner
            .pending
            .get_mut(key)
            .and_then(|records| records.iter_mut().find(|record| record.id == id))
        else {
            return false;
        };

        let entry = inner.entries.entry(key.clone()).or_insert_with(Entry::empty);
        let value = tentative(entry.value.as_ref());
        record.claim = Claim::diff(&record.snapshot, &value);
        entry.value = value;
        entry.updated_at = Utc::now();
        true
    }

    pub(super) fn commit_pending(
        &self,
        key: &CacheKey,
        id: Uuid,
        confirmation: Confirmation,
    ) -> Resolution {
        let mut guard = self.write();
        let inner = &mut *guard;

        let Some(record) = inner.take_pending(key, id) else {
            return Resolution::Superseded;
        };

        match confirmation {
            Confirmation::Replace(value) => {
                inner.write_authoritative(key, true, |v| {
                    *v = Some(value.clone());
                    true
                });
            }
            Confirmation::UpsertItem(item) => {
                // 先撤销本地临时元素（可能使用临时 id），再写入服务端元素
                if let Some(entry) = inner.entries.get_mut(key) {
                    record.claim.revert(&mut entry.value, &record.snapshot);
                }
                if let Some(others) = inner.pending.get_mut(key) {
                    for other in others.iter_mut() {
                        record.claim.revert(&mut other.snapshot, &record.snapshot);
                    }
                }
                inner.write_authoritative(key, false, |v| command::upsert_item(v, &item));
            }
            Confirmation::Keep => {
                // 乐观值即服务端状态，其余待确认记录的基线随之前进
                if let Some(others) = inner.pending.get_mut(key) {
                    for other in others.iter_mut() {
                        record.claim.overlay(&mut other.snapshot);
                    }
                }
            }
        }

        tracing::debug!(key = %key, operation = %record.operation, "Optimistic mutation committed");
        Resolution::Committed
    }

    pub(super) fn rollback_pending(&self, key: &CacheKey, id: Uuid) -> Resolution {
        let mut report = ApplyReport::default();
        {
            let mut guard = self.write();
            let inner = &mut *guard;

            let Some(record) = inner.take_pending(key, id) else {
                return Resolution::Superseded;
            };

            if let Some(others) = inner.pending.get_mut(key) {
                for other in others.iter_mut() {
                    record.claim.revert(&mut other.snapshot, &record.snapshot);
                }
            }

            if let Some(entry) = inner.entries.get_mut(key) {
                entry.value = record.snapshot.clone();
                if let Some(others) = inner.pending.get(key) {
                    for other in others {
                        other.claim.overlay(&mut entry.value);
                    }
                }
                entry.updated_at = Utc::now();
            }

            // 乐观写入创建的条目，回滚后不应残留
            if record.snapshot.is_none() && !inner.pending.contains_key(key) {
                inner.entries.remove(key);
            }

            // 被接管的更早请求可能已在服务端生效，基线不再可信
            if record.supersedes {
                inner.mark_stale(key, &mut report);
            }

            tracing::debug!(
                key = %key,
                operation = %record.operation,
                "Optimistic mutation rolled back"
            );
        }

        self.refetch.push_all(report.staled);
        Resolution::RolledBack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reads_return_copies() {
        let store = CacheStore::new();
        store.set(CacheKey::task_detail("t1"), json!({"id": "t1", "title": "A"}));

        let mut copy = store.get(&CacheKey::task_detail("t1")).unwrap();
        copy["title"] = json!("mutated");

        assert_eq!(store.get(&CacheKey::task_detail("t1")).unwrap()["title"], "A");
    }

    #[test]
    fn test_merge_requires_existing_entry() {
        let store = CacheStore::new();
        let patch = json!({"status": "done"}).as_object().cloned().unwrap();
        let report = store.merge(CacheKey::task_detail("t1"), patch);
        assert!(report.changed.is_empty());
        assert!(!store.contains(&CacheKey::task_detail("t1")));
    }

    #[test]
    fn test_invalidate_marks_stale_and_queues_refetch() {
        let store = CacheStore::new();
        store.set(CacheKey::task_lists(), json!([]));
        assert_eq!(store.state(&CacheKey::task_lists()), Some(EntryState::Fresh));

        store.invalidate(CacheKey::task_lists());
        store.invalidate(CacheKey::task_lists());
        assert_eq!(store.state(&CacheKey::task_lists()), Some(EntryState::Stale));
        assert_eq!(store.refetch_queue().len(), 1);
    }

    #[test]
    fn test_refetch_completion_restores_fresh() {
        let store = CacheStore::new();
        let key = CacheKey::task_lists();
        store.set(key.clone(), json!([]));
        store.invalidate(key.clone());

        let epoch = store.begin_refetch(&key).unwrap();
        assert!(store.complete_refetch(&key, epoch, json!([{"id": "t1"}])));
        assert_eq!(store.state(&key), Some(EntryState::Fresh));
        assert_eq!(store.get(&key), Some(json!([{"id": "t1"}])));
    }

    #[test]
    fn test_refetch_stays_stale_when_invalidated_during_fetch() {
        let store = CacheStore::new();
        let key = CacheKey::task_lists();
        store.set(key.clone(), json!([]));
        store.invalidate(key.clone());

        let epoch = store.begin_refetch(&key).unwrap();
        store.invalidate(key.clone());
        assert!(!store.complete_refetch(&key, epoch, json!([{"id": "t1"}])));
        assert_eq!(store.state(&key), Some(EntryState::Stale));
        assert_eq!(store.get(&key), Some(json!([{"id": "t1"}])));
    }

    #[test]
    fn test_refetch_after_clear_is_dropped() {
        let store = CacheStore::new();
        let key = CacheKey::chat_rooms();
        store.set(key.clone(), json!([]));
        let epoch = store.begin_refetch(&key).unwrap();

        store.clear();
        assert!(!store.complete_refetch(&key, epoch, json!([])));
        assert!(store.is_empty());
    }

    #[test]
    fn test_prepend_counted_skips_both_on_duplicate() {
        let store = CacheStore::new();
        store.set(CacheKey::notifications(), json!([{"id": "n1"}]));
        store.set(CacheKey::unread_count(), json!(1));

        let command = |id: &str| CacheCommand::PrependCounted {
            key: CacheKey::notifications(),
            item: json!({"id": id}),
            counter: CacheKey::unread_count(),
            by: 1,
        };

        let report = store.apply(&[command("n1")], Origin::Realtime);
        assert_eq!(report.duplicates, vec![CacheKey::notifications()]);
        assert!(report.changed.is_empty());
        assert_eq!(store.get(&CacheKey::unread_count()), Some(json!(1)));

        let report = store.apply(&[command("n2")], Origin::Realtime);
        assert!(report.duplicates.is_empty());
        assert_eq!(report.changed.len(), 2);
        assert_eq!(store.get(&CacheKey::unread_count()), Some(json!(2)));
        assert_eq!(store.get(&CacheKey::notifications()).unwrap()[0]["id"], "n2");
    }

    #[test]
    fn test_prefix_invalidation_leaves_other_entities() {
        let store = CacheStore::new();
        store.set(CacheKey::task_lists(), json!([]));
        store.set(CacheKey::project_task_list("p1"), json!([]));
        store.set(CacheKey::task_detail("t1"), json!({"id": "t1"}));

        let report = store.apply(
            &[CacheCommand::InvalidatePrefix {
                prefix: CacheKey::task_lists(),
            }],
            Origin::Realtime,
        );
        assert_eq!(report.staled.len(), 2);
        assert_eq!(store.state(&CacheKey::task_detail("t1")), Some(EntryState::Fresh));
    }
}
