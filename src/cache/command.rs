//! 缓存变更命令
//! 同步器只产出命令，由存储统一执行，不直接依赖具体缓存实现

use serde_json::{Map, Value};

use super::key::CacheKey;

/// 针对缓存存储的单条变更
#[derive(Debug, Clone, PartialEq)]
pub enum CacheCommand {
    /// 写入（不存在则创建）
    Set { key: CacheKey, value: Value },
    /// 整体替换已存在的条目
    Replace { key: CacheKey, value: Value },
    /// 浅合并对象字段到已存在的条目
    Merge { key: CacheKey, patch: Map<String, Value> },
    /// 追加到已存在的数组，`id` 重复时忽略
    AppendUnique { key: CacheKey, item: Value },
    /// 插入到已存在数组的头部，`id` 重复时忽略
    Prepend { key: CacheKey, item: Value },
    /// 已存在的数值加上 `by`
    Increment { key: CacheKey, by: i64 },
    /// 插入到数组头部并给计数器加 `by`；`id` 已在数组中时两者都不执行
    PrependCounted {
        key: CacheKey,
        item: Value,
        counter: CacheKey,
        by: i64,
    },
    /// 所有条目中 `id` 匹配的嵌入对象更新字段
    PatchEmbedded { id: String, field: String, value: Value },
    Invalidate { key: CacheKey },
    InvalidatePrefix { prefix: CacheKey },
    Remove { key: CacheKey },
}

impl CacheCommand {
    /// 受影响的键（跨条目命令返回 None）
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            CacheCommand::Set { key, .. }
            | CacheCommand::Replace { key, .. }
            | CacheCommand::Merge { key, .. }
            | CacheCommand::AppendUnique { key, .. }
            | CacheCommand::Prepend { key, .. }
            | CacheCommand::Increment { key, .. }
            | CacheCommand::PrependCounted { key, .. }
            | CacheCommand::Invalidate { key }
            | CacheCommand::Remove { key } => Some(key),
            CacheCommand::InvalidatePrefix { prefix } => Some(prefix),
            CacheCommand::PatchEmbedded { .. } => None,
        }
    }
}

/// 集合元素的标识
pub fn item_id(item: &Value) -> Option<&Value> {
    item.get("id")
}

fn contains_id(items: &[Value], id: &Value) -> bool {
    items.iter().any(|existing| item_id(existing) == Some(id))
}

/// 数组中是否已有同 `id` 的元素
pub(crate) fn has_item(target: Option<&Value>, item: &Value) -> bool {
    match (target, item_id(item)) {
        (Some(Value::Array(items)), Some(id)) => contains_id(items, id),
        _ => false,
    }
}

pub(crate) fn merge_fields(target: &mut Option<Value>, patch: &Map<String, Value>) -> bool {
    match target {
        Some(Value::Object(object)) => {
            for (field, value) in patch {
                object.insert(field.clone(), value.clone());
            }
            !patch.is_empty()
        }
        _ => false,
    }
}

pub(crate) fn append_unique(target: &mut Option<Value>, item: &Value) -> bool {
    let Some(Value::Array(items)) = target else {
        return false;
    };
    if let Some(id) = item_id(item) {
        if contains_id(items, id) {
            return false;
        }
    }
    items.push(item.clone());
    true
}

pub(crate) fn prepend_unique(target: &mut Option<Value>, item: &Value) -> bool {
    let Some(Value::Array(items)) = target else {
        return false;
    };
    if let Some(id) = item_id(item) {
        if contains_id(items, id) {
            return false;
        }
    }
    items.insert(0, item.clone());
    true
}

/// 按 `id` 更新或追加
pub(crate) fn upsert_item(target: &mut Option<Value>, item: &Value) -> bool {
    let Some(Value::Array(items)) = target else {
        return false;
    };
    match item_id(item) {
        Some(id) => match items.iter_mut().find(|existing| item_id(existing) == Some(id)) {
            Some(existing) => {
                if existing == item {
                    return false;
                }
                *existing = item.clone();
            }
            None => items.push(item.clone()),
        },
        None => items.push(item.clone()),
    }
    true
}

pub(crate) fn increment(target: &mut Option<Value>, by: i64) -> bool {
    let Some(current) = target.as_ref().and_then(Value::as_i64) else {
        return false;
    };
    *target = Some(Value::from(current.saturating_add(by)));
    true
}

/// 递归遍历，更新所有 `id` 匹配且含有该字段的对象
pub(crate) fn patch_embedded(value: &mut Value, id: &str, field: &str, new_value: &Value) -> bool {
    let mut changed = false;
    match value {
        Value::Object(object) => {
            let matches = object.get("id").and_then(Value::as_str) == Some(id);
            if matches {
                if let Some(slot) = object.get_mut(field) {
                    if slot != new_value {
                        *slot = new_value.clone();
                        changed = true;
                    }
                }
            }
            for child in object.values_mut() {
                changed |= patch_embedded(child, id, field, new_value);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                changed |= patch_embedded(child, id, field, new_value);
            }
        }
        _ => {}
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_unique_ignores_duplicate_id() {
        let mut target = Some(json!([{"id": "m1"}]));
        assert!(!append_unique(&mut target, &json!({"id": "m1", "content": "echo"})));
        assert!(append_unique(&mut target, &json!({"id": "m2"})));
        assert_eq!(target, Some(json!([{"id": "m1"}, {"id": "m2"}])));
    }

    #[test]
    fn test_has_item_matches_by_id() {
        let list = Some(json!([{"id": "n1"}]));
        assert!(has_item(list.as_ref(), &json!({"id": "n1", "title": "again"})));
        assert!(!has_item(list.as_ref(), &json!({"id": "n2"})));
        assert!(!has_item(None, &json!({"id": "n1"})));
    }

    #[test]
    fn test_append_to_absent_entry_is_noop() {
        let mut target = None;
        assert!(!append_unique(&mut target, &json!({"id": "m1"})));
        assert!(target.is_none());
    }

    #[test]
    fn test_patch_embedded_reaches_nested_records() {
        let mut value = json!({
            "id": "p1",
            "owner": {"id": "u1", "is_online": false},
            "members": [{"id": "u2", "is_online": false}, {"id": "u1", "is_online": false}]
        });
        assert!(patch_embedded(&mut value, "u1", "is_online", &json!(true)));
        assert_eq!(value["owner"]["is_online"], true);
        assert_eq!(value["members"][1]["is_online"], true);
        assert_eq!(value["members"][0]["is_online"], false);
    }

    #[test]
    fn test_patch_embedded_skips_objects_without_field() {
        // 任务本身的 id 恰好与用户相同，但没有在线字段
        let mut value = json!({"id": "u1", "title": "x"});
        assert!(!patch_embedded(&mut value, "u1", "is_online", &json!(true)));
        assert!(value.get("is_online").is_none());
    }

    #[test]
    fn test_increment_only_numbers() {
        let mut count = Some(json!(2));
        assert!(increment(&mut count, 1));
        assert_eq!(count, Some(json!(3)));

        let mut absent = None;
        assert!(!increment(&mut absent, 1));
    }
}
