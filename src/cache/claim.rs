//! 乐观写入的"所有权"
//! 记录一次待确认写入改动了哪些字段或集合元素，便于在权威写入之后重新覆盖，
//! 或在回滚时只撤销本地那一部分

use serde_json::{Map, Value};

use super::command::{item_id, upsert_item};

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum Claim {
    #[default]
    Nothing,
    /// 对象字段 → 乐观值
    Fields(Map<String, Value>),
    /// 集合元素（按 `id`）
    Items {
        upserted: Vec<Value>,
        removed: Vec<Value>,
    },
    /// 无法细分时占有整个值
    Whole(Option<Value>),
}

impl Claim {
    /// 计算从基线到乐观值的差异
    pub(crate) fn diff(before: &Option<Value>, after: &Option<Value>) -> Self {
        if before == after {
            return Claim::Nothing;
        }

        match (before, after) {
            (Some(Value::Object(old)), Some(Value::Object(new))) => {
                let fields: Map<String, Value> = new
                    .iter()
                    .filter(|(field, value)| old.get(*field) != Some(*value))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect();
                // 删除字段无法按字段表达
                if fields.is_empty() || old.keys().any(|k| !new.contains_key(k)) {
                    Claim::Whole(after.clone())
                } else {
                    Claim::Fields(fields)
                }
            }
            (Some(Value::Array(old)), Some(Value::Array(new)))
                if old.iter().chain(new.iter()).all(|item| item_id(item).is_some()) =>
            {
                let upserted = new
                    .iter()
                    .filter(|item| !old.contains(item))
                    .cloned()
                    .collect();
                let removed = old
                    .iter()
                    .filter_map(item_id)
                    .filter(|id| !new.iter().any(|item| item_id(item) == Some(*id)))
                    .cloned()
                    .collect();
                Claim::Items { upserted, removed }
            }
            _ => Claim::Whole(after.clone()),
        }
    }

    /// 把本地乐观改动重新覆盖到目标值上
    pub(crate) fn overlay(&self, target: &mut Option<Value>) {
        match self {
            Claim::Nothing => {}
            Claim::Fields(fields) => {
                if let Some(Value::Object(object)) = target {
                    for (field, value) in fields {
                        object.insert(field.clone(), value.clone());
                    }
                }
            }
            Claim::Items { upserted, removed } => {
                if let Some(Value::Array(items)) = target {
                    items.retain(|item| item_id(item).map_or(true, |id| !removed.contains(id)));
                }
                for item in upserted {
                    upsert_item(target, item);
                }
            }
            Claim::Whole(value) => *target = value.clone(),
        }
    }

    /// 从目标值中撤销本地改动，被占有的部分恢复为基线
    pub(crate) fn revert(&self, target: &mut Option<Value>, baseline: &Option<Value>) {
        match self {
            Claim::Nothing => {}
            Claim::Fields(fields) => {
                let Some(Value::Object(object)) = target else {
                    return;
                };
                let base = match baseline {
                    Some(Value::Object(base)) => Some(base),
                    _ => None,
                };
                for field in fields.keys() {
                    match base.and_then(|b| b.get(field)) {
                        Some(original) => {
                            object.insert(field.clone(), original.clone());
                        }
                        None => {
                            object.remove(field);
                        }
                    }
                }
            }
            Claim::Items { upserted, removed } => {
                let Some(Value::Array(items)) = target else {
                    return;
                };
                let base: &[Value] = match baseline {
                    Some(Value::Array(base)) => base,
                    _ => &[],
                };
                let touched: Vec<&Value> =
                    upserted.iter().filter_map(item_id).chain(removed.iter()).collect();

                items.retain(|item| item_id(item).map_or(true, |id| !touched.contains(&id)));
                for (index, original) in base.iter().enumerate() {
                    if item_id(original).is_some_and(|id| touched.contains(&id)) {
                        let at = index.min(items.len());
                        items.insert(at, original.clone());
                    }
                }
            }
            Claim::Whole(_) => *target = baseline.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_claim_overlay_and_revert() {
        let before = Some(json!({"id": "t1", "status": "todo", "title": "A"}));
        let after = Some(json!({"id": "t1", "status": "done", "title": "A"}));
        let claim = Claim::diff(&before, &after);
        assert_eq!(claim, Claim::Fields(json!({"status": "done"}).as_object().unwrap().clone()));

        // 服务端改了标题和状态，本地状态仍然保留
        let mut server = Some(json!({"id": "t1", "status": "review", "title": "B"}));
        claim.overlay(&mut server);
        assert_eq!(server, Some(json!({"id": "t1", "status": "done", "title": "B"})));

        claim.revert(&mut server, &before);
        assert_eq!(server, Some(json!({"id": "t1", "status": "todo", "title": "B"})));
    }

    #[test]
    fn test_item_claim_for_appended_message() {
        let before = Some(json!([{"id": "m1"}]));
        let after = Some(json!([{"id": "m1"}, {"id": "tmp-1", "content": "hi"}]));
        let claim = Claim::diff(&before, &after);

        let mut visible = Some(json!([{"id": "m1"}, {"id": "m2"}]));
        claim.overlay(&mut visible);
        assert_eq!(
            visible,
            Some(json!([{"id": "m1"}, {"id": "m2"}, {"id": "tmp-1", "content": "hi"}]))
        );

        claim.revert(&mut visible, &before);
        assert_eq!(visible, Some(json!([{"id": "m1"}, {"id": "m2"}])));
    }

    #[test]
    fn test_item_claim_for_removed_task() {
        let before = Some(json!([{"id": "t1"}, {"id": "t2"}]));
        let after = Some(json!([{"id": "t2"}]));
        let claim = Claim::diff(&before, &after);

        let mut visible = after.clone();
        claim.revert(&mut visible, &before);
        assert_eq!(visible, before);
    }

    #[test]
    fn test_scalar_claim_is_whole() {
        let claim = Claim::diff(&Some(json!(3)), &Some(json!(0)));
        let mut visible = Some(json!(4));
        claim.overlay(&mut visible);
        assert_eq!(visible, Some(json!(0)));
    }
}
