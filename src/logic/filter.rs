//! Exact-match filtering and ordering over in-memory entity lists. This
//! is the query engine behind the file-backed store; the relational
//! store pushes the same semantics down to SQL.

use crate::model::Entity;
use serde_json::Value;
use std::cmp::Ordering;

/// Exact-match comparison with one forgiveness rule: trailing whitespace
/// on either string side is ignored (fixed-width storage pads values).
fn value_matches(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a.trim_end() == b.trim_end(),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => left == right,
    }
}

/// True when every filter field matches the entity exactly. An empty
/// filter matches everything.
pub fn matches(entity: &Entity, filter: &Entity) -> bool {
    filter
        .iter()
        .all(|(field, expected)| entity.get(field).is_some_and(|v| value_matches(v, expected)))
}

/// All entities matching the filter, in list order.
pub fn find<'a>(list: &'a [Entity], filter: &Entity) -> Vec<&'a Entity> {
    list.iter().filter(|entity| matches(entity, filter)).collect()
}

/// Position of the first entity matching the filter.
pub fn find_index(list: &[Entity], filter: &Entity) -> Option<usize> {
    list.iter().position(|entity| matches(entity, filter))
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => Ordering::Equal,
        },
    }
}

/// Sort in place by a list of `"field"` / `"field asc"` / `"field desc"`
/// tokens, applied left to right with earlier tokens taking precedence.
pub fn sort_by_order(list: &mut [Entity], order_by: &[String]) {
    if order_by.is_empty() {
        return;
    }

    let keys: Vec<(String, bool)> = order_by
        .iter()
        .map(|token| {
            let mut parts = token.split_whitespace();
            let field = parts.next().unwrap_or("").to_string();
            let descending = parts.next() == Some("desc");
            (field, descending)
        })
        .collect();

    list.sort_by(|a, b| {
        for (field, descending) in &keys {
            let ordering = compare_values(a.get(field), b.get(field));
            let ordering = if *descending { ordering.reverse() } else { ordering };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entities(raw: Value) -> Vec<Entity> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn exact_match_ignores_trailing_whitespace_on_strings() {
        let list = entities(json!([
            {"name": "ada  ", "n": 1},
            {"name": "bob", "n": 2}
        ]));

        let filter: Entity = serde_json::from_value(json!({"name": "ada"})).unwrap();
        let found = find(&list, &filter);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("n"), Some(&json!(1)));
    }

    #[test]
    fn numeric_match_compares_across_representations() {
        let list = entities(json!([{"n": 2.0}]));
        let filter: Entity = serde_json::from_value(json!({"n": 2})).unwrap();
        assert_eq!(find_index(&list, &filter), Some(0));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let list = entities(json!([{"a": 1}, {"a": 2}]));
        assert_eq!(find(&list, &Entity::new()).len(), 2);
    }

    #[test]
    fn sort_honors_direction_and_precedence() {
        let mut list = entities(json!([
            {"group": 1, "n": 1},
            {"group": 2, "n": 5},
            {"group": 1, "n": 3}
        ]));

        sort_by_order(
            &mut list,
            &["group asc".to_string(), "n desc".to_string()],
        );

        let ns: Vec<_> = list.iter().map(|e| e.get("n").cloned().unwrap()).collect();
        assert_eq!(ns, vec![json!(3), json!(1), json!(5)]);
    }
}
