//! JSON tree helpers shared by the local cache and the in-memory remote.
//!
//! Paths are `/`-separated; empty segments are ignored so `""` and `"/"`
//! both address the root.

use serde_json::{Map, Value};

/// Splits a path into its non-empty segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins two paths with a single separator.
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');

    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{child}"),
    }
}

/// Reads the value at `segments`, `None` when any step is missing.
pub fn value_at<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.get(segment.as_ref()))
}

/// Writes `value` at `segments`, creating intermediate objects.
///
/// A null value removes the key. Writing to the root replaces it.
pub fn set_at_path<S: AsRef<str>>(root: &mut Value, segments: &[S], value: Value) {
    let Some((leaf, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        let parent = parents
            .iter()
            .try_fold(&mut *root, |node, segment| node.get_mut(segment.as_ref()));
        if let Some(Value::Object(map)) = parent {
            map.remove(leaf.as_ref());
        }
        return;
    }

    let mut node = root;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.as_ref().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(leaf.as_ref().to_string(), value);
}

/// Applies a multi-location update: every key of `patch` is a path relative
/// to `root` whose value replaces what is there (null deletes).
///
/// Non-object patches replace `root` wholesale.
pub fn merge_patch(root: &mut Value, patch: &Value) {
    match patch {
        Value::Object(updates) => {
            for (path, value) in updates {
                set_at_path(root, &split_path(path), value.clone());
            }
        }
        other => *root = other.clone(),
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_and_join() {
        assert_eq!(split_path("/users//1/"), vec!["users", "1"]);
        assert!(split_path("").is_empty());
        assert_eq!(join_path("users/", "/1"), "users/1");
        assert_eq!(join_path("", "users"), "users");
        assert_eq!(join_path("users", ""), "users");
    }

    #[test]
    fn test_value_at() {
        let tree = json!({"users": {"1": {"name": "Ada"}}});
        assert_eq!(
            value_at(&tree, &["users", "1", "name"]),
            Some(&json!("Ada"))
        );
        assert_eq!(value_at(&tree, &["users", "2"]), None);
        assert_eq!(value_at::<&str>(&tree, &[]), Some(&tree));
    }

    #[test]
    fn test_set_creates_parents() {
        let mut tree = Value::Null;
        set_at_path(&mut tree, &["users", "1", "name"], json!("Ada"));
        assert_eq!(tree, json!({"users": {"1": {"name": "Ada"}}}));
    }

    #[test]
    fn test_set_null_removes() {
        let mut tree = json!({"a": {"b": 1, "c": 2}});
        set_at_path(&mut tree, &["a", "b"], Value::Null);
        assert_eq!(tree, json!({"a": {"c": 2}}));

        // missing parents are left alone
        set_at_path(&mut tree, &["x", "y"], Value::Null);
        assert_eq!(tree, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_merge_patch() {
        let mut tree = json!({"name": "Ada", "age": 36, "address": {"city": "London"}});
        merge_patch(
            &mut tree,
            &json!({"age": 37, "name": null, "address/city": "Paris"}),
        );
        assert_eq!(tree, json!({"age": 37, "address": {"city": "Paris"}}));

        merge_patch(&mut tree, &json!(5));
        assert_eq!(tree, json!(5));
    }
}
