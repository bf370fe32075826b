//! Navigation of a JSON tree by slash-separated paths.

use serde_json::{Map, Value};

use crate::{Result, StoreError};

/// Split `/a/b` into `["a", "b"]`. The root is `/` or the empty string.
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Canonical form used as a lock key: `/a/b`.
pub(crate) fn normalize(path: &str) -> String {
    format!("/{}", segments(path).join("/"))
}

pub(crate) fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .into_iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

pub(crate) fn assign(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let segments = segments(path);
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for segment in parents {
        let map = node
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    node.as_object_mut()
        .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?
        .insert(last.to_string(), value);
    Ok(())
}

pub(crate) fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let segments = segments(path);
    let (last, parents) = segments.split_last()?;

    let mut node = root;
    for segment in parents {
        node = node.as_object_mut()?.get_mut(*segment)?;
    }
    node.as_object_mut()?.remove(*last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_segments_and_normalize() {
        assert_eq!(segments("/keys"), vec!["keys"]);
        assert_eq!(segments("//courses/ABCD/"), vec!["courses", "ABCD"]);
        assert!(segments("/").is_empty());
        assert_eq!(normalize("keys/"), "/keys");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn test_assign_creates_parents() {
        let mut root = json!({});
        assign(&mut root, "/courses/ABCD-EFGH-IJKL", json!({"plays": 0})).unwrap();
        assert_eq!(lookup(&root, "/courses/ABCD-EFGH-IJKL/plays"), Some(&json!(0)));
    }

    #[test]
    fn test_assign_through_scalar_fails() {
        let mut root = json!({"keys": 5});
        assert!(matches!(
            assign(&mut root, "/keys/123", json!("k")),
            Err(StoreError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_remove() {
        let mut root = json!({"locked": {"1": true, "2": true}});
        assert_eq!(remove(&mut root, "/locked/1"), Some(json!(true)));
        assert_eq!(remove(&mut root, "/locked/1"), None);
        assert_eq!(root, json!({"locked": {"2": true}}));
    }
}
