//! Tag management for services exposing the `{object}/tags/action` API (VPC, KMS)

use std::collections::HashMap;

use serde_json::{Value as JsonValue, json};
use stratus_core::resource::Value;
use tracing::debug;

use crate::client::{ClientResult, ServiceClient};
use crate::utils::{build_tags, parse_tags};

/// Read the tags of the object at `base`
pub async fn read_tags(service: &ServiceClient, base: &str) -> ClientResult<HashMap<String, Value>> {
    let body = service.get(&format!("{}/tags", base)).await?;
    Ok(body.get("tags").map(parse_tags).unwrap_or_default())
}

/// Bring the tags of the object at `base` from `old` to `new`
pub async fn update_tags(
    service: &ServiceClient,
    base: &str,
    old: Option<&Value>,
    new: Option<&Value>,
) -> ClientResult<()> {
    let (removed, added) = tag_changes(old, new);
    let path = format!("{}/tags/action", base);

    if !removed.is_empty() {
        debug!(count = removed.len(), "removing tags");
        service
            .post(&path, &json!({"action": "delete", "tags": removed}))
            .await?;
    }
    if !added.is_empty() {
        debug!(count = added.len(), "adding tags");
        service
            .post(&path, &json!({"action": "create", "tags": added}))
            .await?;
    }
    Ok(())
}

/// Tags to delete (removed or changed) and tags to create (new or changed)
fn tag_changes(old: Option<&Value>, new: Option<&Value>) -> (Vec<JsonValue>, Vec<JsonValue>) {
    let empty = HashMap::new();
    let old_map = old.and_then(Value::as_map).unwrap_or(&empty);
    let new_map = new.and_then(Value::as_map).unwrap_or(&empty);

    let removed: HashMap<String, Value> = old_map
        .iter()
        .filter(|(k, v)| new_map.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let added: HashMap<String, Value> = new_map
        .iter()
        .filter(|(k, v)| old_map.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    (
        build_tags(Some(&Value::Map(removed))),
        build_tags(Some(&Value::Map(added))),
    )
}
