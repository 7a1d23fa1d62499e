//! Helpers for mapping between attributes and API JSON bodies

use std::collections::HashMap;

use serde_json::{Map as JsonMap, Value as JsonValue, json};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Attributes, Resource, ResourceId, Value};

/// Convert a JSON value to an attribute value; `null` has no counterpart
///
/// Numbers without an integer form (fractions, values beyond `i64`) are kept
/// as their decimal text.
pub fn json_to_value(value: &JsonValue) -> Option<Value> {
    match value {
        JsonValue::String(s) => Some(Value::String(s.clone())),
        JsonValue::Bool(b) => Some(Value::Bool(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Some(Value::Int(i)),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                    Some(Value::Int(f as i64))
                }
                _ => Some(Value::String(n.to_string())),
            },
        },
        JsonValue::Array(arr) => Some(Value::List(arr.iter().filter_map(json_to_value).collect())),
        JsonValue::Object(obj) => Some(Value::Map(
            obj.iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect(),
        )),
        JsonValue::Null => None,
    }
}

/// Convert an attribute value to JSON
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::String(s) => json!(s),
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::List(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

/// Build a `[{key, value}]` tag array, sorted by key
pub fn build_tags(user_tags: Option<&Value>) -> Vec<JsonValue> {
    let mut tags = Vec::new();
    if let Some(Value::Map(user_tags)) = user_tags {
        let mut keys: Vec<&String> = user_tags.keys().collect();
        keys.sort();
        for key in keys {
            if let Some(Value::String(v)) = user_tags.get(key) {
                tags.push(json!({"key": key, "value": v}));
            }
        }
    }
    tags
}

/// Parse tags from either `[{key, value}]` or a `{key: value}` object
pub fn parse_tags(tags: &JsonValue) -> HashMap<String, Value> {
    let mut tags_map = HashMap::new();
    match tags {
        JsonValue::Array(items) => {
            for tag in items {
                if let (Some(key), Some(value)) = (
                    tag.get("key").and_then(|v| v.as_str()),
                    tag.get("value").and_then(|v| v.as_str()),
                ) {
                    tags_map.insert(key.to_string(), Value::String(value.to_string()));
                }
            }
        }
        JsonValue::Object(obj) => {
            for (key, value) in obj {
                if let Some(v) = value.as_str() {
                    tags_map.insert(key.clone(), Value::String(v.to_string()));
                }
            }
        }
        _ => {}
    }
    tags_map
}

/// Copy the present attributes into a JSON object, renaming as listed
///
/// `fields` pairs an attribute name with its API property name.
pub fn copy_attributes(attrs: &HashMap<String, Value>, fields: &[(&str, &str)]) -> JsonMap<String, JsonValue> {
    let mut body = JsonMap::new();
    for (attr, property) in fields {
        if let Some(value) = attrs.get(*attr) {
            body.insert(property.to_string(), value_to_json(value));
        }
    }
    body
}

/// Required string attribute, or a validation error naming it
pub fn required_str<'a>(resource: &'a Resource, key: &str) -> ProviderResult<&'a str> {
    resource.get_str(key).ok_or_else(|| {
        ProviderError::validation(format!("{} is required", key)).for_resource(resource.id.clone())
    })
}

/// Required integer attribute, or a validation error naming it
pub fn required_int(resource: &Resource, key: &str) -> ProviderResult<i64> {
    resource.get_int(key).ok_or_else(|| {
        ProviderError::validation(format!("{} is required", key)).for_resource(resource.id.clone())
    })
}

/// String at a JSON pointer, or an API error describing the missing field
pub fn json_str<'a>(json: &'a JsonValue, pointer: &str, id: &ResourceId) -> ProviderResult<&'a str> {
    json.pointer(pointer)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| {
            ProviderError::new(format!("response is missing '{}'", pointer)).for_resource(id.clone())
        })
}

/// Split a composite import id such as `{cluster_id}/{node_id}`
pub fn split_id<'a, const N: usize>(
    import_id: &'a str,
    format: &str,
) -> ProviderResult<[&'a str; N]> {
    let parts: Vec<&str> = import_id.split('/').collect();
    if parts.len() != N || parts.iter().any(|p| p.is_empty()) {
        return Err(ProviderError::validation(format!(
            "invalid id '{}', expected {}",
            import_id, format
        )));
    }
    let mut out = [""; N];
    out.copy_from_slice(&parts);
    Ok(out)
}

/// Builds resource attributes from an API object
pub struct Flattener<'a> {
    json: &'a JsonValue,
    attributes: HashMap<String, Value>,
}

impl<'a> Flattener<'a> {
    pub fn new(json: &'a JsonValue) -> Self {
        Self {
            json,
            attributes: HashMap::new(),
        }
    }

    /// Copy a top-level property into the attribute of the same name
    pub fn field(self, name: &str) -> Self {
        self.field_as(name, name)
    }

    /// Copy a top-level property into a differently named attribute
    pub fn field_as(self, attr: &str, property: &str) -> Self {
        self.pointer(attr, &format!("/{}", property))
    }

    /// Copy the value at a JSON pointer
    pub fn pointer(mut self, attr: &str, pointer: &str) -> Self {
        if let Some(value) = self.json.pointer(pointer).and_then(json_to_value) {
            self.attributes.insert(attr.to_string(), value);
        }
        self
    }

    pub fn tags(mut self, property: &str) -> Self {
        if let Some(tags) = self.json.get(property) {
            self.attributes
                .insert("tags".to_string(), Value::Map(parse_tags(tags)));
        }
        self
    }

    pub fn insert(mut self, attr: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(attr.to_string(), value.into());
        self
    }

    pub fn build(self) -> HashMap<String, Value> {
        self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_conversion_drops_nulls() {
        let value = json_to_value(&json!({"name": "vpc-1", "size": 3, "gone": null, "ok": true}))
            .unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.get("name"), Some(&Value::from("vpc-1")));
        assert_eq!(map.get("size"), Some(&Value::Int(3)));
        assert_eq!(map.get("ok"), Some(&Value::Bool(true)));
        assert!(!map.contains_key("gone"));

        assert_eq!(
            value_to_json(&Value::string_list(["a", "b"])),
            json!(["a", "b"])
        );
    }

    #[test]
    fn json_conversion_keeps_fractional_numbers() {
        assert_eq!(json_to_value(&json!(2.5)), Some(Value::from("2.5")));
        assert_eq!(json_to_value(&json!(30.0)), Some(Value::Int(30)));
        assert_eq!(
            json_to_value(&json!(u64::MAX)),
            Some(Value::from("18446744073709551615"))
        );
    }

    #[test]
    fn tags_round_trip_through_both_shapes() {
        let mut user = HashMap::new();
        user.insert("env".to_string(), Value::from("prod"));
        user.insert("app".to_string(), Value::from("web"));
        let tags = build_tags(Some(&Value::Map(user.clone())));
        assert_eq!(
            tags,
            vec![
                json!({"key": "app", "value": "web"}),
                json!({"key": "env", "value": "prod"})
            ]
        );

        assert_eq!(parse_tags(&JsonValue::Array(tags)), user);
        assert_eq!(parse_tags(&json!({"env": "prod", "app": "web"})), user);
        assert!(build_tags(None).is_empty());
    }

    #[test]
    fn split_id_checks_shape() {
        let [cluster, node] = split_id::<2>("c-1/n-1", "{cluster_id}/{node_id}").unwrap();
        assert_eq!((cluster, node), ("c-1", "n-1"));

        let err = split_id::<2>("c-1", "{cluster_id}/{node_id}").unwrap_err();
        assert!(err.message.contains("expected {cluster_id}/{node_id}"));
        assert!(split_id::<2>("c-1/", "{a}/{b}").is_err());
    }

    #[test]
    fn flattener_collects_attributes() {
        let body = json!({
            "id": "v-1",
            "name": "main",
            "spec": {"flavor": "s1"},
            "tags": [{"key": "k", "value": "v"}]
        });
        let attrs = Flattener::new(&body)
            .field("id")
            .field("name")
            .pointer("flavor", "/spec/flavor")
            .field("missing")
            .tags("tags")
            .build();

        assert_eq!(attrs.get("flavor"), Some(&Value::from("s1")));
        assert!(!attrs.contains_key("missing"));
        assert!(attrs.get_map("tags").is_some_and(|t| t.contains_key("k")));
    }

    #[test]
    fn required_attributes_name_the_key() {
        let resource = Resource::new("vpc", "main").with_attribute("name", "x");
        assert_eq!(required_str(&resource, "name").unwrap(), "x");
        let err = required_str(&resource, "cidr").unwrap_err();
        assert_eq!(err.to_string(), "[vpc.main] cidr is required");
        assert!(required_int(&resource, "size").is_err());

        let id = ResourceId::new("vpc", "main");
        let body = json!({"vpc": {"id": "v-1"}});
        assert_eq!(json_str(&body, "/vpc/id", &id).unwrap(), "v-1");
        assert!(json_str(&body, "/vpc/name", &id).is_err());
    }
}
