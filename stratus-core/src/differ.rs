//! Differ - Compare desired state with current state
//!
//! Compares the attributes a resource declares with the attributes read back
//! from the cloud and classifies the result, so update handlers only touch
//! what actually changed.

use std::collections::HashMap;

use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::{ResourceSchema, TIMEOUTS_ATTRIBUTE};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences that can be applied in place
    Update {
        id: ResourceId,
        changed_attributes: Vec<String>,
    },
    /// Resource exists but a `force_new` attribute changed
    Replace {
        id: ResourceId,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: &ResourceSchema) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        Diff::NoChange(desired.id.clone())
    } else if schema.requires_replacement(&changed) {
        Diff::Replace {
            id: desired.id.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
///
/// Computed attributes and `timeouts` never count as changes. Sensitive
/// attributes the API does not echo back are only compared when present in
/// the current state. A declared attribute removed from the desired state is
/// a change unless the cloud reports it empty. The result is sorted.
pub fn changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: &ResourceSchema,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') || key == TIMEOUTS_ATTRIBUTE {
            continue;
        }

        let attr = schema.attributes.get(key);
        if attr.is_some_and(|a| a.is_computed_only()) {
            continue;
        }

        match current.get(key) {
            Some(current_value) if current_value == desired_value => {}
            None if attr.is_some_and(|a| a.sensitive) => {}
            _ => changed.push(key.clone()),
        }
    }

    for (key, current_value) in current {
        if desired.contains_key(key) || is_empty(current_value) {
            continue;
        }
        let removable = schema
            .attributes
            .get(key)
            .is_some_and(|a| !a.computed && !a.sensitive);
        if removable {
            changed.push(key.clone());
        }
    }

    changed.sort();
    changed
}

/// Empty strings and collections are how the APIs report an unset attribute
fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        Value::Int(_) | Value::Bool(_) => false,
    }
}

/// True if `key` is among the changed attributes
pub fn has_change(changed: &[String], key: &str) -> bool {
    changed.iter().any(|c| c == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};

    fn schema() -> ResourceSchema {
        ResourceSchema::new("vpc_subnet")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(
                AttributeSchema::new("cidr", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("password", AttributeType::String).sensitive())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(AttributeSchema::new("tags", AttributeType::Map(Box::new(AttributeType::String))))
            .attribute(AttributeSchema::new("gateway", AttributeType::String).force_new())
            .attribute(AttributeSchema::new("zone", AttributeType::String).optional_computed())
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("vpc_subnet", "test");
        let current = State::not_found(ResourceId::new("vpc_subnet", "test"));

        let result = diff(&desired, &current, &schema());
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_when_same() {
        let desired = Resource::new("vpc_subnet", "test")
            .with_attribute("name", "subnet-1")
            .with_attribute("password", "secret");

        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("subnet-1".to_string()));
        attrs.insert("status".to_string(), Value::String("ACTIVE".to_string()));
        let current = State::existing(ResourceId::new("vpc_subnet", "test"), attrs);

        let result = diff(&desired, &current, &schema());
        assert!(!result.is_change());
    }

    #[test]
    fn diff_update_when_different() {
        let desired = Resource::new("vpc_subnet", "test").with_attribute("name", "renamed");

        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("subnet-1".to_string()));
        let current = State::existing(ResourceId::new("vpc_subnet", "test"), attrs);

        match diff(&desired, &current, &schema()) {
            Diff::Update {
                changed_attributes, ..
            } => assert!(has_change(&changed_attributes, "name")),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_on_force_new() {
        let desired = Resource::new("vpc_subnet", "test")
            .with_attribute("name", "subnet-1")
            .with_attribute("cidr", "10.0.2.0/24");

        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("subnet-1".to_string()));
        attrs.insert("cidr".to_string(), Value::String("10.0.1.0/24".to_string()));
        let current = State::existing(ResourceId::new("vpc_subnet", "test"), attrs);

        match diff(&desired, &current, &schema()) {
            Diff::Replace {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["cidr".to_string()]),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn timeouts_are_not_a_change() {
        let mut timeouts = HashMap::new();
        timeouts.insert("create".to_string(), Value::String("1h".to_string()));
        let desired = Resource::new("vpc_subnet", "test")
            .with_attribute("name", "subnet-1")
            .with_attribute(TIMEOUTS_ATTRIBUTE, Value::Map(timeouts));

        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("subnet-1".to_string()));

        assert!(changed_attributes(&desired.attributes, &attrs, &schema()).is_empty());
    }

    #[test]
    fn removed_attributes_are_changes() {
        let desired = Resource::new("vpc_subnet", "test").with_attribute("name", "subnet-1");

        let mut tags = HashMap::new();
        tags.insert("env".to_string(), Value::String("prod".to_string()));
        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("subnet-1".to_string()));
        attrs.insert("description".to_string(), Value::String("old".to_string()));
        attrs.insert("tags".to_string(), Value::Map(tags));
        attrs.insert("status".to_string(), Value::String("ACTIVE".to_string()));
        attrs.insert("zone".to_string(), Value::String("az-1".to_string()));
        attrs.insert("password".to_string(), Value::String("secret".to_string()));
        let current = State::existing(ResourceId::new("vpc_subnet", "test"), attrs);

        match diff(&desired, &current, &schema()) {
            Diff::Update {
                changed_attributes, ..
            } => assert_eq!(
                changed_attributes,
                vec!["description".to_string(), "tags".to_string()]
            ),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn empty_remote_values_need_no_removal() {
        let desired = Resource::new("vpc_subnet", "test").with_attribute("name", "subnet-1");

        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("subnet-1".to_string()));
        attrs.insert("description".to_string(), Value::String(String::new()));
        attrs.insert("tags".to_string(), Value::Map(HashMap::new()));

        assert!(changed_attributes(&desired.attributes, &attrs, &schema()).is_empty());
    }

    #[test]
    fn removing_force_new_attribute_replaces() {
        let desired = Resource::new("vpc_subnet", "test").with_attribute("name", "subnet-1");

        let mut attrs = HashMap::new();
        attrs.insert("name".to_string(), Value::String("subnet-1".to_string()));
        attrs.insert("gateway".to_string(), Value::String("10.0.1.1".to_string()));
        let current = State::existing(ResourceId::new("vpc_subnet", "test"), attrs);

        assert!(matches!(
            diff(&desired, &current, &schema()),
            Diff::Replace { .. }
        ));
    }
}
