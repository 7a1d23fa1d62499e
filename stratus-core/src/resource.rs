//! Resource - Representing resources and their state

use std::collections::HashMap;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    /// Resource type (e.g., "vpc", "cce_cluster")
    pub resource_type: String,
    /// Resource name (identifier assigned by the engine)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Build a list of strings
    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(|s| Value::String(s.into())).collect())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Typed lookups over an attribute map
pub trait Attributes {
    fn attributes(&self) -> &HashMap<String, Value>;

    fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes().get(key).and_then(Value::as_str)
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.attributes().get(key).and_then(Value::as_int)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.attributes().get(key).and_then(Value::as_bool)
    }

    fn get_list(&self, key: &str) -> Option<&[Value]> {
        self.attributes().get(key).and_then(Value::as_list)
    }

    fn get_map(&self, key: &str) -> Option<&HashMap<String, Value>> {
        self.attributes().get(key).and_then(Value::as_map)
    }

    /// String items of a list attribute; non-string items are skipped
    fn get_string_list(&self, key: &str) -> Vec<String> {
        self.get_list(key)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Attributes for HashMap<String, Value> {
    fn attributes(&self) -> &HashMap<String, Value> {
        self
    }
}

/// Desired state declared by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub attributes: HashMap<String, Value>,
    /// If true, this is a data source (read-only) that won't be modified
    pub read_only: bool,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            attributes: HashMap::new(),
            read_only: false,
        }
    }

    /// A data source query with the given filter attributes
    pub fn data_source(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(resource_type, name).with_read_only(true)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Returns true if this resource is a data source (read-only)
    pub fn is_data_source(&self) -> bool {
        self.read_only
    }
}

impl Attributes for Resource {
    fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

/// Current state fetched from the cloud
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub id: ResourceId,
    /// Cloud-side identifier (UUID, composite id, keypair name, ...)
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    /// Whether this state exists
    pub exists: bool,
}

impl State {
    pub fn not_found(id: ResourceId) -> Self {
        Self {
            id,
            identifier: None,
            attributes: HashMap::new(),
            exists: false,
        }
    }

    pub fn existing(id: ResourceId, attributes: HashMap<String, Value>) -> Self {
        Self {
            id,
            identifier: None,
            attributes,
            exists: true,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

impl Attributes for State {
    fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_attribute_lookups() {
        let resource = Resource::new("vpc", "main")
            .with_attribute("name", "main-vpc")
            .with_attribute("size", 40i64)
            .with_attribute("enabled", true)
            .with_attribute("zones", Value::string_list(["az1", "az2"]));

        assert_eq!(resource.get_str("name"), Some("main-vpc"));
        assert_eq!(resource.get_int("size"), Some(40));
        assert_eq!(resource.get_bool("enabled"), Some(true));
        assert_eq!(resource.get_string_list("zones"), vec!["az1", "az2"]);
        assert_eq!(resource.get_str("size"), None);
        assert!(resource.get_string_list("missing").is_empty());
    }

    #[test]
    fn data_source_is_read_only() {
        let query = Resource::data_source("vpc", "lookup");
        assert!(query.is_data_source());
        assert!(!Resource::new("vpc", "main").is_data_source());
    }

    #[test]
    fn resource_id_display() {
        assert_eq!(ResourceId::new("cce_node", "worker").to_string(), "cce_node.worker");
    }
}
