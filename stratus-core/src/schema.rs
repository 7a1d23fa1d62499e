//! Schema - Attribute schemas for resources and data sources
//!
//! Every resource type declares its attributes up front so declared values
//! can be checked, defaulted and classified (computed, force-new, sensitive)
//! before a request reaches the cloud.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::duration::parse_duration;
use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    String,
    Int,
    Bool,
    /// One of a fixed set of strings
    Enum(Vec<String>),
    /// Integer within an inclusive range
    IntRange { min: i64, max: i64 },
    /// String whose character count lies within an inclusive range
    StringLength { min: usize, max: usize },
    /// Any value accepted by `validate`
    Custom {
        name: String,
        validate: fn(&Value) -> Result<(), String>,
    },
    List(Box<AttributeType>),
    Map(Box<AttributeType>),
}

impl AttributeType {
    /// Check `value` against this type
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        let invalid = |message: String| Err(TypeError::ValidationFailed { message });
        match (self, value) {
            (AttributeType::String, Value::String(_))
            | (AttributeType::Int, Value::Int(_))
            | (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(allowed), Value::String(s)) => {
                if allowed.contains(s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: allowed.clone(),
                    })
                }
            }

            (AttributeType::IntRange { min, max }, Value::Int(n)) => {
                if (*min..=*max).contains(n) {
                    Ok(())
                } else {
                    invalid(format!("{} is outside {}..={}", n, min, max))
                }
            }

            (AttributeType::StringLength { min, max }, Value::String(s)) => {
                let len = s.chars().count();
                if (*min..=*max).contains(&len) {
                    Ok(())
                } else {
                    invalid(format!(
                        "'{}' has {} characters, expected {} to {}",
                        s, len, min, max
                    ))
                }
            }

            (AttributeType::Custom { validate, .. }, v) => validate(v).or_else(invalid),

            (AttributeType::List(item_type), Value::List(items)) => items
                .iter()
                .enumerate()
                .try_for_each(|(index, item)| {
                    item_type.validate(item).map_err(|e| TypeError::ListItemError {
                        index,
                        inner: Box::new(e),
                    })
                }),

            (AttributeType::Map(value_type), Value::Map(entries)) => {
                entries.iter().try_for_each(|(key, v)| {
                    value_type.validate(v).map_err(|e| TypeError::MapValueError {
                        key: key.clone(),
                        inner: Box::new(e),
                    })
                })
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.to_string(),
                got: value.kind().to_string(),
            }),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeType::String => f.write_str("string"),
            AttributeType::Int => f.write_str("int"),
            AttributeType::Bool => f.write_str("bool"),
            AttributeType::Enum(allowed) => write!(f, "one of {}", allowed.join("|")),
            AttributeType::IntRange { min, max } => write!(f, "int {}..={}", min, max),
            AttributeType::StringLength { min, max } => write!(f, "string of {}..={} chars", min, max),
            AttributeType::Custom { name, .. } => f.write_str(name),
            AttributeType::List(inner) => write!(f, "list({})", inner),
            AttributeType::Map(inner) => write!(f, "map({})", inner),
        }
    }
}

/// Why a declared value was rejected
#[derive(Debug, Clone, thiserror::Error)]
pub enum TypeError {
    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("'{value}' is not one of {}", expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("{message}")]
    ValidationFailed { message: String },

    #[error("{name} is required")]
    MissingRequired { name: String },

    #[error("{name} is computed by the cloud and cannot be set")]
    ComputedOnly { name: String },

    #[error("{name}: {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },

    #[error("item {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },

    #[error("invalid timeouts: {message}")]
    InvalidTimeouts { message: String },
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// Set by the cloud; if `optional` is also true the user may supply it
    pub computed: bool,
    pub optional: bool,
    /// Changing this attribute requires replacing the resource
    pub force_new: bool,
    /// Never logged and never read back from the API
    pub sensitive: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    /// API-side property name (e.g., "availability_zone" -> "az")
    pub provider_name: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            computed: false,
            optional: true,
            force_new: false,
            sensitive: false,
            default: None,
            description: None,
            provider_name: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self.optional = false;
        self
    }

    /// Read-only attribute filled from the API response
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self.optional = false;
        self
    }

    /// Attribute the user may set, filled by the API when omitted
    pub fn optional_computed(mut self) -> Self {
        self.computed = true;
        self.optional = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider_name = Some(name.into());
        self
    }

    /// Only the cloud can set this attribute
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional
    }
}

/// Per-operation time limits for waiting on asynchronous cloud operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(10 * 60))
    }
}

impl Timeouts {
    pub fn uniform(d: Duration) -> Self {
        Self {
            create: d,
            update: d,
            delete: d,
        }
    }

    pub fn new(create: Duration, update: Duration, delete: Duration) -> Self {
        Self {
            create,
            update,
            delete,
        }
    }

    /// Apply user overrides from a `timeouts = { create = "30m" }` attribute
    pub fn with_overrides(mut self, overrides: Option<&Value>) -> Result<Self, TypeError> {
        let Some(value) = overrides else {
            return Ok(self);
        };
        let Value::Map(map) = value else {
            return Err(TypeError::InvalidTimeouts {
                message: "expected a map of operation to duration".to_string(),
            });
        };
        for (op, v) in map {
            let Value::String(s) = v else {
                return Err(TypeError::InvalidTimeouts {
                    message: format!("'{}' must be a duration string", op),
                });
            };
            let d = parse_duration(s).map_err(|e| TypeError::InvalidTimeouts {
                message: format!("'{}': {}", op, e),
            })?;
            match op.as_str() {
                "create" => self.create = d,
                "update" => self.update = d,
                "delete" => self.delete = d,
                other => {
                    return Err(TypeError::InvalidTimeouts {
                        message: format!("unknown operation '{}'", other),
                    });
                }
            }
        }
        Ok(self)
    }
}

/// Attribute name reserved for per-resource timeout overrides
pub const TIMEOUTS_ATTRIBUTE: &str = "timeouts";

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    pub description: Option<String>,
    pub timeouts: Timeouts,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            description: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Effective timeouts for a declared resource, honouring its overrides
    pub fn timeouts_for(&self, attributes: &HashMap<String, Value>) -> Result<Timeouts, TypeError> {
        self.timeouts
            .with_overrides(attributes.get(TIMEOUTS_ATTRIBUTE))
    }

    /// True if any of the changed attributes is marked `force_new`
    pub fn requires_replacement(&self, changed: &[String]) -> bool {
        changed
            .iter()
            .any(|name| self.attributes.get(name).is_some_and(|a| a.force_new))
    }

    /// Names of `force_new` attributes among the changed ones
    pub fn replacement_attributes<'a>(&self, changed: &'a [String]) -> Vec<&'a str> {
        changed
            .iter()
            .filter(|name| self.attributes.get(*name).is_some_and(|a| a.force_new))
            .map(String::as_str)
            .collect()
    }

    /// Fill in declared defaults for attributes the user omitted
    pub fn apply_defaults(&self, attributes: &mut HashMap<String, Value>) {
        for (name, schema) in &self.attributes {
            if let Some(default) = &schema.default
                && !attributes.contains_key(name)
            {
                attributes.insert(name.clone(), default.clone());
            }
        }
    }

    /// Check declared attributes, collecting every problem found
    ///
    /// Errors are sorted by attribute name. Attributes the schema does not
    /// declare pass through unchecked.
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut missing: Vec<&String> = self
            .attributes
            .iter()
            .filter(|(name, s)| s.required && s.default.is_none() && !attributes.contains_key(*name))
            .map(|(name, _)| name)
            .collect();
        missing.sort();
        let mut errors: Vec<TypeError> = missing
            .into_iter()
            .map(|name| TypeError::MissingRequired { name: name.clone() })
            .collect();

        let mut declared: Vec<(&String, &Value)> = attributes.iter().collect();
        declared.sort_by_key(|(name, _)| *name);
        for (name, value) in declared {
            if name == TIMEOUTS_ATTRIBUTE {
                errors.extend(self.timeouts.with_overrides(Some(value)).err());
                continue;
            }
            let Some(schema) = self.attributes.get(name) else {
                continue;
            };
            if schema.is_computed_only() {
                errors.push(TypeError::ComputedOnly { name: name.clone() });
            } else if let Err(e) = schema.attr_type.validate(value) {
                errors.push(TypeError::AttributeError {
                    name: name.clone(),
                    inner: Box::new(e),
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Constructors for the attribute types resources share
pub mod types {
    use super::*;

    /// IPv4 network in CIDR notation, e.g. `10.0.0.0/16`
    pub fn cidr() -> AttributeType {
        AttributeType::Custom {
            name: "cidr".to_string(),
            validate: |value| match value {
                Value::String(s) => validate_cidr(s),
                other => Err(format!("expected a CIDR string, got {}", other.kind())),
            },
        }
    }

    /// Dotted-quad IPv4 address, e.g. `192.168.0.1`
    pub fn ipv4() -> AttributeType {
        AttributeType::Custom {
            name: "ipv4".to_string(),
            validate: |value| match value {
                Value::String(s) => validate_ipv4(s),
                other => Err(format!("expected an IPv4 string, got {}", other.kind())),
            },
        }
    }

    pub fn int_range(min: i64, max: i64) -> AttributeType {
        AttributeType::IntRange { min, max }
    }

    pub fn string_length(min: usize, max: usize) -> AttributeType {
        AttributeType::StringLength { min, max }
    }

    pub fn string_enum(values: &[&str]) -> AttributeType {
        AttributeType::Enum(values.iter().map(|s| s.to_string()).collect())
    }

    pub fn string_list() -> AttributeType {
        AttributeType::List(Box::new(AttributeType::String))
    }

    pub fn string_map() -> AttributeType {
        AttributeType::Map(Box::new(AttributeType::String))
    }
}

pub fn validate_ipv4(ip: &str) -> Result<(), String> {
    ip.parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| format!("'{}' is not an IPv4 address", ip))
}

pub fn validate_cidr(cidr: &str) -> Result<(), String> {
    let (ip, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("'{}' is not in address/prefix form", cidr))?;
    validate_ipv4(ip)?;
    match prefix.parse::<u8>() {
        Ok(bits) if bits <= 32 => Ok(()),
        _ => Err(format!("'{}' is not a prefix length between 0 and 32", prefix)),
    }
}
