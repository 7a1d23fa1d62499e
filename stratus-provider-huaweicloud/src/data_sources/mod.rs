//! Data source catalog
//!
//! A data source is a read-only query: the attributes of the declared
//! resource act as filters and the matching object is flattened into state.

pub mod availability_zones;
pub mod cce_clusters;
pub mod kms_key;
pub mod vpc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, State};

use crate::client::CloudClient;

/// Lookup for one data source type
#[async_trait]
pub trait DataSourceHandler: ResourceType {
    async fn read(&self, client: &CloudClient, query: &Resource) -> ProviderResult<State>;
}

macro_rules! data_source_catalog {
    ($($module:ident :: $handler:ident),* $(,)?) => {
        /// All data source handlers supported by this provider
        pub fn handlers() -> Vec<Box<dyn DataSourceHandler>> {
            vec![$(Box::new($module::$handler)),*]
        }

        /// Returns all data source types supported by this provider
        pub fn data_source_types() -> Vec<Box<dyn ResourceType>> {
            vec![$(Box::new($module::$handler) as Box<dyn ResourceType>),*]
        }
    };
}

data_source_catalog!(
    vpc::VpcLookup,
    availability_zones::AvailabilityZones,
    cce_clusters::CceClusters,
    kms_key::KmsKeyLookup,
);

/// Handler for a data source type name
pub fn handler(name: &str) -> Option<Box<dyn DataSourceHandler>> {
    handlers().into_iter().find(|h| h.name() == name)
}

/// Equality filters taken from the query: `(attribute, API property, wanted value)`
pub(crate) struct Filters<'a> {
    filters: Vec<(&'a str, &'a str, &'a str)>,
}

impl<'a> Filters<'a> {
    /// Collect the filters among `fields` that the query sets
    pub fn from_query(query: &'a Resource, fields: &[(&'a str, &'a str)]) -> Self {
        let filters = fields
            .iter()
            .filter_map(|(attr, property)| query.get_str(attr).map(|v| (*attr, *property, v)))
            .collect();
        Self { filters }
    }

    pub fn matches(&self, item: &JsonValue) -> bool {
        self.filters
            .iter()
            .all(|(_, property, wanted)| item.get(*property).and_then(JsonValue::as_str) == Some(*wanted))
    }

    /// Human readable rendering used in lookup errors
    pub fn describe(&self) -> String {
        if self.filters.is_empty() {
            return "no filters".to_string();
        }
        self.filters
            .iter()
            .map(|(attr, _, wanted)| format!("{}={}", attr, wanted))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Exactly one item out of `matches`, or a validation error naming the filters
pub(crate) fn single_match<'a>(
    query: &Resource,
    kind: &str,
    matches: Vec<&'a JsonValue>,
    filters: &str,
) -> ProviderResult<&'a JsonValue> {
    match matches.as_slice() {
        [only] => Ok(*only),
        [] => Err(ProviderError::validation(format!(
            "no {} found matching {}",
            kind, filters
        ))
        .for_resource(query.id.clone())),
        many => Err(ProviderError::validation(format!(
            "{} {}s match {}; narrow the query",
            many.len(),
            kind,
            filters
        ))
        .for_resource(query.id.clone())),
    }
}
