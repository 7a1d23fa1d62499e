//! vpc data source - Look up a single VPC

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::{DataSourceHandler, Filters, single_match};
use crate::client::CloudClient;
use crate::utils::Flattener;

pub struct VpcLookup;

const FILTERS: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "name"),
    ("cidr", "cidr"),
    ("status", "status"),
];

impl ResourceType for VpcLookup {
    fn name(&self) -> &'static str {
        "vpc"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("vpc")
            .with_description("Find exactly one VPC by its attributes")
            .attribute(AttributeSchema::new("id", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new("name_regex", AttributeType::String)
                    .with_description("Regular expression the VPC name must match"),
            )
            .attribute(AttributeSchema::new("cidr", types::cidr()).optional_computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("description", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new("enterprise_project_id", AttributeType::String).computed(),
            )
    }
}

#[async_trait]
impl DataSourceHandler for VpcLookup {
    async fn read(&self, client: &CloudClient, query: &Resource) -> ProviderResult<State> {
        let name_regex = query
            .get_str("name_regex")
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    ProviderError::validation(format!("invalid name_regex '{}': {}", pattern, e))
                        .for_resource(query.id.clone())
                })
            })
            .transpose()?;

        let body = client
            .service("vpc")
            .get("/v1/{project_id}/vpcs")
            .await
            .map_err(|e| ProviderError::from(e).for_resource(query.id.clone()))?;
        let vpcs = body
            .get("vpcs")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();

        let filters = Filters::from_query(query, FILTERS);
        let matches: Vec<&JsonValue> = vpcs
            .iter()
            .filter(|vpc| filters.matches(vpc))
            .filter(|vpc| match &name_regex {
                Some(re) => vpc
                    .get("name")
                    .and_then(JsonValue::as_str)
                    .is_some_and(|name| re.is_match(name)),
                None => true,
            })
            .collect();

        let mut described = filters.describe();
        if let Some(re) = &name_regex {
            described = format!("{}, name_regex={}", described, re.as_str());
        }
        let vpc = single_match(query, "VPC", matches, &described)?;

        let mut attributes = Flattener::new(vpc)
            .field("id")
            .field("name")
            .field("cidr")
            .field("status")
            .field("description")
            .field("enterprise_project_id")
            .build();
        if let Some(re) = &name_regex {
            attributes.insert("name_regex".to_string(), re.as_str().into());
        }

        let identifier = attributes.get_str("id").unwrap_or_default().to_string();
        Ok(State::existing(query.id.clone(), attributes).with_identifier(identifier))
    }
}
