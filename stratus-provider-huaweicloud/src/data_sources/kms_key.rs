//! kms_key data source - Look up a single KMS key

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use tracing::debug;

use super::{DataSourceHandler, Filters, single_match};
use crate::client::{ClientError, ClientResult, CloudClient, ServiceClient};
use crate::resources::kms_key::describe_key;
use crate::utils::Flattener;

pub struct KmsKeyLookup;

const FILTERS: &[(&str, &str)] = &[
    ("key_id", "key_id"),
    ("key_alias", "key_alias"),
    ("key_state", "key_state"),
];

const PAGE_SIZE: &str = "100";

/// Every key id in the project, following `next_marker` while `truncated`
async fn list_key_ids(kms: &ServiceClient) -> ClientResult<Vec<String>> {
    let mut ids = Vec::new();
    let mut marker: Option<String> = None;
    loop {
        let mut body = JsonMap::new();
        body.insert("limit".to_string(), json!(PAGE_SIZE));
        if let Some(m) = &marker {
            body.insert("marker".to_string(), json!(m));
        }
        let page = kms
            .post("/v1.0/{project_id}/kms/list-keys", &JsonValue::Object(body))
            .await?;

        ids.extend(
            page.get("keys")
                .and_then(JsonValue::as_array)
                .into_iter()
                .flatten()
                .filter_map(|k| k.as_str().map(String::from)),
        );

        let truncated = page.get("truncated").and_then(JsonValue::as_str) == Some("true");
        marker = page
            .get("next_marker")
            .and_then(JsonValue::as_str)
            .filter(|m| !m.is_empty())
            .map(String::from);
        if !truncated || marker.is_none() {
            break;
        }
        debug!(count = ids.len(), "listing next page of keys");
    }
    Ok(ids)
}

impl ResourceType for KmsKeyLookup {
    fn name(&self) -> &'static str {
        "kms_key"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("kms_key")
            .with_description("Find exactly one KMS key by alias, id or state")
            .attribute(AttributeSchema::new("key_id", AttributeType::String).optional_computed())
            .attribute(AttributeSchema::new("key_alias", AttributeType::String).optional_computed())
            .attribute(
                AttributeSchema::new("key_state", types::string_enum(&["1", "2", "3", "4", "5"]))
                    .optional_computed()
                    .with_description("1 pending activation, 2 enabled, 3 disabled, 4 pending deletion, 5 pending import"),
            )
            .attribute(AttributeSchema::new("key_description", AttributeType::String).computed())
            .attribute(AttributeSchema::new("key_algorithm", AttributeType::String).computed())
            .attribute(AttributeSchema::new("domain_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("creation_date", AttributeType::String).computed())
    }
}

#[async_trait]
impl DataSourceHandler for KmsKeyLookup {
    async fn read(&self, client: &CloudClient, query: &Resource) -> ProviderResult<State> {
        let kms = client.service("kms");
        let fail = |e: ClientError| ProviderError::from(e).for_resource(query.id.clone());

        let ids = match query.get_str("key_id") {
            Some(id) => vec![id.to_string()],
            None => list_key_ids(&kms).await.map_err(fail)?,
        };

        let mut keys = Vec::with_capacity(ids.len());
        for id in &ids {
            match describe_key(&kms, id).await {
                Ok(body) => keys.push(body.get("key_info").cloned().unwrap_or_default()),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(fail(e)),
            }
        }

        let filters = Filters::from_query(query, FILTERS);
        let matches: Vec<&JsonValue> = keys.iter().filter(|k| filters.matches(k)).collect();
        let key = single_match(query, "KMS key", matches, &filters.describe())?;

        let attributes = Flattener::new(key)
            .field("key_id")
            .field("key_alias")
            .field("key_state")
            .field("key_description")
            .field_as("key_algorithm", "key_spec")
            .field("domain_id")
            .field("creation_date")
            .build();

        let identifier = attributes.get_str("key_id").unwrap_or_default().to_string();
        Ok(State::existing(query.id.clone(), attributes).with_identifier(identifier))
    }
}
