//! cce_clusters data source - List CCE clusters, optionally filtered

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::DataSourceHandler;
use crate::client::CloudClient;
use crate::utils::Flattener;

pub struct CceClusters;

fn cluster_summary(cluster: &JsonValue) -> HashMap<String, Value> {
    Flattener::new(cluster)
        .pointer("id", "/metadata/uid")
        .pointer("name", "/metadata/name")
        .pointer("status", "/status/phase")
        .pointer("flavor_id", "/spec/flavor")
        .pointer("cluster_version", "/spec/version")
        .pointer("cluster_type", "/spec/type")
        .pointer("vpc_id", "/spec/hostNetwork/vpc")
        .pointer("subnet_id", "/spec/hostNetwork/subnet")
        .build()
}

/// Summaries of the clusters matching the optional name and status, sorted by name
fn select_clusters(
    items: &[JsonValue],
    name: Option<&str>,
    status: Option<&str>,
) -> Vec<HashMap<String, Value>> {
    let mut clusters: Vec<HashMap<String, Value>> = items
        .iter()
        .map(cluster_summary)
        .filter(|c| name.is_none_or(|n| c.get_str("name") == Some(n)))
        .filter(|c| status.is_none_or(|s| c.get_str("status") == Some(s)))
        .collect();
    clusters.sort_by(|a, b| a.get_str("name").cmp(&b.get_str("name")));
    clusters
}

impl ResourceType for CceClusters {
    fn name(&self) -> &'static str {
        "cce_clusters"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("cce_clusters")
            .attribute(AttributeSchema::new("name", AttributeType::String))
            .attribute(
                AttributeSchema::new(
                    "status",
                    types::string_enum(&["Available", "Unavailable", "Creating", "Deleting", "Upgrading", "Hibernation"]),
                ),
            )
            .attribute(AttributeSchema::new("ids", types::string_list()).computed())
            .attribute(
                AttributeSchema::new("clusters", AttributeType::List(Box::new(types::string_map())))
                    .computed(),
            )
    }
}

#[async_trait]
impl DataSourceHandler for CceClusters {
    async fn read(&self, client: &CloudClient, query: &Resource) -> ProviderResult<State> {
        let body = client
            .service("cce")
            .get("/api/v3/projects/{project_id}/clusters")
            .await
            .map_err(|e| ProviderError::from(e).for_resource(query.id.clone()))?;
        let items = body
            .get("items")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();

        let clusters = select_clusters(&items, query.get_str("name"), query.get_str("status"));
        let ids: Vec<String> = clusters
            .iter()
            .filter_map(|c| c.get_str("id").map(String::from))
            .collect();

        let mut attributes = HashMap::new();
        for key in ["name", "status"] {
            if let Some(value) = query.attributes.get(key) {
                attributes.insert(key.to_string(), value.clone());
            }
        }
        attributes.insert("ids".to_string(), Value::string_list(ids.clone()));
        attributes.insert(
            "clusters".to_string(),
            Value::List(clusters.into_iter().map(Value::Map).collect()),
        );

        Ok(State::existing(query.id.clone(), attributes).with_identifier(ids.join(",")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items() -> Vec<JsonValue> {
        vec![
            json!({"metadata": {"uid": "c-2", "name": "web"}, "status": {"phase": "Available"}}),
            json!({"metadata": {"uid": "c-1", "name": "batch"}, "status": {"phase": "Hibernation"}}),
            json!({"metadata": {"uid": "c-3", "name": "api"}, "status": {"phase": "Available"}}),
        ]
    }

    #[test]
    fn selects_by_status_sorted_by_name() {
        let clusters = select_clusters(&items(), None, Some("Available"));
        let names: Vec<&str> = clusters.iter().filter_map(|c| c.get_str("name")).collect();
        assert_eq!(names, vec!["api", "web"]);
    }

    #[test]
    fn selects_by_name() {
        let clusters = select_clusters(&items(), Some("batch"), None);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].get_str("id"), Some("c-1"));
        assert!(select_clusters(&items(), Some("nope"), None).is_empty());
    }
}
