//! cce_node_attach - Adopt an existing ECS server into a CCE cluster

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts};
use tracing::{debug, info};

use super::ResourceHandler;
use super::cce_cluster::cluster_path;
use super::cce_node::{ID_FORMAT, login_body, node_identifier, node_path, wait_for_active, wait_for_gone};
use crate::client::{CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, required_str, split_id};

pub struct CceNodeAttach;

impl ResourceType for CceNodeAttach {
    fn name(&self) -> &'static str {
        "cce_node_attach"
    }

    fn schema(&self) -> ResourceSchema {
        let fixed = |name: &str| {
            AttributeSchema::new(name, AttributeType::String)
                .required()
                .force_new()
        };
        ResourceSchema::new("cce_node_attach")
            .with_description("Attach an existing server to a cluster as a node")
            .attribute(fixed("cluster_id"))
            .attribute(fixed("server_id"))
            .attribute(fixed("os"))
            .attribute(AttributeSchema::new("key_pair", AttributeType::String).force_new())
            .attribute(
                AttributeSchema::new("password", AttributeType::String)
                    .sensitive()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("flavor_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("availability_zone", AttributeType::String).computed())
            .attribute(AttributeSchema::new("private_ip", AttributeType::String).computed())
            .with_timeouts(Timeouts::uniform(Duration::from_secs(20 * 60)))
    }
}

/// Node backed by `server_id`; the add call only returns a job id
fn find_node_by_server(nodes: &JsonValue, server_id: &str) -> Option<String> {
    nodes
        .get("items")
        .and_then(JsonValue::as_array)?
        .iter()
        .find(|n| n.pointer("/status/serverId").and_then(JsonValue::as_str) == Some(server_id))
        .and_then(|n| n.pointer("/metadata/uid"))
        .and_then(JsonValue::as_str)
        .map(String::from)
}

async fn wait_for_node(
    cce: &ServiceClient,
    cluster_id: &str,
    server_id: &str,
    timeout: Duration,
) -> ProviderResult<String> {
    let nodes_path = format!("{}/nodes", cluster_path(cluster_id));
    let node_id = cce
        .state_change_conf(["pending"], ["listed"], timeout)
        .wait_for_state(|| async {
            let nodes = cce.get(&nodes_path).await?;
            let found = find_node_by_server(&nodes, server_id);
            let status = if found.is_some() { "listed" } else { "pending" };
            Ok::<_, ProviderError>(Some((found, status.to_string())))
        })
        .await?
        .flatten()
        .ok_or_else(|| ProviderError::new(format!("no node found for server {}", server_id)))?;
    debug!(server_id, node_id = %node_id, "server registered as node");
    Ok(node_id)
}

#[async_trait]
impl ResourceHandler for CceNodeAttach {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let cce = client.service("cce");
        let cluster_id = required_str(resource, "cluster_id")?;
        let server_id = required_str(resource, "server_id")?;
        let body = json!({
            "kind": "List",
            "apiVersion": "v3",
            "nodeList": [{
                "serverID": server_id,
                "spec": {
                    "os": required_str(resource, "os")?,
                    "login": login_body(resource)?,
                }
            }]
        });

        cce.post(&format!("{}/nodes/add", cluster_path(cluster_id)), &body)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        info!(resource = %resource.id, server_id, "server attach started");

        let node_id = wait_for_node(&cce, cluster_id, server_id, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        wait_for_active(&cce, cluster_id, &node_id, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        self.read(client, &resource.id, &node_identifier(cluster_id, &node_id))
            .await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let [cluster_id, node_id] =
            split_id::<2>(identifier, ID_FORMAT).map_err(|e| e.for_resource(id.clone()))?;
        let body = match client.service("cce").get(&node_path(cluster_id, node_id)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        let attributes = Flattener::new(&body)
            .insert("cluster_id", cluster_id)
            .pointer("id", "/metadata/uid")
            .pointer("name", "/metadata/name")
            .pointer("server_id", "/status/serverId")
            .pointer("os", "/spec/os")
            .pointer("key_pair", "/spec/login/sshKey")
            .pointer("flavor_id", "/spec/flavor")
            .pointer("availability_zone", "/spec/az")
            .pointer("private_ip", "/status/privateIP")
            .pointer("status", "/status/phase")
            .build();

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    /// Removing returns the server to the tenant instead of deleting it
    async fn delete(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
        timeouts: &Timeouts,
    ) -> ProviderResult<()> {
        let [cluster_id, node_id] =
            split_id::<2>(identifier, ID_FORMAT).map_err(|e| e.for_resource(id.clone()))?;
        let cce = client.service("cce");

        let node = match cce.get(&node_path(cluster_id, node_id)).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(ProviderError::from(e).for_resource(id.clone())),
        };
        let login = node
            .pointer("/spec/login")
            .cloned()
            .unwrap_or_else(|| json!({}));

        cce.put(
            &format!("{}/nodes/operation/remove", cluster_path(cluster_id)),
            &json!({
                "kind": "RemoveNodesTask",
                "apiVersion": "v3",
                "spec": {"login": login, "nodes": [{"uid": node_id}]}
            }),
        )
        .await
        .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        wait_for_gone(&cce, cluster_id, node_id, timeouts.delete)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        info!(resource = %id, "node removed from cluster");
        Ok(())
    }

    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        let [cluster_id, node_id] = split_id::<2>(import_id, ID_FORMAT)?;
        Ok(node_identifier(cluster_id, node_id))
    }
}
