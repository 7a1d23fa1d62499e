//! cce_node - Worker node of a CCE cluster
//!
//! Nodes live under their cluster, so the identifier is `{cluster_id}/{node_id}`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::cce_cluster::cluster_path;
use super::{ResourceHandler, delete_ignoring_not_found, fetch_status};
use crate::client::{CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, json_str, required_int, required_str, split_id, value_to_json};

pub struct CceNode;

pub(crate) const ID_FORMAT: &str = "{cluster_id}/{node_id}";

pub(crate) fn node_path(cluster_id: &str, node_id: &str) -> String {
    format!("{}/nodes/{}", cluster_path(cluster_id), node_id)
}

pub(crate) fn node_identifier(cluster_id: &str, node_id: &str) -> String {
    format!("{}/{}", cluster_id, node_id)
}

/// Login block shared by node creation and attachment
pub(crate) fn login_body(resource: &Resource) -> ProviderResult<JsonValue> {
    if let Some(key) = resource.get_str("key_pair") {
        Ok(json!({"sshKey": key}))
    } else if let Some(password) = resource.get_str("password") {
        Ok(json!({"userPassword": {"username": "root", "password": password}}))
    } else {
        Err(ProviderError::validation("key_pair or password is required")
            .for_resource(resource.id.clone()))
    }
}

pub(crate) async fn wait_for_active(
    cce: &ServiceClient,
    cluster_id: &str,
    node_id: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    let path = node_path(cluster_id, node_id);
    cce.state_change_conf(["Build", "Installing", "Installed"], ["Active"], timeout)
        .wait_for_state(|| fetch_status(cce, &path, "/status/phase"))
        .await?;
    Ok(())
}

pub(crate) async fn wait_for_gone(
    cce: &ServiceClient,
    cluster_id: &str,
    node_id: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    let path = node_path(cluster_id, node_id);
    cce.state_change_conf(
        ["Deleting", "Removing", "Active", "Error"],
        Vec::<String>::new(),
        timeout,
    )
    .wait_for_state(|| fetch_status(cce, &path, "/status/phase"))
    .await?;
    Ok(())
}

impl ResourceType for CceNode {
    fn name(&self) -> &'static str {
        "cce_node"
    }

    fn schema(&self) -> ResourceSchema {
        let fixed = |name: &str, t: AttributeType| AttributeSchema::new(name, t).required().force_new();
        ResourceSchema::new("cce_node")
            .attribute(fixed("cluster_id", AttributeType::String))
            .attribute(AttributeSchema::new("name", types::string_length(1, 56)).required())
            .attribute(fixed("flavor_id", AttributeType::String))
            .attribute(fixed("availability_zone", AttributeType::String))
            .attribute(AttributeSchema::new("os", AttributeType::String).optional_computed().force_new())
            .attribute(AttributeSchema::new("key_pair", AttributeType::String).force_new())
            .attribute(
                AttributeSchema::new("password", AttributeType::String)
                    .sensitive()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("root_volume_size", types::int_range(40, 1024))
                    .with_default(40i64)
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("root_volume_type", AttributeType::String)
                    .with_default("SSD")
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("data_volume_size", types::int_range(100, 32768))
                    .with_default(100i64)
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("data_volume_type", AttributeType::String)
                    .with_default("SSD")
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("subnet_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("labels", types::string_map()).force_new())
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("server_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("private_ip", AttributeType::String).computed())
            .with_timeouts(Timeouts::new(
                Duration::from_secs(20 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(20 * 60),
            ))
    }
}

fn build_node(resource: &Resource) -> ProviderResult<JsonValue> {
    let mut spec = JsonMap::new();
    spec.insert("flavor".to_string(), json!(required_str(resource, "flavor_id")?));
    spec.insert("az".to_string(), json!(required_str(resource, "availability_zone")?));
    spec.insert("login".to_string(), login_body(resource)?);
    spec.insert(
        "rootVolume".to_string(),
        json!({
            "size": required_int(resource, "root_volume_size")?,
            "volumetype": required_str(resource, "root_volume_type")?,
        }),
    );
    spec.insert(
        "dataVolumes".to_string(),
        json!([{
            "size": required_int(resource, "data_volume_size")?,
            "volumetype": required_str(resource, "data_volume_type")?,
        }]),
    );
    spec.insert("count".to_string(), json!(1));
    if let Some(os) = resource.get_str("os") {
        spec.insert("os".to_string(), json!(os));
    }
    if let Some(subnet) = resource.get_str("subnet_id") {
        spec.insert(
            "nodeNicSpec".to_string(),
            json!({"primaryNic": {"subnetId": subnet}}),
        );
    }
    if let Some(labels) = resource.attributes.get("labels") {
        spec.insert("k8sTags".to_string(), value_to_json(labels));
    }

    Ok(json!({
        "kind": "Node",
        "apiVersion": "v3",
        "metadata": {"name": required_str(resource, "name")?},
        "spec": spec,
    }))
}

#[async_trait]
impl ResourceHandler for CceNode {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let cce = client.service("cce");
        let cluster_id = required_str(resource, "cluster_id")?;
        let body = build_node(resource)?;

        let response = cce
            .post(&format!("{}/nodes", cluster_path(cluster_id)), &body)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let node_id = json_str(&response, "/metadata/uid", &resource.id)?.to_string();
        info!(resource = %resource.id, node_id = %node_id, "node creation started");

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
            .pointer("flavor_id", "/spec/flavor")
            .pointer("availability_zone", "/spec/az")
            .pointer("os", "/spec/os")
            .pointer("key_pair", "/spec/login/sshKey")
            .pointer("root_volume_size", "/spec/rootVolume/size")
            .pointer("root_volume_type", "/spec/rootVolume/volumetype")
            .pointer("data_volume_size", "/spec/dataVolumes/0/size")
            .pointer("data_volume_type", "/spec/dataVolumes/0/volumetype")
            .pointer("subnet_id", "/spec/nodeNicSpec/primaryNic/subnetId")
            .pointer("labels", "/spec/k8sTags")
            .pointer("status", "/status/phase")
            .pointer("server_id", "/status/serverId")
            .pointer("private_ip", "/status/privateIP")
            .build();

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        client: &CloudClient,
        identifier: &str,
        to: &Resource,
        changed: &[String],
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        if has_change(changed, "name") {
            let [cluster_id, node_id] =
                split_id::<2>(identifier, ID_FORMAT).map_err(|e| e.for_resource(to.id.clone()))?;
            client
                .service("cce")
                .put(
                    &node_path(cluster_id, node_id),
                    &json!({"metadata": {"name": required_str(to, "name")?}}),
                )
                .await
                .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;
        }
        self.read(client, &to.id, identifier).await
    }

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
        delete_ignoring_not_found(&cce, &node_path(cluster_id, node_id))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        wait_for_gone(&cce, cluster_id, node_id, timeouts.delete)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        info!(resource = %id, "node deleted");
        Ok(())
    }

    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        let [cluster_id, node_id] = split_id::<2>(import_id, ID_FORMAT)?;
        Ok(node_identifier(cluster_id, node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Resource {
        let mut node = Resource::new("cce_node", "worker")
            .with_attribute("cluster_id", "c-1")
            .with_attribute("name", "worker-1")
            .with_attribute("flavor_id", "s6.large.2")
            .with_attribute("availability_zone", "cn-north-4a")
            .with_attribute("key_pair", "ops");
        CceNode.schema().apply_defaults(&mut node.attributes);
        node
    }

    #[test]
    fn build_node_applies_volume_defaults() {
        let body = build_node(&node()).unwrap();
        assert_eq!(body["metadata"]["name"], "worker-1");
        assert_eq!(body["spec"]["rootVolume"]["size"], 40);
        assert_eq!(body["spec"]["dataVolumes"][0]["volumetype"], "SSD");
        assert_eq!(body["spec"]["login"]["sshKey"], "ops");
        assert_eq!(body["spec"]["count"], 1);
    }

    #[test]
    fn login_needs_key_or_password() {
        let mut node = node();
        node.attributes.remove("key_pair");
        assert!(login_body(&node).unwrap_err().message.contains("key_pair or password"));

        let node = node.with_attribute("password", "S3cret!");
        assert_eq!(login_body(&node).unwrap()["userPassword"]["username"], "root");
    }

    #[test]
    fn import_requires_cluster_and_node() {
        assert_eq!(CceNode.import_identifier("c-1/n-1").unwrap(), "c-1/n-1");
        let err = CceNode.import_identifier("n-1").unwrap_err();
        assert!(err.message.contains(ID_FORMAT));
    }
}
