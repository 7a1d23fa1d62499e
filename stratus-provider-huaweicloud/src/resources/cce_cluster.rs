//! cce_cluster - Cloud Container Engine (Kubernetes) cluster

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::{ResourceHandler, delete_ignoring_not_found, fetch_status};
use crate::client::{CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, json_str, required_str, value_to_json};

pub struct CceCluster;

pub(crate) fn cluster_path(id: &str) -> String {
    format!("/api/v3/projects/{{project_id}}/clusters/{}", id)
}

impl ResourceType for CceCluster {
    fn name(&self) -> &'static str {
        "cce_cluster"
    }

    fn schema(&self) -> ResourceSchema {
        let fixed = |name: &str, t: AttributeType| AttributeSchema::new(name, t).required().force_new();
        ResourceSchema::new("cce_cluster")
            .with_description("A CCE Kubernetes cluster")
            .attribute(fixed("name", types::string_length(4, 128)))
            .attribute(fixed("flavor_id", AttributeType::String).with_description("e.g. cce.s1.small"))
            .attribute(fixed("vpc_id", AttributeType::String))
            .attribute(fixed("subnet_id", AttributeType::String))
            .attribute(fixed(
                "container_network_type",
                types::string_enum(&["overlay_l2", "vpc-router", "eni"]),
            ))
            .attribute(
                AttributeSchema::new("cluster_version", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("cluster_type", types::string_enum(&["VirtualMachine", "ARM64"]))
                    .with_default("VirtualMachine")
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("security_group_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("container_network_cidr", types::cidr())
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("service_network_cidr", types::cidr())
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("authentication_mode", types::string_enum(&["rbac", "authenticating_proxy"]))
                    .with_default("rbac")
                    .force_new(),
            )
            .attribute(AttributeSchema::new("labels", types::string_map()).force_new())
            .attribute(AttributeSchema::new("description", types::string_length(0, 200)))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("internal_endpoint", AttributeType::String).computed())
            .with_timeouts(Timeouts::new(
                Duration::from_secs(30 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(30 * 60),
            ))
    }
}

fn build_cluster(resource: &Resource) -> ProviderResult<JsonValue> {
    let mut host_network = JsonMap::new();
    host_network.insert("vpc".to_string(), json!(required_str(resource, "vpc_id")?));
    host_network.insert("subnet".to_string(), json!(required_str(resource, "subnet_id")?));
    if let Some(sg) = resource.get_str("security_group_id") {
        host_network.insert("SecurityGroup".to_string(), json!(sg));
    }

    let mut container_network = JsonMap::new();
    container_network.insert(
        "mode".to_string(),
        json!(required_str(resource, "container_network_type")?),
    );
    if let Some(cidr) = resource.get_str("container_network_cidr") {
        container_network.insert("cidr".to_string(), json!(cidr));
    }

    let mut spec = JsonMap::new();
    spec.insert("type".to_string(), json!(resource.get_str("cluster_type").unwrap_or("VirtualMachine")));
    spec.insert("flavor".to_string(), json!(required_str(resource, "flavor_id")?));
    spec.insert("hostNetwork".to_string(), JsonValue::Object(host_network));
    spec.insert("containerNetwork".to_string(), JsonValue::Object(container_network));
    spec.insert(
        "authentication".to_string(),
        json!({"mode": resource.get_str("authentication_mode").unwrap_or("rbac")}),
    );
    if let Some(version) = resource.get_str("cluster_version") {
        spec.insert("version".to_string(), json!(version));
    }
    if let Some(desc) = resource.get_str("description") {
        spec.insert("description".to_string(), json!(desc));
    }
    if let Some(cidr) = resource.get_str("service_network_cidr") {
        spec.insert("kubernetesSvcIpRange".to_string(), json!(cidr));
    }

    let mut metadata = JsonMap::new();
    metadata.insert("name".to_string(), json!(required_str(resource, "name")?));
    if let Some(labels) = resource.attributes.get("labels") {
        metadata.insert("labels".to_string(), value_to_json(labels));
    }

    Ok(json!({
        "kind": "Cluster",
        "apiVersion": "v3",
        "metadata": metadata,
        "spec": spec,
    }))
}

async fn wait_for_available(cce: &ServiceClient, id: &str, timeout: Duration) -> ProviderResult<()> {
    let path = cluster_path(id);
    cce.state_change_conf(["Creating"], ["Available"], timeout)
        .wait_for_state(|| fetch_status(cce, &path, "/status/phase"))
        .await?;
    Ok(())
}

#[async_trait]
impl ResourceHandler for CceCluster {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let cce = client.service("cce");
        let body = build_cluster(resource)?;

        let response = cce
            .post("/api/v3/projects/{project_id}/clusters", &body)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let cluster_id = json_str(&response, "/metadata/uid", &resource.id)?.to_string();
        info!(resource = %resource.id, cluster_id = %cluster_id, "cluster creation started");

        wait_for_available(&cce, &cluster_id, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        info!(resource = %resource.id, cluster_id = %cluster_id, "cluster available");

        self.read(client, &resource.id, &cluster_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = match client.service("cce").get(&cluster_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        let internal_endpoint = body
            .pointer("/status/endpoints")
            .and_then(JsonValue::as_array)
            .and_then(|eps| {
                eps.iter()
                    .find(|e| e.get("type").and_then(JsonValue::as_str) == Some("Internal"))
            })
            .and_then(|e| e.get("url"))
            .and_then(JsonValue::as_str)
            .map(String::from);

        let mut flattener = Flattener::new(&body)
            .pointer("id", "/metadata/uid")
            .pointer("name", "/metadata/name")
            .pointer("labels", "/metadata/labels")
            .pointer("flavor_id", "/spec/flavor")
            .pointer("cluster_version", "/spec/version")
            .pointer("cluster_type", "/spec/type")
            .pointer("description", "/spec/description")
            .pointer("vpc_id", "/spec/hostNetwork/vpc")
            .pointer("subnet_id", "/spec/hostNetwork/subnet")
            .pointer("security_group_id", "/spec/hostNetwork/SecurityGroup")
            .pointer("container_network_type", "/spec/containerNetwork/mode")
            .pointer("container_network_cidr", "/spec/containerNetwork/cidr")
            .pointer("service_network_cidr", "/spec/kubernetesSvcIpRange")
            .pointer("authentication_mode", "/spec/authentication/mode")
            .pointer("status", "/status/phase");
        if let Some(url) = internal_endpoint {
            flattener = flattener.insert("internal_endpoint", url);
        }

        Ok(State::existing(id.clone(), flattener.build()).with_identifier(identifier))
    }

    async fn update(
        &self,
        client: &CloudClient,
        identifier: &str,
        to: &Resource,
        changed: &[String],
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        if has_change(changed, "description") {
            client
                .service("cce")
                .put(
                    &cluster_path(identifier),
                    &json!({"spec": {"description": to.get_str("description").unwrap_or_default()}}),
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
        let cce = client.service("cce");
        let path = cluster_path(identifier);
        delete_ignoring_not_found(&cce, &path)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        cce.state_change_conf(["Deleting", "Available"], Vec::<String>::new(), timeouts.delete)
            .wait_for_state(|| fetch_status(&cce, &path, "/status/phase"))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        info!(resource = %id, "cluster deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Resource {
        Resource::new("cce_cluster", "k8s")
            .with_attribute("name", "k8s-prod")
            .with_attribute("flavor_id", "cce.s1.small")
            .with_attribute("vpc_id", "vpc-1")
            .with_attribute("subnet_id", "subnet-1")
            .with_attribute("container_network_type", "overlay_l2")
    }

    #[test]
    fn build_cluster_nests_networks() {
        let body = build_cluster(&cluster().with_attribute("container_network_cidr", "172.16.0.0/16"))
            .unwrap();
        assert_eq!(body["kind"], "Cluster");
        assert_eq!(body["metadata"]["name"], "k8s-prod");
        assert_eq!(body["spec"]["hostNetwork"]["vpc"], "vpc-1");
        assert_eq!(body["spec"]["containerNetwork"]["mode"], "overlay_l2");
        assert_eq!(body["spec"]["containerNetwork"]["cidr"], "172.16.0.0/16");
        assert_eq!(body["spec"]["type"], "VirtualMachine");
        assert_eq!(body["spec"]["authentication"]["mode"], "rbac");
    }

    #[test]
    fn build_cluster_requires_network() {
        let mut incomplete = cluster();
        incomplete.attributes.remove("subnet_id");
        let err = build_cluster(&incomplete).unwrap_err();
        assert!(err.message.contains("subnet_id is required"));
    }

    #[test]
    fn only_description_is_mutable() {
        let schema = CceCluster.schema();
        assert!(!schema.requires_replacement(&["description".to_string()]));
        assert!(schema.requires_replacement(&["flavor_id".to_string()]));
    }
}
