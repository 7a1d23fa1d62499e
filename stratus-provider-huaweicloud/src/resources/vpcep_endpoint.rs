//! vpcep_endpoint - Endpoint connecting a VPC to an endpoint service

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::tags::update_tags;
use super::{ResourceHandler, delete_ignoring_not_found, fetch_status, fetch_status_with};
use crate::client::{ClientError, CloudClient, check_deleted};
use crate::utils::{Flattener, build_tags, copy_attributes, json_str};

pub struct VpcepEndpoint;

/// Statuses in which an endpoint is usable, depending on service approval
pub(crate) const ESTABLISHED: [&str; 2] = ["accepted", "pendingAcceptance"];

pub(crate) fn endpoint_path(id: &str) -> String {
    format!("/v1/{{project_id}}/vpc-endpoints/{}", id)
}

/// VPCEP answers 403 for an endpoint whose service has been removed
fn endpoint_gone(err: ClientError) -> ClientError {
    err.convert_expected_403_to_404(&[])
}

impl ResourceType for VpcepEndpoint {
    fn name(&self) -> &'static str {
        "vpcep_endpoint"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("vpcep_endpoint")
            .attribute(
                AttributeSchema::new("service_id", AttributeType::String)
                    .required()
                    .force_new()
                    .with_provider_name("endpoint_service_id"),
            )
            .attribute(
                AttributeSchema::new("vpc_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("network_id", AttributeType::String)
                    .required()
                    .force_new()
                    .with_provider_name("subnet_id"),
            )
            .attribute(
                AttributeSchema::new("ip_address", types::ipv4())
                    .optional_computed()
                    .force_new()
                    .with_provider_name("port_ip"),
            )
            .attribute(
                AttributeSchema::new("enable_dns", AttributeType::Bool)
                    .with_default(true)
                    .force_new(),
            )
            .attribute(AttributeSchema::new("whitelist", types::string_list()))
            .attribute(AttributeSchema::new("enable_whitelist", AttributeType::Bool).optional_computed())
            .attribute(AttributeSchema::new("description", types::string_length(0, 128)))
            .attribute(AttributeSchema::new("tags", types::string_map()))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("service_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("private_domain_name", AttributeType::String).computed())
            .with_timeouts(Timeouts::uniform(Duration::from_secs(10 * 60)))
    }
}

#[async_trait]
impl ResourceHandler for VpcepEndpoint {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let vpcep = client.service("vpcep");
        let mut body = copy_attributes(
            &resource.attributes,
            &[
                ("service_id", "endpoint_service_id"),
                ("vpc_id", "vpc_id"),
                ("network_id", "subnet_id"),
                ("ip_address", "port_ip"),
                ("enable_dns", "enable_dns"),
                ("whitelist", "whitelist"),
                ("enable_whitelist", "enable_whitelist"),
                ("description", "description"),
            ],
        );
        if resource.attributes.contains_key("whitelist")
            && !resource.attributes.contains_key("enable_whitelist")
        {
            body.insert("enable_whitelist".to_string(), json!(true));
        }
        if resource.attributes.contains_key("tags") {
            body.insert(
                "tags".to_string(),
                JsonValue::Array(build_tags(resource.attributes.get("tags"))),
            );
        }

        let response = vpcep
            .post("/v1/{project_id}/vpc-endpoints", &JsonValue::Object(body))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let endpoint_id = json_str(&response, "/id", &resource.id)?.to_string();
        info!(resource = %resource.id, endpoint_id = %endpoint_id, "endpoint created, waiting for connection");

        let path = endpoint_path(&endpoint_id);
        vpcep
            .state_change_conf(["creating"], ESTABLISHED, timeouts.create)
            .wait_for_state(|| fetch_status(&vpcep, &path, "/status"))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;

        self.read(client, &resource.id, &endpoint_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = match client
            .service("vpcep")
            .get(&endpoint_path(identifier))
            .await
            .map_err(endpoint_gone)
        {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        let attributes = Flattener::new(&body)
            .field("id")
            .field("status")
            .field_as("service_id", "endpoint_service_id")
            .field_as("service_name", "endpoint_service_name")
            .field("vpc_id")
            .field_as("network_id", "subnet_id")
            .field_as("ip_address", "ip")
            .field("enable_dns")
            .field("whitelist")
            .field("enable_whitelist")
            .field("description")
            .pointer("private_domain_name", "/dns_names/0")
            .tags("tags")
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
        let vpcep = client.service("vpcep");

        let mut body = JsonMap::new();
        if has_change(changed, "whitelist") || has_change(changed, "enable_whitelist") {
            let whitelist = to.get_string_list("whitelist");
            let enabled = to.get_bool("enable_whitelist").unwrap_or(!whitelist.is_empty());
            body.insert("whitelist".to_string(), json!(whitelist));
            body.insert("enable_whitelist".to_string(), json!(enabled));
        }
        if has_change(changed, "description") {
            body.insert(
                "description".to_string(),
                json!(to.get_str("description").unwrap_or_default()),
            );
        }
        if !body.is_empty() {
            vpcep
                .put(&endpoint_path(identifier), &JsonValue::Object(body))
                .await
                .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;
        }

        if has_change(changed, "tags") {
            let current = self.read(client, &to.id, identifier).await?;
            update_tags(
                &vpcep,
                &endpoint_path(identifier),
                current.attributes.get("tags"),
                to.attributes.get("tags"),
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
        let vpcep = client.service("vpcep");
        let path = endpoint_path(identifier);
        delete_ignoring_not_found(&vpcep, &path)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        vpcep
            .state_change_conf(
                ["deleting", "accepted", "pendingAcceptance", "rejected", "failed"],
                Vec::<String>::new(),
                timeouts.delete,
            )
            .wait_for_state(|| fetch_status_with(&vpcep, &path, "/status", endpoint_gone))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_forces_replacement() {
        let schema = VpcepEndpoint.schema();
        assert!(schema.requires_replacement(&["network_id".to_string()]));
        assert!(!schema.requires_replacement(&["whitelist".to_string(), "tags".to_string()]));
        assert_eq!(
            schema.attributes["service_id"].provider_name.as_deref(),
            Some("endpoint_service_id")
        );
    }
}
