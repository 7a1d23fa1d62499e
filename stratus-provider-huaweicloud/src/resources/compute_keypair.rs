//! compute_keypair - SSH keypair (identified by name)

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::{ResourceHandler, delete_ignoring_not_found};
use crate::client::{CloudClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, required_str};

pub struct ComputeKeypair;

fn keypair_path(name: &str) -> String {
    format!("/v2.1/{{project_id}}/os-keypairs/{}", name)
}

impl ResourceType for ComputeKeypair {
    fn name(&self) -> &'static str {
        "compute_keypair"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("compute_keypair")
            .attribute(
                AttributeSchema::new("name", types::string_length(1, 64))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("public_key", AttributeType::String)
                    .optional_computed()
                    .force_new()
                    .with_description("Generated by the cloud when omitted"),
            )
            .attribute(
                AttributeSchema::new("private_key", AttributeType::String)
                    .computed()
                    .sensitive()
                    .with_description("Only returned when the cloud generated the key"),
            )
            .attribute(AttributeSchema::new("fingerprint", AttributeType::String).computed())
    }
}

#[async_trait]
impl ResourceHandler for ComputeKeypair {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let name = required_str(resource, "name")?;
        let body = copy_attributes(
            &resource.attributes,
            &[("name", "name"), ("public_key", "public_key")],
        );

        let response = client
            .service("ecs")
            .post(
                "/v2.1/{project_id}/os-keypairs",
                &json!({ "keypair": JsonValue::Object(body) }),
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        info!(resource = %resource.id, name, "keypair created");

        let mut state = self.read(client, &resource.id, name).await?;
        if let Some(private_key) = response
            .pointer("/keypair/private_key")
            .and_then(JsonValue::as_str)
        {
            state
                .attributes
                .insert("private_key".to_string(), Value::from(private_key));
        }
        Ok(state)
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = match client.service("ecs").get(&keypair_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        let attributes = Flattener::new(&body["keypair"])
            .field("name")
            .field("public_key")
            .field("fingerprint")
            .build();

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn delete(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
        _timeouts: &Timeouts,
    ) -> ProviderResult<()> {
        delete_ignoring_not_found(&client.service("ecs"), &keypair_path(identifier))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))
    }
}
