//! elb_certificate - TLS certificate for dedicated load balancers

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::{ResourceHandler, delete_ignoring_not_found};
use crate::client::{CloudClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, json_str, value_to_json};

pub struct ElbCertificate;

const FIELDS: &[(&str, &str)] = &[
    ("name", "name"),
    ("description", "description"),
    ("domain", "domain"),
    ("certificate", "certificate"),
    ("private_key", "private_key"),
];

fn certificate_path(id: &str) -> String {
    format!("/v3/{{project_id}}/elb/certificates/{}", id)
}

impl ResourceType for ElbCertificate {
    fn name(&self) -> &'static str {
        "elb_certificate"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("elb_certificate")
            .attribute(AttributeSchema::new("name", types::string_length(0, 255)).optional_computed())
            .attribute(AttributeSchema::new("description", types::string_length(0, 255)))
            .attribute(
                AttributeSchema::new("type", types::string_enum(&["server", "client"]))
                    .with_default("server")
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("domain", AttributeType::String)
                    .with_description("Comma separated domain names; server certificates only"),
            )
            .attribute(
                AttributeSchema::new("certificate", AttributeType::String)
                    .required()
                    .with_description("PEM encoded certificate"),
            )
            .attribute(
                AttributeSchema::new("private_key", AttributeType::String)
                    .sensitive()
                    .with_description("PEM encoded key; required for server certificates"),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("expire_time", AttributeType::String).computed())
            .attribute(AttributeSchema::new("create_time", AttributeType::String).computed())
    }
}

#[async_trait]
impl ResourceHandler for ElbCertificate {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        if resource.get_str("type") != Some("client") && resource.get_str("private_key").is_none() {
            return Err(ProviderError::validation("private_key is required for server certificates")
                .for_resource(resource.id.clone()));
        }
        let mut body = copy_attributes(&resource.attributes, FIELDS);
        if let Some(cert_type) = resource.attributes.get("type") {
            body.insert("type".to_string(), value_to_json(cert_type));
        }

        let response = client
            .service("elb")
            .post(
                "/v3/{project_id}/elb/certificates",
                &json!({ "certificate": JsonValue::Object(body) }),
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let cert_id = json_str(&response, "/certificate/id", &resource.id)?.to_string();
        info!(resource = %resource.id, certificate_id = %cert_id, "certificate uploaded");

        self.read(client, &resource.id, &cert_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = match client.service("elb").get(&certificate_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        // private_key is never read back
        let attributes = Flattener::new(&body["certificate"])
            .field("id")
            .field("name")
            .field("description")
            .field("type")
            .field("domain")
            .field("certificate")
            .field("expire_time")
            .field("create_time")
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
        let mut body = JsonMap::new();
        for (attr, property) in FIELDS {
            if has_change(changed, attr) {
                let value = to
                    .attributes
                    .get(*attr)
                    .map(value_to_json)
                    .unwrap_or_else(|| json!(""));
                body.insert(property.to_string(), value);
            }
        }

        if !body.is_empty() {
            client
                .service("elb")
                .put(
                    &certificate_path(identifier),
                    &json!({ "certificate": JsonValue::Object(body) }),
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
        _timeouts: &Timeouts,
    ) -> ProviderResult<()> {
        delete_ignoring_not_found(&client.service("elb"), &certificate_path(identifier))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))
    }
}
