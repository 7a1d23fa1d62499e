//! vpc - Virtual Private Cloud

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::tags::{read_tags, update_tags};
use super::{ResourceHandler, delete_ignoring_not_found, fetch_status};
use crate::client::{CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, json_str};

pub struct Vpc;

fn vpc_path(id: &str) -> String {
    format!("/v1/{{project_id}}/vpcs/{}", id)
}

fn tags_base(id: &str) -> String {
    format!("/v2.0/{{project_id}}/vpcs/{}", id)
}

impl ResourceType for Vpc {
    fn name(&self) -> &'static str {
        "vpc"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("vpc")
            .with_description("A Virtual Private Cloud")
            .attribute(
                AttributeSchema::new("name", types::string_length(1, 64))
                    .required()
                    .with_description("VPC name"),
            )
            .attribute(AttributeSchema::new("cidr", types::cidr()).required())
            .attribute(AttributeSchema::new("description", types::string_length(0, 255)))
            .attribute(
                AttributeSchema::new("enterprise_project_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("tags", types::string_map()))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .with_timeouts(Timeouts::uniform(Duration::from_secs(10 * 60)))
    }
}

async fn wait_for_ok(vpc: &ServiceClient, id: &str, timeout: Duration) -> ProviderResult<()> {
    let path = vpc_path(id);
    vpc.state_change_conf(["CREATING"], ["OK"], timeout)
        .wait_for_state(|| fetch_status(vpc, &path, "/vpc/status"))
        .await?;
    Ok(())
}

#[async_trait]
impl ResourceHandler for Vpc {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let vpc = client.service("vpc");
        let body = copy_attributes(
            &resource.attributes,
            &[
                ("name", "name"),
                ("cidr", "cidr"),
                ("description", "description"),
                ("enterprise_project_id", "enterprise_project_id"),
            ],
        );

        let response = vpc
            .post("/v1/{project_id}/vpcs", &json!({ "vpc": JsonValue::Object(body) }))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let vpc_id = json_str(&response, "/vpc/id", &resource.id)?.to_string();
        info!(resource = %resource.id, vpc_id = %vpc_id, "VPC created, waiting for OK");

        wait_for_ok(&vpc, &vpc_id, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        update_tags(&vpc, &tags_base(&vpc_id), None, resource.attributes.get("tags"))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;

        self.read(client, &resource.id, &vpc_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let vpc = client.service("vpc");
        let body = match vpc.get(&vpc_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };
        let tags = read_tags(&vpc, &tags_base(identifier))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        let attributes = Flattener::new(&body["vpc"])
            .field("id")
            .field("name")
            .field("cidr")
            .field("description")
            .field("status")
            .field("enterprise_project_id")
            .insert("tags", Value::Map(tags))
            .build();

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        client: &CloudClient,
        identifier: &str,
        to: &Resource,
        changed: &[String],
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let vpc = client.service("vpc");
        let mut body = copy_attributes(
            &to.attributes,
            &[("name", "name"), ("cidr", "cidr"), ("description", "description")],
        );
        // an empty description clears a removed one
        body.entry("description").or_insert_with(|| json!(""));

        if ["name", "cidr", "description"]
            .iter()
            .any(|k| has_change(changed, k))
        {
            vpc.put(&vpc_path(identifier), &json!({ "vpc": JsonValue::Object(body) }))
                .await
                .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;
            wait_for_ok(&vpc, identifier, timeouts.update)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))?;
        }

        if has_change(changed, "tags") {
            let current = read_tags(&vpc, &tags_base(identifier))
                .await
                .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;
            update_tags(
                &vpc,
                &tags_base(identifier),
                Some(&Value::Map(current)),
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
        let vpc = client.service("vpc");
        let path = vpc_path(identifier);
        delete_ignoring_not_found(&vpc, &path)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        vpc.state_change_conf(["OK", "CREATING"], Vec::<String>::new(), timeouts.delete)
            .wait_for_state(|| fetch_status(&vpc, &path, "/vpc/status"))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        info!(resource = %id, "VPC deleted");
        Ok(())
    }
}
