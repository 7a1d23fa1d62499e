//! networking_secgroup - Security group

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::{debug, info};

use super::{ResourceHandler, delete_ignoring_not_found};
use crate::client::{CloudClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, json_str};

pub struct NetworkingSecgroup;

fn secgroup_path(id: &str) -> String {
    format!("/v3/{{project_id}}/vpc/security-groups/{}", id)
}

impl ResourceType for NetworkingSecgroup {
    fn name(&self) -> &'static str {
        "networking_secgroup"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("networking_secgroup")
            .attribute(AttributeSchema::new("name", types::string_length(1, 64)).required())
            .attribute(AttributeSchema::new("description", types::string_length(0, 255)))
            .attribute(
                AttributeSchema::new("enterprise_project_id", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("delete_default_rules", AttributeType::Bool)
                    .with_default(false)
                    .force_new()
                    .with_description("Remove the rules the cloud adds to every new group"),
            )
            .attribute(AttributeSchema::new("rule_ids", types::string_list()).computed())
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
    }
}

#[async_trait]
impl ResourceHandler for NetworkingSecgroup {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let vpc = client.service("vpc");
        let body = copy_attributes(
            &resource.attributes,
            &[
                ("name", "name"),
                ("description", "description"),
                ("enterprise_project_id", "enterprise_project_id"),
            ],
        );

        let response = vpc
            .post(
                "/v3/{project_id}/vpc/security-groups",
                &json!({ "security_group": JsonValue::Object(body) }),
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let group_id = json_str(&response, "/security_group/id", &resource.id)?.to_string();
        info!(resource = %resource.id, group_id = %group_id, "security group created");

        if resource.get_bool("delete_default_rules").unwrap_or(false) {
            let rules = response
                .pointer("/security_group/security_group_rules")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default();
            for rule_id in rules.iter().filter_map(|r| r.get("id").and_then(JsonValue::as_str)) {
                debug!(rule_id, "deleting default rule");
                delete_ignoring_not_found(
                    &vpc,
                    &format!("/v3/{{project_id}}/vpc/security-group-rules/{}", rule_id),
                )
                .await
                .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
            }
        }

        let state = self.read(client, &resource.id, &group_id).await?;
        Ok(carry_flags(state, resource))
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = match client.service("vpc").get(&secgroup_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };
        let group = &body["security_group"];
        let rule_ids: Vec<String> = group
            .get("security_group_rules")
            .and_then(JsonValue::as_array)
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(|r| r.get("id").and_then(JsonValue::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let attributes = Flattener::new(group)
            .field("id")
            .field("name")
            .field("description")
            .field("enterprise_project_id")
            .insert("rule_ids", Value::string_list(rule_ids))
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
        if has_change(changed, "name") || has_change(changed, "description") {
            let mut body = copy_attributes(
                &to.attributes,
                &[("name", "name"), ("description", "description")],
            );
            body.entry("description").or_insert_with(|| json!(""));
            client
                .service("vpc")
                .put(
                    &secgroup_path(identifier),
                    &json!({ "security_group": JsonValue::Object(body) }),
                )
                .await
                .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;
        }

        let state = self.read(client, &to.id, identifier).await?;
        Ok(carry_flags(state, to))
    }

    async fn delete(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
        _timeouts: &Timeouts,
    ) -> ProviderResult<()> {
        delete_ignoring_not_found(&client.service("vpc"), &secgroup_path(identifier))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))
    }
}

/// `delete_default_rules` is create-time only and never returned by the API
fn carry_flags(mut state: State, resource: &Resource) -> State {
    if let Some(flag) = resource.attributes.get("delete_default_rules") {
        state
            .attributes
            .insert("delete_default_rules".to_string(), flag.clone());
    }
    state
}
