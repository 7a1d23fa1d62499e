//! networking_secgroup_rule - Security group rule
//!
//! Rules are immutable: every attribute forces replacement.

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};

use super::{ResourceHandler, delete_ignoring_not_found};
use crate::client::{CloudClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, json_str};

pub struct NetworkingSecgroupRule;

const FIELDS: [(&str, &str); 10] = [
    ("security_group_id", "security_group_id"),
    ("direction", "direction"),
    ("ethertype", "ethertype"),
    ("protocol", "protocol"),
    ("ports", "multiport"),
    ("remote_ip_prefix", "remote_ip_prefix"),
    ("remote_group_id", "remote_group_id"),
    ("action", "action"),
    ("priority", "priority"),
    ("description", "description"),
];

fn rule_path(id: &str) -> String {
    format!("/v3/{{project_id}}/vpc/security-group-rules/{}", id)
}

impl ResourceType for NetworkingSecgroupRule {
    fn name(&self) -> &'static str {
        "networking_secgroup_rule"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("networking_secgroup_rule")
            .attribute(
                AttributeSchema::new("security_group_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("direction", types::string_enum(&["ingress", "egress"]))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("ethertype", types::string_enum(&["IPv4", "IPv6"]))
                    .with_default("IPv4")
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "protocol",
                    types::string_enum(&["tcp", "udp", "icmp", "icmpv6", "gre"]),
                )
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("ports", AttributeType::String)
                    .force_new()
                    .with_provider_name("multiport")
                    .with_description("Port or range list, e.g. \"80,443,8000-8080\""),
            )
            .attribute(AttributeSchema::new("remote_ip_prefix", types::cidr()).force_new())
            .attribute(AttributeSchema::new("remote_group_id", AttributeType::String).force_new())
            .attribute(
                AttributeSchema::new("action", types::string_enum(&["allow", "deny"]))
                    .with_default("allow")
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("priority", types::int_range(1, 100))
                    .with_default(1i64)
                    .force_new(),
            )
            .attribute(AttributeSchema::new("description", types::string_length(0, 255)).force_new())
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
    }
}

#[async_trait]
impl ResourceHandler for NetworkingSecgroupRule {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        if resource.attributes.contains_key("remote_ip_prefix")
            && resource.attributes.contains_key("remote_group_id")
        {
            return Err(ProviderError::validation(
                "remote_ip_prefix and remote_group_id are mutually exclusive",
            )
            .for_resource(resource.id.clone()));
        }

        let body = copy_attributes(&resource.attributes, &FIELDS);
        let response = client
            .service("vpc")
            .post(
                "/v3/{project_id}/vpc/security-group-rules",
                &json!({ "security_group_rule": JsonValue::Object(body) }),
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let rule_id = json_str(&response, "/security_group_rule/id", &resource.id)?.to_string();

        self.read(client, &resource.id, &rule_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = match client.service("vpc").get(&rule_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        let mut flattener = Flattener::new(&body["security_group_rule"]).field("id");
        for (attr, property) in FIELDS {
            flattener = flattener.field_as(attr, property);
        }

        Ok(State::existing(id.clone(), flattener.build()).with_identifier(identifier))
    }

    async fn delete(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
        _timeouts: &Timeouts,
    ) -> ProviderResult<()> {
        delete_ignoring_not_found(&client.service("vpc"), &rule_path(identifier))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_input_forces_replacement() {
        let schema = NetworkingSecgroupRule.schema();
        for (attr, _) in FIELDS {
            assert!(schema.attributes[attr].force_new, "{}", attr);
        }
    }

    #[test]
    fn direction_is_checked() {
        let schema = NetworkingSecgroupRule.schema();
        let rule = Resource::new("networking_secgroup_rule", "ssh")
            .with_attribute("security_group_id", "sg-1")
            .with_attribute("direction", "sideways");
        assert!(schema.validate(&rule.attributes).is_err());
    }
}
