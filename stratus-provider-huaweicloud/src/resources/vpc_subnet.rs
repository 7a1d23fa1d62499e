//! vpc_subnet - Subnet inside a VPC

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::{ResourceHandler, delete_ignoring_not_found, fetch_status};
use crate::client::{CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, json_str, required_str};

pub struct VpcSubnet;

const UPDATABLE: [(&str, &str); 5] = [
    ("name", "name"),
    ("description", "description"),
    ("dhcp_enable", "dhcp_enable"),
    ("primary_dns", "primary_dns"),
    ("secondary_dns", "secondary_dns"),
];

fn subnet_path(id: &str) -> String {
    format!("/v1/{{project_id}}/subnets/{}", id)
}

fn nested_path(vpc_id: &str, id: &str) -> String {
    format!("/v1/{{project_id}}/vpcs/{}/subnets/{}", vpc_id, id)
}

impl ResourceType for VpcSubnet {
    fn name(&self) -> &'static str {
        "vpc_subnet"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("vpc_subnet")
            .attribute(AttributeSchema::new("name", types::string_length(1, 64)).required())
            .attribute(
                AttributeSchema::new("cidr", types::cidr())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("gateway_ip", types::ipv4())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("vpc_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("dhcp_enable", AttributeType::Bool).with_default(true))
            .attribute(AttributeSchema::new("primary_dns", types::ipv4()).optional_computed())
            .attribute(AttributeSchema::new("secondary_dns", types::ipv4()).optional_computed())
            .attribute(AttributeSchema::new("description", types::string_length(0, 255)))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
    }
}

async fn wait_for_active(subnets: &ServiceClient, id: &str, timeout: Duration) -> ProviderResult<()> {
    let path = subnet_path(id);
    subnets
        .state_change_conf(["UNKNOWN"], ["ACTIVE"], timeout)
        .wait_for_state(|| fetch_status(subnets, &path, "/subnet/status"))
        .await?;
    Ok(())
}

#[async_trait]
impl ResourceHandler for VpcSubnet {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let vpc = client.service("vpc");
        let mut body = copy_attributes(
            &resource.attributes,
            &[
                ("cidr", "cidr"),
                ("gateway_ip", "gateway_ip"),
                ("vpc_id", "vpc_id"),
                ("availability_zone", "availability_zone"),
            ],
        );
        body.extend(copy_attributes(&resource.attributes, &UPDATABLE));

        let response = vpc
            .post("/v1/{project_id}/subnets", &json!({ "subnet": JsonValue::Object(body) }))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let subnet_id = json_str(&response, "/subnet/id", &resource.id)?.to_string();
        info!(resource = %resource.id, subnet_id = %subnet_id, "subnet created, waiting for ACTIVE");

        wait_for_active(&vpc, &subnet_id, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        self.read(client, &resource.id, &subnet_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = match client.service("vpc").get(&subnet_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        let attributes = Flattener::new(&body["subnet"])
            .field("id")
            .field("name")
            .field("cidr")
            .field("gateway_ip")
            .field("vpc_id")
            .field("availability_zone")
            .field("dhcp_enable")
            .field("primary_dns")
            .field("secondary_dns")
            .field("description")
            .field("status")
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
        let vpc_id = required_str(to, "vpc_id")?;
        let vpc = client.service("vpc");

        if UPDATABLE.iter().any(|(attr, _)| has_change(changed, attr)) {
            // name is always sent; the API rejects updates without it
            let mut body = copy_attributes(&to.attributes, &[("name", "name")]);
            let changed_fields: Vec<(&str, &str)> = UPDATABLE
                .iter()
                .copied()
                .filter(|(attr, _)| has_change(changed, attr))
                .collect();
            body.extend(copy_attributes(&to.attributes, &changed_fields));
            if has_change(changed, "description") {
                body.entry("description").or_insert_with(|| json!(""));
            }

            vpc.put(
                &nested_path(vpc_id, identifier),
                &json!({ "subnet": JsonValue::Object(body) }),
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;

            wait_for_active(&vpc, identifier, timeouts.update)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))?;
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
        let current = self.read(client, id, identifier).await?;
        if !current.exists {
            return Ok(());
        }
        let vpc_id = current.get_str("vpc_id").ok_or_else(|| {
            ProviderError::new("subnet has no vpc_id").for_resource(id.clone())
        })?;

        let vpc = client.service("vpc");
        delete_ignoring_not_found(&vpc, &nested_path(vpc_id, identifier))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        let path = subnet_path(identifier);
        vpc.state_change_conf(["ACTIVE", "UNKNOWN"], Vec::<String>::new(), timeouts.delete)
            .wait_for_state(|| fetch_status(&vpc, &path, "/subnet/status"))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        Ok(())
    }
}
