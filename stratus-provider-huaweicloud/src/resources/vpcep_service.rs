//! vpcep_service - VPC endpoint service publishing a backend to other VPCs

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::tags::update_tags;
use super::{ResourceHandler, delete_ignoring_not_found, fetch_status};
use crate::client::{CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, build_tags, copy_attributes, json_str, json_to_value};

pub struct VpcepService;

pub(crate) fn service_path(id: &str) -> String {
    format!("/v1/{{project_id}}/vpc-endpoint-services/{}", id)
}

/// One `{service_port, terminal_port, protocol}` entry
fn port_mapping() -> AttributeType {
    AttributeType::List(Box::new(AttributeType::Custom {
        name: "PortMapping".to_string(),
        validate: |value| {
            let Value::Map(map) = value else {
                return Err("Expected a port mapping map".to_string());
            };
            for key in ["service_port", "terminal_port"] {
                match map.get(key) {
                    Some(Value::Int(p)) if (1..=65535).contains(p) => {}
                    Some(_) => return Err(format!("{} must be a port number", key)),
                    None => return Err(format!("{} is required", key)),
                }
            }
            match map.get("protocol") {
                None => Ok(()),
                Some(Value::String(p)) if p == "TCP" || p == "UDP" => Ok(()),
                Some(_) => Err("protocol must be TCP or UDP".to_string()),
            }
        },
    }))
}

fn ports_body(ports: Option<&[Value]>) -> Vec<JsonValue> {
    ports
        .unwrap_or_default()
        .iter()
        .filter_map(Value::as_map)
        .map(|m| {
            json!({
                "client_port": m.get_int("service_port"),
                "server_port": m.get_int("terminal_port"),
                "protocol": m.get_str("protocol").unwrap_or("TCP"),
            })
        })
        .collect()
}

fn flatten_ports(ports: Option<&JsonValue>) -> Value {
    let items = ports
        .and_then(JsonValue::as_array)
        .map(|ports| {
            ports
                .iter()
                .map(|p| {
                    Value::Map(
                        [
                            ("service_port", p.get("client_port")),
                            ("terminal_port", p.get("server_port")),
                            ("protocol", p.get("protocol")),
                        ]
                        .into_iter()
                        .filter_map(|(k, v)| v.and_then(json_to_value).map(|v| (k.to_string(), v)))
                        .collect(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    Value::List(items)
}

impl ResourceType for VpcepService {
    fn name(&self) -> &'static str {
        "vpcep_service"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("vpcep_service")
            .attribute(
                AttributeSchema::new("name", types::string_length(1, 16))
                    .force_new()
                    .with_provider_name("service_name"),
            )
            .attribute(
                AttributeSchema::new("vpc_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("port_id", AttributeType::String)
                    .required()
                    .with_description("Backend port, load balancer or virtual IP"),
            )
            .attribute(
                AttributeSchema::new("server_type", types::string_enum(&["VM", "VIP", "LB"]))
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("port_mapping", port_mapping()).required())
            .attribute(AttributeSchema::new("approval", AttributeType::Bool).with_default(false))
            .attribute(
                AttributeSchema::new("permissions", types::string_list())
                    .with_description("Whitelisted accounts, e.g. \"iam:domain::abc\" or \"*\""),
            )
            .attribute(AttributeSchema::new("description", types::string_length(0, 128)))
            .attribute(AttributeSchema::new("tags", types::string_map()))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("service_name", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .with_timeouts(Timeouts::uniform(Duration::from_secs(10 * 60)))
    }
}

async fn read_permissions(vpcep: &ServiceClient, id: &str) -> ProviderResult<Vec<String>> {
    let body = vpcep
        .get(&format!("{}/permissions", service_path(id)))
        .await?;
    let mut permissions: Vec<String> = body
        .get("permissions")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|p| p.get("permission").and_then(JsonValue::as_str).map(String::from))
                .collect()
        })
        .unwrap_or_default();
    permissions.sort();
    Ok(permissions)
}

async fn change_permissions(
    vpcep: &ServiceClient,
    id: &str,
    action: &str,
    permissions: &[String],
) -> ProviderResult<()> {
    if permissions.is_empty() {
        return Ok(());
    }
    vpcep
        .post(
            &format!("{}/permissions/action", service_path(id)),
            &json!({"action": action, "permissions": permissions}),
        )
        .await?;
    Ok(())
}

#[async_trait]
impl ResourceHandler for VpcepService {
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
                ("name", "service_name"),
                ("vpc_id", "vpc_id"),
                ("port_id", "port_id"),
                ("server_type", "server_type"),
                ("approval", "approval_enabled"),
                ("description", "description"),
            ],
        );
        body.insert("service_type".to_string(), json!("interface"));
        body.insert(
            "ports".to_string(),
            JsonValue::Array(ports_body(resource.get_list("port_mapping"))),
        );
        if resource.attributes.contains_key("tags") {
            body.insert(
                "tags".to_string(),
                JsonValue::Array(build_tags(resource.attributes.get("tags"))),
            );
        }

        let response = vpcep
            .post("/v1/{project_id}/vpc-endpoint-services", &JsonValue::Object(body))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let service_id = json_str(&response, "/id", &resource.id)?.to_string();
        info!(resource = %resource.id, service_id = %service_id, "endpoint service created");

        let path = service_path(&service_id);
        vpcep
            .state_change_conf(["creating"], ["available"], timeouts.create)
            .wait_for_state(|| fetch_status(&vpcep, &path, "/status"))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;

        let mut permissions = resource.get_string_list("permissions");
        permissions.sort();
        change_permissions(&vpcep, &service_id, "add", &permissions)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        self.read(client, &resource.id, &service_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let vpcep = client.service("vpcep");
        let body = match vpcep.get(&service_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };
        let permissions = read_permissions(&vpcep, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;

        // service_name comes back as "{region}.{name}.{id}"
        let short_name = body
            .get("service_name")
            .and_then(JsonValue::as_str)
            .and_then(|full| full.split('.').nth(1))
            .map(String::from);

        let mut flattener = Flattener::new(&body)
            .field("id")
            .field("service_name")
            .field("vpc_id")
            .field("port_id")
            .field("server_type")
            .field_as("approval", "approval_enabled")
            .field("description")
            .field("status")
            .tags("tags")
            .insert("port_mapping", flatten_ports(body.get("ports")))
            .insert("permissions", Value::string_list(permissions));
        if let Some(name) = short_name {
            flattener = flattener.insert("name", name);
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
        let vpcep = client.service("vpcep");

        let mut body = JsonMap::new();
        if has_change(changed, "approval") {
            body.insert(
                "approval_enabled".to_string(),
                json!(to.get_bool("approval").unwrap_or(false)),
            );
        }
        if has_change(changed, "description") {
            body.insert(
                "description".to_string(),
                json!(to.get_str("description").unwrap_or_default()),
            );
        }
        if has_change(changed, "port_id") {
            body.insert("port_id".to_string(), json!(to.get_str("port_id")));
        }
        if has_change(changed, "port_mapping") {
            body.insert(
                "ports".to_string(),
                JsonValue::Array(ports_body(to.get_list("port_mapping"))),
            );
        }
        if !body.is_empty() {
            vpcep
                .put(&service_path(identifier), &JsonValue::Object(body))
                .await
                .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;
        }

        if has_change(changed, "permissions") {
            let current = read_permissions(&vpcep, identifier)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))?;
            let desired = to.get_string_list("permissions");
            let removed: Vec<String> = current
                .iter()
                .filter(|p| !desired.contains(*p))
                .cloned()
                .collect();
            let added: Vec<String> = desired
                .iter()
                .filter(|p| !current.contains(*p))
                .cloned()
                .collect();
            change_permissions(&vpcep, identifier, "remove", &removed)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))?;
            change_permissions(&vpcep, identifier, "add", &added)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))?;
        }

        if has_change(changed, "tags") {
            let current = self.read(client, &to.id, identifier).await?;
            update_tags(
                &vpcep,
                &service_path(identifier),
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
        let path = service_path(identifier);
        delete_ignoring_not_found(&vpcep, &path)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        vpcep
            .state_change_conf(["deleting", "available"], Vec::<String>::new(), timeouts.delete)
            .wait_for_state(|| fetch_status(&vpcep, &path, "/status"))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        Ok(())
    }
}
