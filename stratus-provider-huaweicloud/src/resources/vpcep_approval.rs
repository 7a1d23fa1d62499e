//! vpcep_approval - Accept or reject endpoint connections to a service
//!
//! The identifier is the endpoint service id. Read reports the accepted
//! endpoints, so a connection rejected out of band shows up as drift.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::ResourceHandler;
use super::vpcep_service::service_path;
use crate::client::{CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, required_str};

pub struct VpcepApproval;

const ACCEPTED: &str = "accepted";
const REJECTED: &str = "rejected";

impl ResourceType for VpcepApproval {
    fn name(&self) -> &'static str {
        "vpcep_approval"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("vpcep_approval")
            .attribute(
                AttributeSchema::new("service_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("endpoints", types::string_list())
                    .required()
                    .with_description("Endpoint ids to accept"),
            )
            .attribute(
                AttributeSchema::new(
                    "connections",
                    AttributeType::List(Box::new(types::string_map())),
                )
                .computed(),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .with_timeouts(Timeouts::uniform(Duration::from_secs(10 * 60)))
    }
}

/// Collapse the statuses of `endpoints` into one: `target` once every one has
/// reached it, otherwise the first status that differs
fn aggregate_status(connections: &JsonValue, endpoints: &[String], target: &str) -> String {
    let statuses: Vec<(&str, &str)> = connections
        .get("connections")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| {
                    Some((
                        c.get("id")?.as_str()?,
                        c.get("status").and_then(JsonValue::as_str).unwrap_or_default(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    for endpoint in endpoints {
        match statuses.iter().find(|(id, _)| *id == endpoint.as_str()) {
            Some((_, status)) if *status == target => {}
            // a rejected endpoint may disappear from the list entirely
            None if target == REJECTED => {}
            Some((_, status)) => return status.to_string(),
            None => return "creating".to_string(),
        }
    }
    target.to_string()
}

async fn act_and_wait(
    vpcep: &ServiceClient,
    service_id: &str,
    endpoints: &[String],
    accept: bool,
    timeout: Duration,
) -> ProviderResult<()> {
    if endpoints.is_empty() {
        return Ok(());
    }
    let (action, target, pending) = if accept {
        ("receive", ACCEPTED, vec!["pendingAcceptance", "creating"])
    } else {
        ("reject", REJECTED, vec!["pendingAcceptance", "accepted", "creating"])
    };
    let connections = format!("{}/connections", service_path(service_id));

    vpcep
        .post(
            &format!("{}/action", connections),
            &json!({"action": action, "endpoints": endpoints}),
        )
        .await?;
    info!(service_id, action, count = endpoints.len(), "updating endpoint connections");

    vpcep
        .state_change_conf(pending, [target], timeout)
        .wait_for_state(|| async {
            let body = vpcep.get(&connections).await?;
            let status = aggregate_status(&body, endpoints, target);
            Ok::<_, ProviderError>(Some(((), status)))
        })
        .await?;
    Ok(())
}

#[async_trait]
impl ResourceHandler for VpcepApproval {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let service_id = required_str(resource, "service_id")?;
        let endpoints = resource.get_string_list("endpoints");

        act_and_wait(&client.service("vpcep"), service_id, &endpoints, true, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        self.read(client, &resource.id, service_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let path = format!("{}/connections", service_path(identifier));
        let body = match client.service("vpcep").get(&path).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        let items = body
            .get("connections")
            .and_then(JsonValue::as_array)
            .cloned()
            .unwrap_or_default();
        let mut accepted: Vec<String> = items
            .iter()
            .filter(|c| c.get("status").and_then(JsonValue::as_str) == Some(ACCEPTED))
            .filter_map(|c| c.get("id").and_then(JsonValue::as_str).map(String::from))
            .collect();
        accepted.sort();

        let connections: Vec<Value> = items
            .iter()
            .map(|c| {
                let c = Flattener::new(c)
                    .field_as("endpoint_id", "id")
                    .field("status")
                    .field("domain_id")
                    .field("marker_id")
                    .build();
                Value::Map(
                    c.into_iter()
                        .map(|(k, v)| match v {
                            Value::Int(i) => (k, Value::String(i.to_string())),
                            other => (k, other),
                        })
                        .collect(),
                )
            })
            .collect();

        let mut attributes = HashMap::new();
        attributes.insert("id".to_string(), Value::from(identifier));
        attributes.insert("service_id".to_string(), Value::from(identifier));
        attributes.insert("endpoints".to_string(), Value::string_list(accepted));
        attributes.insert("connections".to_string(), Value::List(connections));

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        client: &CloudClient,
        identifier: &str,
        to: &Resource,
        _changed: &[String],
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let current = self.read(client, &to.id, identifier).await?;
        let accepted = current.get_string_list("endpoints");
        let desired = to.get_string_list("endpoints");

        let added: Vec<String> = desired
            .iter()
            .filter(|e| !accepted.contains(*e))
            .cloned()
            .collect();
        let removed: Vec<String> = accepted
            .iter()
            .filter(|e| !desired.contains(*e))
            .cloned()
            .collect();

        let vpcep = client.service("vpcep");
        act_and_wait(&vpcep, identifier, &added, true, timeouts.update)
            .await
            .map_err(|e| e.for_resource(to.id.clone()))?;
        act_and_wait(&vpcep, identifier, &removed, false, timeouts.update)
            .await
            .map_err(|e| e.for_resource(to.id.clone()))?;

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
        let accepted = current.get_string_list("endpoints");
        act_and_wait(&client.service("vpcep"), identifier, &accepted, false, timeouts.delete)
            .await
            .map_err(|e| e.for_resource(id.clone()))
    }
}
