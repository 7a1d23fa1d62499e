//! evs_volume - Elastic Volume Service disk

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::{ResourceHandler, delete_ignoring_not_found, fetch_status};
use crate::client::jobs::job_id;
use crate::client::{CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, required_int, value_to_json};

pub struct EvsVolume;

fn volume_path(id: &str) -> String {
    format!("/v2/{{project_id}}/cloudvolumes/{}", id)
}

impl ResourceType for EvsVolume {
    fn name(&self) -> &'static str {
        "evs_volume"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("evs_volume")
            .attribute(
                AttributeSchema::new("availability_zone", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new(
                    "volume_type",
                    types::string_enum(&["SATA", "SAS", "GPSSD", "SSD", "ESSD", "GPSSD2", "ESSD2"]),
                )
                .required()
                .force_new(),
            )
            .attribute(
                AttributeSchema::new("size", types::int_range(10, 32768))
                    .required()
                    .with_description("Size in GB; volumes can only grow"),
            )
            .attribute(AttributeSchema::new("name", types::string_length(0, 64)))
            .attribute(AttributeSchema::new("description", types::string_length(0, 85)))
            .attribute(
                AttributeSchema::new("multiattach", AttributeType::Bool)
                    .with_default(false)
                    .force_new(),
            )
            .attribute(AttributeSchema::new("tags", types::string_map()))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .with_timeouts(Timeouts::new(
                Duration::from_secs(10 * 60),
                Duration::from_secs(3 * 60),
                Duration::from_secs(3 * 60),
            ))
    }
}

async fn wait_for_available(evs: &ServiceClient, id: &str, timeout: Duration) -> ProviderResult<()> {
    let path = volume_path(id);
    evs.state_change_conf(["creating", "extending"], ["available", "in-use"], timeout)
        .wait_for_state(|| fetch_status(evs, &path, "/volume/status"))
        .await?;
    Ok(())
}

#[async_trait]
impl ResourceHandler for EvsVolume {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let evs = client.service("evs");
        let mut volume = copy_attributes(
            &resource.attributes,
            &[
                ("availability_zone", "availability_zone"),
                ("volume_type", "volume_type"),
                ("size", "size"),
                ("name", "name"),
                ("description", "description"),
                ("multiattach", "multiattach"),
            ],
        );
        if let Some(tags) = resource.attributes.get("tags") {
            volume.insert("tags".to_string(), value_to_json(tags));
        }

        let response = evs
            .post(
                "/v2.1/{project_id}/cloudvolumes",
                &json!({ "volume": JsonValue::Object(volume) }),
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let job = job_id(&response).map_err(|e| e.for_resource(resource.id.clone()))?;

        let entities = evs
            .wait_for_job(&job, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        let volume_id = entities
            .get("volume_id")
            .and_then(JsonValue::as_str)
            .map(String::from)
            .ok_or_else(|| {
                ProviderError::new(format!("job {} returned no volume_id", job))
                    .for_resource(resource.id.clone())
            })?;
        info!(resource = %resource.id, volume_id = %volume_id, "volume created");

        wait_for_available(&evs, &volume_id, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        self.read(client, &resource.id, &volume_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = match client.service("evs").get(&volume_path(identifier)).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };

        let attributes = Flattener::new(&body["volume"])
            .field("id")
            .field("name")
            .field("description")
            .field("availability_zone")
            .field("volume_type")
            .field("size")
            .field("status")
            .field("multiattach")
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
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let evs = client.service("evs");

        if has_change(changed, "size") {
            let current = self.read(client, &to.id, identifier).await?;
            let new_size = required_int(to, "size")?;
            if let Some(old_size) = current.get_int("size")
                && new_size < old_size
            {
                return Err(ProviderError::validation(format!(
                    "volumes cannot shrink (from {} GB to {} GB)",
                    old_size, new_size
                ))
                .for_resource(to.id.clone()));
            }

            let response = evs
                .post(
                    &format!("/v2.1/{{project_id}}/cloudvolumes/{}/action", identifier),
                    &json!({"os-extend": {"new_size": new_size}}),
                )
                .await
                .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;
            let job = job_id(&response).map_err(|e| e.for_resource(to.id.clone()))?;
            evs.wait_for_job(&job, timeouts.update)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))?;
            wait_for_available(&evs, identifier, timeouts.update)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))?;
        }

        if has_change(changed, "name") || has_change(changed, "description") {
            let mut volume = copy_attributes(&to.attributes, &[("name", "name")]);
            volume.insert(
                "description".to_string(),
                json!(to.get_str("description").unwrap_or_default()),
            );
            evs.put(
                &volume_path(identifier),
                &json!({ "volume": JsonValue::Object(volume) }),
            )
            .await
            .map_err(|e| ProviderError::from(e).for_resource(to.id.clone()))?;
        }

        if has_change(changed, "tags") {
            let tags = to
                .attributes
                .get("tags")
                .cloned()
                .unwrap_or(Value::Map(Default::default()));
            evs.put(
                &format!("/v2/{{project_id}}/cloudvolumes/{}/tags", identifier),
                &json!({ "tags": value_to_json(&tags) }),
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
        let evs = client.service("evs");
        let path = volume_path(identifier);
        delete_ignoring_not_found(&evs, &path)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        evs.state_change_conf(["deleting", "available"], Vec::<String>::new(), timeouts.delete)
            .wait_for_state(|| fetch_status(&evs, &path, "/volume/status"))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;
        info!(resource = %id, "volume deleted");
        Ok(())
    }
}
