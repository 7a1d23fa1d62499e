//! dms_kafka_topic - Topic of a DMS for Kafka instance
//!
//! Topics have no id of their own; the identifier is `{instance_id}/{name}`.

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::ResourceHandler;
use crate::client::{ClientError, ClientResult, CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, required_int, required_str, split_id, value_to_json};

pub struct DmsKafkaTopic;

const ID_FORMAT: &str = "{instance_id}/{topic}";

/// Codes DMS answers with when the instance itself is gone
const INSTANCE_NOT_FOUND_CODES: &[&str] = &["DMS.00404022", "DMS.00400026"];

/// Pairs of attribute name and topic property, shared by create and update
const SETTINGS: &[(&str, &str)] = &[
    ("aging_time", "retention_time"),
    ("sync_replication", "sync_replication"),
    ("sync_flushing", "sync_message_flush"),
];

fn topics_path(instance_id: &str) -> String {
    format!("/v2/{{project_id}}/instances/{}/topics", instance_id)
}

fn instance_gone(err: ClientError) -> ClientError {
    err.convert_expected_code_to_404(400, INSTANCE_NOT_FOUND_CODES)
}

async fn find_topic(dms: &ServiceClient, instance_id: &str, name: &str) -> ClientResult<Option<JsonValue>> {
    let body = dms.get(&topics_path(instance_id)).await.map_err(instance_gone)?;
    Ok(body
        .get("topics")
        .and_then(JsonValue::as_array)
        .and_then(|topics| {
            topics
                .iter()
                .find(|t| t.get("name").and_then(JsonValue::as_str) == Some(name))
        })
        .cloned())
}

impl ResourceType for DmsKafkaTopic {
    fn name(&self) -> &'static str {
        "dms_kafka_topic"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("dms_kafka_topic")
            .attribute(
                AttributeSchema::new("instance_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("name", types::string_length(3, 200))
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("partitions", types::int_range(1, 200))
                    .with_default(3i64)
                    .with_description("Partition count; can only grow"),
            )
            .attribute(
                AttributeSchema::new("replicas", types::int_range(1, 3))
                    .with_default(3i64)
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("aging_time", types::int_range(1, 720))
                    .with_default(72i64)
                    .with_description("Message retention in hours")
                    .with_provider_name("retention_time"),
            )
            .attribute(AttributeSchema::new("sync_replication", AttributeType::Bool).with_default(false))
            .attribute(
                AttributeSchema::new("sync_flushing", AttributeType::Bool)
                    .with_default(false)
                    .with_provider_name("sync_message_flush"),
            )
    }
}

#[async_trait]
impl ResourceHandler for DmsKafkaTopic {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let instance_id = required_str(resource, "instance_id")?;
        let name = required_str(resource, "name")?;
        let mut body = copy_attributes(&resource.attributes, SETTINGS);
        body.insert("id".to_string(), json!(name));
        body.insert("partition".to_string(), json!(required_int(resource, "partitions")?));
        body.insert("replication".to_string(), json!(required_int(resource, "replicas")?));

        client
            .service("dms")
            .post(&topics_path(instance_id), &JsonValue::Object(body))
            .await
            .map_err(|e| ProviderError::from(instance_gone(e)).for_resource(resource.id.clone()))?;
        info!(resource = %resource.id, instance_id, topic = name, "topic created");

        self.read(client, &resource.id, &format!("{}/{}", instance_id, name))
            .await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let [instance_id, name] =
            split_id::<2>(identifier, ID_FORMAT).map_err(|e| e.for_resource(id.clone()))?;
        let topic = match find_topic(&client.service("dms"), instance_id, name).await {
            Ok(Some(topic)) => topic,
            Ok(None) => return Ok(State::not_found(id.clone())),
            Err(e) => return check_deleted(e, id),
        };

        let attributes = Flattener::new(&topic)
            .insert("instance_id", instance_id)
            .field("name")
            .field_as("partitions", "partition")
            .field_as("replicas", "replication")
            .field_as("aging_time", "retention_time")
            .field("sync_replication")
            .field_as("sync_flushing", "sync_message_flush")
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
        let [instance_id, name] =
            split_id::<2>(identifier, ID_FORMAT).map_err(|e| e.for_resource(to.id.clone()))?;
        let dms = client.service("dms");

        let mut topic = JsonMap::new();
        for (attr, property) in SETTINGS {
            if has_change(changed, attr)
                && let Some(value) = to.attributes.get(*attr)
            {
                topic.insert(property.to_string(), value_to_json(value));
            }
        }
        if has_change(changed, "partitions") {
            let current = self.read(client, &to.id, identifier).await?;
            let wanted = required_int(to, "partitions")?;
            if let Some(existing) = current.get_int("partitions")
                && wanted < existing
            {
                return Err(ProviderError::validation(format!(
                    "partitions can only be increased (from {} to {})",
                    existing, wanted
                ))
                .for_resource(to.id.clone()));
            }
            topic.insert("new_partition_numbers".to_string(), json!(wanted));
        }

        if !topic.is_empty() {
            topic.insert("id".to_string(), json!(name));
            dms.put(&topics_path(instance_id), &json!({"topics": [topic]}))
                .await
                .map_err(|e| ProviderError::from(instance_gone(e)).for_resource(to.id.clone()))?;
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
        let [instance_id, name] =
            split_id::<2>(identifier, ID_FORMAT).map_err(|e| e.for_resource(id.clone()))?;
        let result = client
            .service("dms")
            .post(
                &format!("{}/delete", topics_path(instance_id)),
                &json!({"topics": [name]}),
            )
            .await
            .map_err(instance_gone);

        match result {
            Ok(_) => {
                info!(resource = %id, "topic deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ProviderError::from(e).for_resource(id.clone())),
        }
    }

    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        let [instance_id, name] = split_id::<2>(import_id, ID_FORMAT)?;
        Ok(format!("{}/{}", instance_id, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiError;

    #[test]
    fn settings_use_api_property_names() {
        let topic = Resource::new("dms_kafka_topic", "orders")
            .with_attribute("aging_time", 24i64)
            .with_attribute("sync_flushing", true);
        let body = copy_attributes(&topic.attributes, SETTINGS);
        assert_eq!(body["retention_time"], 24);
        assert_eq!(body["sync_message_flush"], true);
        assert!(!body.contains_key("sync_replication"));
    }

    #[test]
    fn instance_not_found_is_remapped() {
        let err = ClientError::Api(ApiError::from_response(
            "GET",
            "https://dms/x",
            400,
            r#"{"error_code":"DMS.00404022","error_msg":"instance does not exist"}"#,
        ));
        assert!(instance_gone(err).is_not_found());
    }

    #[test]
    fn import_id_names_instance_and_topic() {
        assert_eq!(DmsKafkaTopic.import_identifier("i-1/orders").unwrap(), "i-1/orders");
        let err = DmsKafkaTopic.import_identifier("orders").unwrap_err();
        assert!(err.message.contains(ID_FORMAT));
    }
}
