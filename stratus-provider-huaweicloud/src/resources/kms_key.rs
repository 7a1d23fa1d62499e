//! kms_key - KMS customer master key
//!
//! The KMS API is action based: every call is a POST naming the key in the
//! body. Keys are never removed immediately; delete schedules the deletion
//! and a key pending deletion reads as gone.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::differ::has_change;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::{info, warn};

use super::ResourceHandler;
use super::tags::{read_tags, update_tags};
use crate::client::{ClientError, ClientResult, CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, json_str, required_str};

pub struct KmsKey;

const KEY_PENDING_ACTIVATION: &str = "1";
pub(crate) const KEY_ENABLED: &str = "2";
pub(crate) const KEY_DISABLED: &str = "3";
pub(crate) const KEY_PENDING_DELETION: &str = "4";

/// Shortest waiting period KMS accepts before a scheduled deletion completes
const PENDING_DAYS: u32 = 7;

/// Error codes KMS answers with (HTTP 400) for an unknown key id
const KEY_NOT_FOUND_CODES: &[&str] = &["KMS.0205", "KMS.0207"];

fn action_path(action: &str) -> String {
    format!("/v1.0/{{project_id}}/kms/{}", action)
}

fn key_path(key_id: &str) -> String {
    format!("/v1.0/{{project_id}}/kms/{}", key_id)
}

pub(crate) async fn describe_key(kms: &ServiceClient, key_id: &str) -> ClientResult<JsonValue> {
    kms.post(&action_path("describe-key"), &json!({"key_id": key_id}))
        .await
        .map_err(|e| e.convert_expected_code_to_404(400, KEY_NOT_FOUND_CODES))
}

async fn key_action(kms: &ServiceClient, action: &str, body: JsonValue) -> ClientResult<()> {
    kms.post(&action_path(action), &body).await.map(|_| ())
}

impl ResourceType for KmsKey {
    fn name(&self) -> &'static str {
        "kms_key"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("kms_key")
            .attribute(AttributeSchema::new("key_alias", types::string_length(1, 255)).required())
            .attribute(AttributeSchema::new("key_description", types::string_length(0, 255)))
            .attribute(
                AttributeSchema::new(
                    "key_algorithm",
                    types::string_enum(&["AES_256", "SM4", "RSA_2048", "RSA_3072", "RSA_4096", "EC_P256", "EC_P384"]),
                )
                .with_default("AES_256")
                .force_new()
                .with_provider_name("key_spec"),
            )
            .attribute(
                AttributeSchema::new("key_usage", AttributeType::String)
                    .optional_computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("is_enabled", AttributeType::Bool).with_default(true))
            .attribute(AttributeSchema::new("tags", types::string_map()))
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("key_state", AttributeType::String).computed())
            .attribute(AttributeSchema::new("domain_id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("creation_date", AttributeType::String).computed())
            .with_timeouts(Timeouts::uniform(Duration::from_secs(10 * 60)))
    }
}

async fn set_enabled(kms: &ServiceClient, key_id: &str, enabled: bool, timeout: Duration) -> ProviderResult<()> {
    let (action, target, pending) = if enabled {
        ("enable-key", KEY_ENABLED, KEY_DISABLED)
    } else {
        ("disable-key", KEY_DISABLED, KEY_ENABLED)
    };
    key_action(kms, action, json!({"key_id": key_id})).await?;
    wait_for_key_state(kms, key_id, pending, target, timeout).await
}

async fn wait_for_key_state(
    kms: &ServiceClient,
    key_id: &str,
    pending: &str,
    target: &str,
    timeout: Duration,
) -> ProviderResult<()> {
    kms.state_change_conf([pending], [target], timeout)
        .wait_for_state(|| async {
            let body = describe_key(kms, key_id).await?;
            let state = body
                .pointer("/key_info/key_state")
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            Ok::<_, ProviderError>(Some(((), state)))
        })
        .await?;
    Ok(())
}

#[async_trait]
impl ResourceHandler for KmsKey {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let kms = client.service("kms");
        let body = copy_attributes(
            &resource.attributes,
            &[
                ("key_alias", "key_alias"),
                ("key_description", "key_description"),
                ("key_algorithm", "key_spec"),
                ("key_usage", "key_usage"),
            ],
        );

        let response = kms
            .post(&action_path("create-key"), &JsonValue::Object(body))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let key_id = json_str(&response, "/key_info/key_id", &resource.id)?.to_string();
        info!(resource = %resource.id, key_id = %key_id, "key created");

        wait_for_key_state(&kms, &key_id, KEY_PENDING_ACTIVATION, KEY_ENABLED, timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        if resource.get_bool("is_enabled") == Some(false) {
            set_enabled(&kms, &key_id, false, timeouts.create)
                .await
                .map_err(|e| e.for_resource(resource.id.clone()))?;
        }
        if resource.attributes.contains_key("tags") {
            update_tags(&kms, &key_path(&key_id), None, resource.attributes.get("tags"))
                .await
                .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        }

        self.read(client, &resource.id, &key_id).await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let kms = client.service("kms");
        let body = match describe_key(&kms, identifier).await {
            Ok(body) => body,
            Err(e) => return check_deleted(e, id),
        };
        let info = &body["key_info"];

        let key_state = info.get("key_state").and_then(JsonValue::as_str);
        if key_state == Some(KEY_PENDING_DELETION) {
            warn!(resource = %id, key_id = identifier, "key is pending deletion, treating as deleted");
            return Ok(State::not_found(id.clone()));
        }

        let tags = match read_tags(&kms, &key_path(identifier)).await {
            Ok(tags) => tags,
            Err(e) if e.is_not_found() => Default::default(),
            Err(e) => return Err(ProviderError::from(e).for_resource(id.clone())),
        };

        let attributes = Flattener::new(info)
            .field_as("id", "key_id")
            .field("key_alias")
            .field("key_description")
            .field_as("key_algorithm", "key_spec")
            .field("key_usage")
            .field("key_state")
            .field("domain_id")
            .field("creation_date")
            .insert("is_enabled", key_state == Some(KEY_ENABLED))
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
        let kms = client.service("kms");
        let fail = |e: ClientError| ProviderError::from(e).for_resource(to.id.clone());

        if has_change(changed, "key_alias") {
            key_action(
                &kms,
                "update-key-alias",
                json!({"key_id": identifier, "key_alias": required_str(to, "key_alias")?}),
            )
            .await
            .map_err(fail)?;
        }
        if has_change(changed, "key_description") {
            key_action(
                &kms,
                "update-key-description",
                json!({
                    "key_id": identifier,
                    "key_description": to.get_str("key_description").unwrap_or_default(),
                }),
            )
            .await
            .map_err(fail)?;
        }
        if has_change(changed, "is_enabled") {
            set_enabled(&kms, identifier, to.get_bool("is_enabled").unwrap_or(true), timeouts.update)
                .await
                .map_err(|e| e.for_resource(to.id.clone()))?;
        }
        if has_change(changed, "tags") {
            let current = read_tags(&kms, &key_path(identifier)).await.map_err(fail)?;
            update_tags(
                &kms,
                &key_path(identifier),
                Some(&Value::Map(current)),
                to.attributes.get("tags"),
            )
            .await
            .map_err(fail)?;
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
        let kms = client.service("kms");
        // the API takes the number of days as a string
        let body = json!({"key_id": identifier, "pending_days": PENDING_DAYS.to_string()});

        match key_action(&kms, "schedule-key-deletion", body).await {
            Ok(()) => {
                info!(resource = %id, key_id = identifier, "key deletion scheduled");
                Ok(())
            }
            Err(e) => {
                let e = e.convert_expected_code_to_404(400, KEY_NOT_FOUND_CODES);
                if e.is_not_found() {
                    Ok(())
                } else {
                    Err(ProviderError::from(e).for_resource(id.clone()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_maps_to_key_spec() {
        let schema = KmsKey.schema();
        assert_eq!(
            schema.attributes["key_algorithm"].provider_name.as_deref(),
            Some("key_spec")
        );
        assert!(schema.requires_replacement(&["key_algorithm".to_string()]));
        assert!(!schema.requires_replacement(&["key_alias".to_string(), "is_enabled".to_string()]));
    }

    #[test]
    fn alias_is_required() {
        let schema = KmsKey.schema();
        let key = Resource::new("kms_key", "k").with_attribute("key_description", "no alias");
        assert!(schema.validate(&key.attributes).is_err());
    }
}
