//! rds_backup - Manual backup of an RDS instance
//!
//! Backups are only listed per instance, so the identifier is
//! `{instance_id}/{backup_id}`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Attributes, Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, Timeouts, types};
use tracing::info;

use super::{ResourceHandler, delete_ignoring_not_found};
use crate::client::{ClientResult, CloudClient, ServiceClient, check_deleted};
use crate::utils::{Flattener, copy_attributes, json_str, required_str, split_id};

pub struct RdsBackup;

const ID_FORMAT: &str = "{instance_id}/{backup_id}";

/// The backup from the instance's backup list, if it still exists
async fn find_backup(
    rds: &ServiceClient,
    instance_id: &str,
    backup_id: &str,
) -> ClientResult<Option<JsonValue>> {
    let body = rds
        .get_with_query(
            "/v3/{project_id}/backups",
            &[("instance_id", instance_id), ("backup_id", backup_id)],
        )
        .await?;
    Ok(body
        .get("backups")
        .and_then(JsonValue::as_array)
        .and_then(|items| {
            items
                .iter()
                .find(|b| b.get("id").and_then(JsonValue::as_str) == Some(backup_id))
        })
        .cloned())
}

async fn wait_for_backup(
    rds: &ServiceClient,
    instance_id: &str,
    backup_id: &str,
    pending: &[&str],
    target: &[&str],
    timeout: Duration,
) -> ProviderResult<()> {
    rds.state_change_conf(pending.to_vec(), target.to_vec(), timeout)
        .wait_for_state(|| async {
            let backup = find_backup(rds, instance_id, backup_id).await?;
            Ok::<_, ProviderError>(backup.map(|b| {
                let status = b
                    .get("status")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                (b, status)
            }))
        })
        .await?;
    Ok(())
}

impl ResourceType for RdsBackup {
    fn name(&self) -> &'static str {
        "rds_backup"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("rds_backup")
            .attribute(
                AttributeSchema::new("instance_id", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("name", types::string_length(4, 64))
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("description", types::string_length(0, 256)).force_new())
            .attribute(
                AttributeSchema::new("databases", types::string_list())
                    .force_new()
                    .with_description("Databases to back up (SQL Server only)"),
            )
            .attribute(AttributeSchema::new("id", AttributeType::String).computed())
            .attribute(AttributeSchema::new("status", AttributeType::String).computed())
            .attribute(AttributeSchema::new("size", AttributeType::Int).computed())
            .attribute(AttributeSchema::new("begin_time", AttributeType::String).computed())
            .attribute(AttributeSchema::new("end_time", AttributeType::String).computed())
            .with_timeouts(Timeouts::new(
                Duration::from_secs(30 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(10 * 60),
            ))
    }
}

#[async_trait]
impl ResourceHandler for RdsBackup {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        let rds = client.service("rds");
        let instance_id = required_str(resource, "instance_id")?;
        let mut backup = copy_attributes(
            &resource.attributes,
            &[
                ("instance_id", "instance_id"),
                ("name", "name"),
                ("description", "description"),
            ],
        );
        let databases = resource.get_string_list("databases");
        if !databases.is_empty() {
            let names: Vec<JsonValue> = databases.iter().map(|d| json!({"name": d})).collect();
            backup.insert("databases".to_string(), JsonValue::Array(names));
        }

        let response = rds
            .post("/v3/{project_id}/backups", &json!({ "backup": backup }))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;
        let backup_id = json_str(&response, "/backup/id", &resource.id)?.to_string();
        info!(resource = %resource.id, backup_id = %backup_id, "backup started");

        wait_for_backup(&rds, instance_id, &backup_id, &["BUILDING"], &["COMPLETED"], timeouts.create)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;

        self.read(client, &resource.id, &format!("{}/{}", instance_id, backup_id))
            .await
    }

    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let [instance_id, backup_id] =
            split_id::<2>(identifier, ID_FORMAT).map_err(|e| e.for_resource(id.clone()))?;
        let backup = match find_backup(&client.service("rds"), instance_id, backup_id).await {
            Ok(Some(backup)) => backup,
            Ok(None) => return Ok(State::not_found(id.clone())),
            Err(e) => return check_deleted(e, id),
        };

        let databases: Vec<String> = backup
            .get("databases")
            .and_then(JsonValue::as_array)
            .map(|dbs| {
                dbs.iter()
                    .filter_map(|d| d.get("name").and_then(JsonValue::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut flattener = Flattener::new(&backup)
            .field("id")
            .field("instance_id")
            .field("name")
            .field("description")
            .field("status")
            .field("size")
            .field("begin_time")
            .field("end_time");
        if !databases.is_empty() {
            flattener = flattener.insert("databases", Value::string_list(databases));
        }

        Ok(State::existing(id.clone(), flattener.build()).with_identifier(identifier))
    }

    async fn delete(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
        timeouts: &Timeouts,
    ) -> ProviderResult<()> {
        let [instance_id, backup_id] =
            split_id::<2>(identifier, ID_FORMAT).map_err(|e| e.for_resource(id.clone()))?;
        let rds = client.service("rds");
        delete_ignoring_not_found(&rds, &format!("/v3/{{project_id}}/backups/{}", backup_id))
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        wait_for_backup(
            &rds,
            instance_id,
            backup_id,
            &["COMPLETED", "DELETING", "BUILDING"],
            &[],
            timeouts.delete,
        )
        .await
        .map_err(|e| e.for_resource(id.clone()))?;
        info!(resource = %id, "backup deleted");
        Ok(())
    }

    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        let [instance_id, backup_id] = split_id::<2>(import_id, ID_FORMAT)?;
        Ok(format!("{}/{}", instance_id, backup_id))
    }
}
