//! Huawei Cloud Provider implementation
//!
//! Dispatches engine requests to the resource and data source handlers and
//! applies the rules every handler shares: schema defaults and validation,
//! timeout overrides, in-place update checks and carrying sensitive inputs
//! the API never echoes back.

use std::collections::HashMap;

use stratus_core::differ::changed_attributes;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::{ResourceSchema, TypeError};
use tracing::{debug, info};

use crate::client::{ClientError, CloudClient};
use crate::config::ProviderConfig;
use crate::data_sources::{self, DataSourceHandler};
use crate::resources::{self, ResourceHandler};

/// Huawei Cloud Provider
pub struct HuaweiCloudProvider {
    client: CloudClient,
    resources: HashMap<&'static str, Box<dyn ResourceHandler>>,
    data_sources: HashMap<&'static str, Box<dyn DataSourceHandler>>,
}

impl HuaweiCloudProvider {
    /// Create a provider from a complete configuration
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = CloudClient::new(config).map_err(ProviderError::from)?;
        Ok(Self {
            client,
            resources: resources::handlers().into_iter().map(|h| (h.name(), h)).collect(),
            data_sources: data_sources::handlers()
                .into_iter()
                .map(|h| (h.name(), h))
                .collect(),
        })
    }

    /// Create a provider from its configuration block, falling back to `HW_*` variables
    pub fn from_attributes(attrs: &HashMap<String, Value>) -> ProviderResult<Self> {
        let config = ProviderConfig::from_attributes(attrs)
            .map_err(|e| ProviderError::from(ClientError::from(e)))?
            .with_env_defaults();
        Self::new(config)
    }

    pub fn client(&self) -> &CloudClient {
        &self.client
    }

    fn resource_handler(&self, id: &ResourceId) -> ProviderResult<&dyn ResourceHandler> {
        self.resources
            .get(id.resource_type.as_str())
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::unsupported(format!("unknown resource type '{}'", id.resource_type))
                    .for_resource(id.clone())
            })
    }

    fn data_source_handler(&self, id: &ResourceId) -> ProviderResult<&dyn DataSourceHandler> {
        self.data_sources
            .get(id.resource_type.as_str())
            .map(|h| h.as_ref())
            .ok_or_else(|| {
                ProviderError::unsupported(format!("unknown data source '{}'", id.resource_type))
                    .for_resource(id.clone())
            })
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    pub async fn create_resource(&self, resource: Resource) -> ProviderResult<State> {
        let handler = self.resource_handler(&resource.id)?;
        let schema = handler.schema();
        let resource = prepare(&schema, resource)?;
        let timeouts = schema
            .timeouts_for(&resource.attributes)
            .map_err(|e| invalid(&resource.id, vec![e]))?;

        info!(resource = %resource.id, "creating");
        let mut state = handler.create(&self.client, &resource, &timeouts).await?;
        carry_sensitive(&schema, &resource, &mut state);
        info!(resource = %resource.id, identifier = ?state.identifier, "created");
        Ok(state)
    }

    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let handler = self.resource_handler(id)?;
        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };
        handler.read(&self.client, id, identifier).await
    }

    pub async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: Resource,
    ) -> ProviderResult<State> {
        let handler = self.resource_handler(id)?;
        let schema = handler.schema();
        let to = prepare(&schema, to)?;
        let timeouts = schema
            .timeouts_for(&to.attributes)
            .map_err(|e| invalid(id, vec![e]))?;

        let changed = changed_attributes(&to.attributes, &from.attributes, &schema);
        let replace = schema.replacement_attributes(&changed);
        if !replace.is_empty() {
            return Err(ProviderError::validation(format!(
                "cannot update {} in place; the resource must be replaced",
                replace.join(", ")
            ))
            .for_resource(id.clone()));
        }

        let mut state = if changed.is_empty() {
            debug!(resource = %id, "no attribute changes");
            handler.read(&self.client, id, identifier).await?
        } else {
            info!(resource = %id, changed = ?changed, "updating");
            handler
                .update(&self.client, identifier, &to, &changed, &timeouts)
                .await?
        };
        carry_sensitive(&schema, &to, &mut state);
        Ok(state)
    }

    /// Delete with the schema's default timeouts; a deletion has no declared attributes
    pub async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let handler = self.resource_handler(id)?;
        let timeouts = handler.schema().timeouts;
        info!(resource = %id, identifier, "deleting");
        handler.delete(&self.client, id, identifier, &timeouts).await?;
        info!(resource = %id, "deleted");
        Ok(())
    }

    pub async fn import_resource(&self, id: &ResourceId, import_id: &str) -> ProviderResult<State> {
        let handler = self.resource_handler(id)?;
        let identifier = handler
            .import_identifier(import_id)
            .map_err(|e| e.for_resource(id.clone()))?;

        let state = handler.read(&self.client, id, &identifier).await?;
        if !state.exists {
            return Err(ProviderError::not_found(format!(
                "cannot import non-existent remote object '{}'",
                import_id
            ))
            .for_resource(id.clone()));
        }
        info!(resource = %id, identifier = %identifier, "imported");
        Ok(state)
    }

    // =========================================================================
    // Data Sources
    // =========================================================================

    pub async fn read_data_source_query(&self, query: Resource) -> ProviderResult<State> {
        let handler = self.data_source_handler(&query.id)?;
        let query = prepare(&handler.schema(), query)?;
        debug!(data_source = %query.id, "querying");
        handler.read(&self.client, &query).await
    }
}

/// Apply schema defaults and validate the declared attributes
fn prepare(schema: &ResourceSchema, mut resource: Resource) -> ProviderResult<Resource> {
    schema.apply_defaults(&mut resource.attributes);
    schema
        .validate(&resource.attributes)
        .map_err(|errors| invalid(&resource.id, errors))?;
    Ok(resource)
}

fn invalid(id: &ResourceId, errors: Vec<TypeError>) -> ProviderError {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    ProviderError::validation(messages.join("; ")).for_resource(id.clone())
}

/// Copy sensitive inputs into the state when the API did not return them
fn carry_sensitive(schema: &ResourceSchema, desired: &Resource, state: &mut State) {
    if !state.exists {
        return;
    }
    for (name, attr) in &schema.attributes {
        if !attr.sensitive || state.attributes.contains_key(name) {
            continue;
        }
        if let Some(value) = desired.attributes.get(name) {
            state.attributes.insert(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> HuaweiCloudProvider {
        let mut config = ProviderConfig::new("cn-north-4");
        config.auth_token = Some("token".to_string());
        config.project_id = Some("p-1".to_string());
        HuaweiCloudProvider::new(config).unwrap()
    }

    #[test]
    fn registers_every_handler() {
        let provider = provider();
        assert_eq!(provider.resources.len(), resources::resource_types().len());
        assert_eq!(provider.data_sources.len(), data_sources::data_source_types().len());
    }

    #[test]
    fn prepare_applies_defaults_then_validates() {
        let schema = resources::handler("vpc_subnet").unwrap().schema();
        let subnet = Resource::new("vpc_subnet", "app")
            .with_attribute("name", "app")
            .with_attribute("cidr", "10.0.1.0/24")
            .with_attribute("gateway_ip", "10.0.1.1")
            .with_attribute("vpc_id", "v-1");
        let prepared = prepare(&schema, subnet).unwrap();
        assert_eq!(prepared.attributes.get("dhcp_enable"), Some(&Value::Bool(true)));

        let broken = Resource::new("vpc_subnet", "app").with_attribute("cidr", "10.0.1.0/33");
        let err = prepare(&schema, broken).unwrap_err();
        assert!(err.message.contains("cidr"));
    }

    #[test]
    fn sensitive_inputs_are_carried() {
        let schema = resources::handler("elb_certificate").unwrap().schema();
        let desired = Resource::new("elb_certificate", "tls")
            .with_attribute("certificate", "CERT")
            .with_attribute("private_key", "KEY");
        let mut state = State::existing(desired.id.clone(), HashMap::new());
        carry_sensitive(&schema, &desired, &mut state);
        assert_eq!(state.attributes.get("private_key"), Some(&Value::from("KEY")));
        assert!(!state.attributes.contains_key("certificate"));

        let mut gone = State::not_found(desired.id.clone());
        carry_sensitive(&schema, &desired, &mut gone);
        assert!(gone.attributes.is_empty());
    }

    #[tokio::test]
    async fn unknown_types_are_unsupported() {
        let provider = provider();
        let err = provider
            .create_resource(Resource::new("ecs_instance", "web"))
            .await
            .unwrap_err();
        assert!(err.message.contains("unknown resource type 'ecs_instance'"));

        let state = provider
            .read_resource(&ResourceId::new("vpc", "main"), None)
            .await
            .unwrap();
        assert!(!state.exists);
    }
}
