//! Stratus Huawei Cloud Provider
//!
//! Manages Huawei Cloud objects through the services' REST APIs.
//!
//! ## Module Structure
//!
//! - `config` - Provider configuration and `HW_*` environment defaults
//! - `client` - Authenticated REST client, error mapping and the job API
//! - `resources` - One handler per managed resource type
//! - `data_sources` - Read-only lookups
//! - `provider` - HuaweiCloudProvider implementation
//! - `utils` - Attribute and JSON conversion helpers

pub mod client;
pub mod config;
pub mod data_sources;
pub mod provider;
pub mod resources;
pub mod utils;

// Re-export main types
pub use client::{ApiError, ClientError, CloudClient};
pub use config::{ConfigError, ProviderConfig};
pub use provider::HuaweiCloudProvider;

use stratus_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for HuaweiCloudProvider {
    fn name(&self) -> &'static str {
        "huaweicloud"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resources::resource_types()
    }

    fn data_source_types(&self) -> Vec<Box<dyn ResourceType>> {
        data_sources::data_source_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.read_data_source_query(resource).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &from, to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }

    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let import_id = import_id.to_string();
        Box::pin(async move { self.import_resource(&id, &import_id).await })
    }
}
