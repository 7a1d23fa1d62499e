//! Provider - Trait abstracting resource operations
//!
//! A Provider defines operations for a specific cloud (Huawei Cloud, ...).
//! It is responsible for converting declared resources into actual API calls.

use std::future::Future;
use std::pin::Pin;

use crate::resource::{Resource, ResourceId, State};
use crate::schema::ResourceSchema;

/// Broad category of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The cloud API rejected the call
    Api,
    /// The remote object does not exist
    NotFound,
    /// Attributes were invalid for the requested operation
    Validation,
    /// A wait for a target status ran out of time
    Timeout,
    /// The resource type or operation is not handled by this provider
    Unsupported,
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub kind: ErrorKind,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] {}", id.resource_type, id.name, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ErrorKind::Api,
            resource_id: None,
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::NotFound)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Validation)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Timeout)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Unsupported)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Prefix the message with context, keeping kind and cause
    pub fn context(mut self, context: impl std::fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "vpc")
    fn name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new(self.name())
    }
}

/// Main Provider trait
///
/// Each cloud provider implements this trait.
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "huaweicloud")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can manage
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// List of data source types this Provider can query
    fn data_source_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource no longer exists or
    /// no identifier is known yet.
    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Query a data source, using the resource attributes as filters
    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the cloud-side ID
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Update a resource in place
    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource
    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>>;

    /// Adopt an existing remote object, given the import id a user supplies
    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        (**self).resource_types()
    }

    fn data_source_types(&self) -> Vec<Box<dyn ResourceType>> {
        (**self).data_source_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(id, identifier)
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read_data_source(resource)
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(id, identifier, from, to)
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(id, identifier)
    }

    fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).import(id, import_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Keeps created objects in memory, keyed by a sequential identifier
    #[derive(Default)]
    struct InMemory {
        objects: Mutex<HashMap<String, State>>,
    }

    impl InMemory {
        fn lookup(&self, id: &ResourceId, identifier: Option<&str>) -> State {
            let objects = self.objects.lock().unwrap();
            identifier
                .and_then(|key| objects.get(key).cloned())
                .unwrap_or_else(|| State::not_found(id.clone()))
        }
    }

    impl Provider for InMemory {
        fn name(&self) -> &'static str {
            "in-memory"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            Vec::new()
        }

        fn data_source_types(&self) -> Vec<Box<dyn ResourceType>> {
            Vec::new()
        }

        fn read(
            &self,
            id: &ResourceId,
            identifier: Option<&str>,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let state = self.lookup(id, identifier);
            Box::pin(async move { Ok(state) })
        }

        fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let id = resource.id.clone();
            Box::pin(async move { Err(ProviderError::unsupported("no data sources").for_resource(id)) })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let mut objects = self.objects.lock().unwrap();
            let key = format!("obj-{}", objects.len() + 1);
            let state = State::existing(resource.id.clone(), resource.attributes.clone())
                .with_identifier(key.clone());
            objects.insert(key, state.clone());
            Box::pin(async move { Ok(state) })
        }

        fn update(
            &self,
            id: &ResourceId,
            identifier: &str,
            _from: &State,
            to: &Resource,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let state = State::existing(id.clone(), to.attributes.clone()).with_identifier(identifier);
            self.objects
                .lock()
                .unwrap()
                .insert(identifier.to_string(), state.clone());
            Box::pin(async move { Ok(state) })
        }

        fn delete(&self, _id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
            self.objects.lock().unwrap().remove(identifier);
            Box::pin(async { Ok(()) })
        }

        fn import(&self, id: &ResourceId, import_id: &str) -> BoxFuture<'_, ProviderResult<State>> {
            let state = self.lookup(id, Some(import_id));
            let import_id = import_id.to_string();
            Box::pin(async move {
                if state.exists {
                    Ok(state)
                } else {
                    Err(ProviderError::not_found(format!("no object '{}'", import_id)))
                }
            })
        }
    }

    #[tokio::test]
    async fn boxed_provider_round_trips_an_object() {
        let provider: Box<dyn Provider> = Box::new(InMemory::default());
        assert_eq!(provider.name(), "in-memory");

        let resource = Resource::new("vpc", "main").with_attribute("cidr", "10.0.0.0/16");
        let created = provider.create(&resource).await.unwrap();
        let identifier = created.identifier.clone().unwrap();
        assert_eq!(identifier, "obj-1");

        let read = provider.read(&resource.id, Some(&identifier)).await.unwrap();
        assert_eq!(read, created);
        assert!(provider.import(&resource.id, &identifier).await.is_ok());

        provider.delete(&resource.id, &identifier).await.unwrap();
        let gone = provider.read(&resource.id, Some(&identifier)).await.unwrap();
        assert!(!gone.exists);
        assert!(provider.import(&resource.id, &identifier).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn read_without_identifier_is_not_found() {
        let provider = InMemory::default();
        let state = provider.read(&ResourceId::new("vpc", "main"), None).await.unwrap();
        assert!(!state.exists);

        let err = provider
            .read_data_source(&Resource::data_source("vpc", "q"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);
    }

    #[test]
    fn error_display_includes_resource() {
        let err = ProviderError::validation("name is required")
            .for_resource(ResourceId::new("vpc", "main"))
            .context("create");
        assert_eq!(err.to_string(), "[vpc.main] create: name is required");
        assert!(!err.is_not_found());
        assert!(ProviderError::not_found("gone").is_not_found());
    }
}
