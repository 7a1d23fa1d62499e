//! Resource catalog
//!
//! Each module maps one Huawei Cloud API object onto a [`ResourceHandler`]:
//! an attribute schema plus create/read/update/delete against the REST API.

pub mod cce_cluster;
pub mod cce_node;
pub mod cce_node_attach;
pub mod compute_keypair;
pub mod dms_kafka_topic;
pub mod elb_certificate;
pub mod evs_volume;
pub mod kms_key;
pub mod networking_secgroup;
pub mod networking_secgroup_rule;
pub mod rds_backup;
pub mod vpc;
pub mod vpc_subnet;
pub mod vpcep_approval;
pub mod vpcep_endpoint;
pub mod vpcep_service;

mod tags;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};
use stratus_core::schema::Timeouts;

use crate::client::{ClientError, CloudClient, ServiceClient};

/// CRUD operations for one resource type
#[async_trait]
pub trait ResourceHandler: ResourceType {
    async fn create(
        &self,
        client: &CloudClient,
        resource: &Resource,
        timeouts: &Timeouts,
    ) -> ProviderResult<State>;

    /// Read by identifier; `State::not_found` when the object is gone
    async fn read(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State>;

    /// Apply in-place changes; `changed` never contains `force_new` attributes
    async fn update(
        &self,
        _client: &CloudClient,
        _identifier: &str,
        to: &Resource,
        _changed: &[String],
        _timeouts: &Timeouts,
    ) -> ProviderResult<State> {
        Err(ProviderError::unsupported(format!(
            "{} does not support in-place updates",
            self.name()
        ))
        .for_resource(to.id.clone()))
    }

    async fn delete(
        &self,
        client: &CloudClient,
        id: &ResourceId,
        identifier: &str,
        timeouts: &Timeouts,
    ) -> ProviderResult<()>;

    /// Identifier for a user-supplied import id
    fn import_identifier(&self, import_id: &str) -> ProviderResult<String> {
        Ok(import_id.to_string())
    }
}

macro_rules! resource_catalog {
    ($($module:ident :: $handler:ident),* $(,)?) => {
        /// All resource handlers supported by this provider
        pub fn handlers() -> Vec<Box<dyn ResourceHandler>> {
            vec![$(Box::new($module::$handler)),*]
        }

        /// Returns all resource types supported by this provider
        pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
            vec![$(Box::new($module::$handler) as Box<dyn ResourceType>),*]
        }
    };
}

resource_catalog!(
    vpc::Vpc,
    vpc_subnet::VpcSubnet,
    networking_secgroup::NetworkingSecgroup,
    networking_secgroup_rule::NetworkingSecgroupRule,
    vpcep_service::VpcepService,
    vpcep_endpoint::VpcepEndpoint,
    vpcep_approval::VpcepApproval,
    compute_keypair::ComputeKeypair,
    evs_volume::EvsVolume,
    cce_cluster::CceCluster,
    cce_node::CceNode,
    cce_node_attach::CceNodeAttach,
    kms_key::KmsKey,
    rds_backup::RdsBackup,
    dms_kafka_topic::DmsKafkaTopic,
    elb_certificate::ElbCertificate,
);

/// Handler for a resource type name
pub fn handler(name: &str) -> Option<Box<dyn ResourceHandler>> {
    handlers().into_iter().find(|h| h.name() == name)
}

/// Refresh for a status wait: the object and the string at `status_pointer`,
/// or `None` once the object is gone
pub(crate) async fn fetch_status(
    service: &ServiceClient,
    path: &str,
    status_pointer: &str,
) -> ProviderResult<Option<(JsonValue, String)>> {
    fetch_status_with(service, path, status_pointer, |e| e).await
}

/// Like [`fetch_status`], with a hook remapping service-specific not-found answers
pub(crate) async fn fetch_status_with(
    service: &ServiceClient,
    path: &str,
    status_pointer: &str,
    remap: impl Fn(ClientError) -> ClientError,
) -> ProviderResult<Option<(JsonValue, String)>> {
    match service.get(path).await.map_err(remap) {
        Ok(body) => {
            let status = body
                .pointer(status_pointer)
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(Some((body, status)))
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Delete the object at `path`, treating "already gone" as success
pub(crate) async fn delete_ignoring_not_found(
    service: &ServiceClient,
    path: &str,
) -> Result<(), ClientError> {
    match service.delete(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            tracing::debug!(path, "object already deleted");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
