//! Data source lookups against a mock Huawei Cloud API

mod common;

use serde_json::json;
use stratus_core::provider::{ErrorKind, Provider};
use stratus_core::resource::{Attributes, Resource, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_vpcs(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/p-1/vpcs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vpcs": [
            {"id": "vpc-1", "name": "prod-web", "cidr": "10.0.0.0/16", "status": "OK"},
            {"id": "vpc-2", "name": "prod-db", "cidr": "10.1.0.0/16", "status": "OK"},
            {"id": "vpc-3", "name": "staging", "cidr": "10.0.0.0/16", "status": "OK"}
        ]})))
        .mount(server)
        .await;
}

/// A filter matching one VPC returns it
#[tokio::test]
async fn vpc_lookup_by_name() {
    let server = MockServer::start().await;
    mount_vpcs(&server).await;
    let provider = common::provider(&server);

    let query = Resource::data_source("vpc", "web").with_attribute("name", "prod-web");
    let state = provider.read_data_source(&query).await.unwrap();

    assert_eq!(state.identifier.as_deref(), Some("vpc-1"));
    assert_eq!(state.get_str("cidr"), Some("10.0.0.0/16"));
}

/// Zero matches and several matches are both errors
#[tokio::test]
async fn vpc_lookup_requires_exactly_one_match() {
    let server = MockServer::start().await;
    mount_vpcs(&server).await;
    let provider = common::provider(&server);

    let none = Resource::data_source("vpc", "x").with_attribute("name", "nope");
    let err = provider.read_data_source(&none).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("no VPC found matching name=nope"));

    let many = Resource::data_source("vpc", "x").with_attribute("cidr", "10.0.0.0/16");
    let err = provider.read_data_source(&many).await.unwrap_err();
    assert!(err.message.contains("2 VPCs match"));
}

/// name_regex narrows the listing
#[tokio::test]
async fn vpc_lookup_by_name_regex() {
    let server = MockServer::start().await;
    mount_vpcs(&server).await;
    let provider = common::provider(&server);

    let query = Resource::data_source("vpc", "db").with_attribute("name_regex", "^prod-d");
    let state = provider.read_data_source(&query).await.unwrap();
    assert_eq!(state.identifier.as_deref(), Some("vpc-2"));

    let invalid = Resource::data_source("vpc", "db").with_attribute("name_regex", "(");
    let err = provider.read_data_source(&invalid).await.unwrap_err();
    assert!(err.message.contains("invalid name_regex"));
}

/// Available zones are listed in order
#[tokio::test]
async fn availability_zones_lists_available_names() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2.1/p-1/os-availability-zone"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"availabilityZoneInfo": [
            {"zoneName": "cn-north-4b", "zoneState": {"available": true}},
            {"zoneName": "cn-north-4a", "zoneState": {"available": true}},
            {"zoneName": "cn-north-4c", "zoneState": {"available": false}}
        ]})))
        .mount(&server)
        .await;

    let provider = common::provider(&server);
    let state = provider
        .read_data_source(&Resource::data_source("availability_zones", "all"))
        .await
        .unwrap();

    assert_eq!(state.identifier.as_deref(), Some("cn-north-4"));
    assert_eq!(
        state.attributes.get("names"),
        Some(&Value::string_list(["cn-north-4a", "cn-north-4b"]))
    );
}

/// Cluster listings filter by status and join the ids into the identifier
#[tokio::test]
async fn cce_clusters_filters_by_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v3/projects/p-1/clusters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [
            {"metadata": {"uid": "c-2", "name": "web"}, "status": {"phase": "Available"}},
            {"metadata": {"uid": "c-1", "name": "batch"}, "status": {"phase": "Hibernation"}},
            {"metadata": {"uid": "c-3", "name": "api"}, "status": {"phase": "Available"}}
        ]})))
        .mount(&server)
        .await;

    let provider = common::provider(&server);
    let query = Resource::data_source("cce_clusters", "live").with_attribute("status", "Available");
    let state = provider.read_data_source(&query).await.unwrap();

    assert_eq!(state.identifier.as_deref(), Some("c-3,c-2"));
    assert_eq!(state.attributes.get("ids"), Some(&Value::string_list(["c-3", "c-2"])));
}

/// Key lookup pages through list-keys and describes each key
#[tokio::test]
async fn kms_key_lookup_by_alias() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1.0/p-1/kms/list-keys"))
        .and(body_partial_json(json!({"marker": "key-2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": ["key-3"],
            "truncated": "false"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1.0/p-1/kms/list-keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": ["key-1", "key-2"],
            "next_marker": "key-2",
            "truncated": "true"
        })))
        .mount(&server)
        .await;

    for (key_id, alias) in [("key-1", "app"), ("key-2", "logs"), ("key-3", "backups")] {
        Mock::given(method("POST"))
            .and(path("/v1.0/p-1/kms/describe-key"))
            .and(body_partial_json(json!({"key_id": key_id})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"key_info": {
                "key_id": key_id,
                "key_alias": alias,
                "key_state": "2",
                "key_spec": "AES_256"
            }})))
            .mount(&server)
            .await;
    }

    let provider = common::provider(&server);
    let query = Resource::data_source("kms_key", "backups").with_attribute("key_alias", "backups");
    let state = provider.read_data_source(&query).await.unwrap();

    assert_eq!(state.identifier.as_deref(), Some("key-3"));
    assert_eq!(state.get_str("key_algorithm"), Some("AES_256"));
}
