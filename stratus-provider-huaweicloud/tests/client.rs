//! REST client behaviour: IAM authentication, retries and error decoding

mod common;

use serde_json::json;
use stratus_provider_huaweicloud::{ClientError, CloudClient, ProviderConfig};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn password_config(server: &MockServer) -> ProviderConfig {
    let mut config = common::config(server);
    config.auth_token = None;
    config.project_id = None;
    config.user_name = Some("deployer".to_string());
    config.password = Some("s3cret".to_string());
    config.domain_name = Some("acme".to_string());
    config
}

/// Password auth fetches a token once and takes the project id from its scope
#[tokio::test]
async fn password_auth_issues_token_and_resolves_project() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .and(body_partial_json(json!({"auth": {
            "identity": {"methods": ["password"]},
            "scope": {"project": {"name": "cn-north-4"}}
        }})))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", "issued-token")
                .set_body_json(json!({"token": {"project": {"id": "p-9", "name": "cn-north-4"}}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/p-9/vpcs"))
        .and(header("X-Auth-Token", "issued-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vpcs": []})))
        .expect(2)
        .mount(&server)
        .await;

    let client = CloudClient::new(password_config(&server)).unwrap();
    let vpc = client.service("vpc");

    assert_eq!(client.project_id().await.unwrap(), "p-9");
    assert_eq!(vpc.get("/v1/{project_id}/vpcs").await.unwrap(), json!({"vpcs": []}));
    vpc.get("/v1/{project_id}/vpcs").await.unwrap();
}

/// Rejected credentials surface as an authentication error
#[tokio::test]
async fn rejected_credentials_fail_authentication() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": {
            "code": 401,
            "message": "The username or password is wrong."
        }})))
        .mount(&server)
        .await;

    let client = CloudClient::new(password_config(&server)).unwrap();
    let err = client.service("vpc").get("/v1/{project_id}/vpcs").await.unwrap_err();

    assert!(matches!(err, ClientError::Auth(ref msg) if msg.contains("password is wrong")));
}

/// An expired token is refreshed once and the request replayed
#[tokio::test]
async fn expired_token_is_refreshed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", "fresh-token")
                .set_body_json(json!({"token": {"project": {"id": "p-9"}}})),
        )
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/p-9/vpcs"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/p-9/vpcs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vpcs": []})))
        .mount(&server)
        .await;

    let client = CloudClient::new(password_config(&server)).unwrap();
    client.service("vpc").get("/v1/{project_id}/vpcs").await.unwrap();
}

/// Server errors are retried before giving up
#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/p-1/vpcs"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/p-1/vpcs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vpcs": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(common::config(&server)).unwrap();
    client.service("vpc").get("/v1/{project_id}/vpcs").await.unwrap();
}

/// A POST answered with a server error may have created the object, so it is not repeated
#[tokio::test]
async fn server_errors_on_post_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/p-1/vpcs"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(common::config(&server)).unwrap();
    let err = client
        .service("vpc")
        .post("/v1/{project_id}/vpcs", &json!({"vpc": {"name": "main"}}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(502));
}

/// Query values are encoded rather than spliced into the URL
#[tokio::test]
async fn query_values_are_encoded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v3/p-1/backups"))
        .and(query_param("instance_id", "a b&c"))
        .and(query_param("backup_id", "b-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"backups": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(common::config(&server)).unwrap();
    let body = client
        .service("rds")
        .get_with_query(
            "/v3/{project_id}/backups",
            &[("instance_id", "a b&c"), ("backup_id", "b-1")],
        )
        .await
        .unwrap();
    assert_eq!(body, json!({"backups": []}));
}

/// Client errors are not retried and keep the service error code
#[tokio::test]
async fn client_errors_carry_service_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/p-1/vpcs"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": "VPC.0007",
            "error_msg": "cidr is invalid"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CloudClient::new(common::config(&server)).unwrap();
    let err = client
        .service("vpc")
        .post("/v1/{project_id}/vpcs", &json!({"vpc": {"cidr": "bogus"}}))
        .await
        .unwrap_err();

    match err {
        ClientError::Api(api) => {
            assert_eq!(api.status, 400);
            assert_eq!(api.error_code.as_deref(), Some("VPC.0007"));
            assert!(api.to_string().contains("cidr is invalid"));
        }
        other => panic!("expected an API error, got {other:?}"),
    }
}

/// An empty success body decodes as null
#[tokio::test]
async fn empty_body_is_null() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/p-1/vpcs/vpc-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = CloudClient::new(common::config(&server)).unwrap();
    let body = client.service("vpc").delete("/v1/{project_id}/vpcs/vpc-1").await.unwrap();
    assert!(body.is_null());
}
