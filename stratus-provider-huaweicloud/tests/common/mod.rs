//! Shared fixtures for the mock-server integration tests

#![allow(dead_code)]

use std::time::Duration;

use stratus_provider_huaweicloud::{HuaweiCloudProvider, ProviderConfig};
use wiremock::MockServer;

pub const PROJECT_ID: &str = "p-1";
pub const TOKEN: &str = "test-token";

const SERVICES: &[&str] = &["vpc", "vpcep", "cce", "evs", "ecs", "kms", "rds", "dms", "elb", "iam"];

/// Configuration pointing every service at `server`, with fast polling
pub fn config(server: &MockServer) -> ProviderConfig {
    let mut config = ProviderConfig::new("cn-north-4");
    config.auth_token = Some(TOKEN.to_string());
    config.project_id = Some(PROJECT_ID.to_string());
    config.poll_interval = Some(Duration::from_millis(10));
    config.max_retries = 2;
    for service in SERVICES {
        config
            .endpoint_overrides
            .insert(service.to_string(), server.uri());
    }
    config
}

pub fn provider(server: &MockServer) -> HuaweiCloudProvider {
    HuaweiCloudProvider::new(config(server)).expect("valid test configuration")
}
