//! Provider configuration
//!
//! Settings come from the provider block attributes first, then from the
//! `HW_*` environment variables for anything left unset.

use std::collections::HashMap;
use std::time::Duration;

use stratus_core::duration::parse_duration;
use stratus_core::resource::{Attributes, Value};
use thiserror::Error;

/// Default cloud domain used to build service endpoints
pub const DEFAULT_CLOUD: &str = "myhuaweicloud.com";

/// Default number of retries for throttled or failed (5xx) requests
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Errors in provider configuration
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting '{name}': {message}")]
    Invalid { name: &'static str, message: String },

    #[error(
        "no credentials configured: set auth_token (with project_id), or user_name, password and domain_name"
    )]
    NoCredentials,
}

/// Huawei Cloud provider configuration
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Region name (e.g., "cn-north-4")
    pub region: String,
    /// Project ID; resolved from the IAM token when omitted
    pub project_id: Option<String>,
    pub domain_name: Option<String>,
    pub user_name: Option<String>,
    pub password: Option<String>,
    /// Pre-issued IAM token (X-Auth-Token)
    pub auth_token: Option<String>,
    /// IAM endpoint including the version (e.g., "https://iam.cn-north-4.myhuaweicloud.com/v3")
    pub auth_url: Option<String>,
    /// Cloud domain for service endpoints
    pub cloud: String,
    /// Service name -> base URL overrides
    pub endpoint_overrides: HashMap<String, String>,
    pub max_retries: u32,
    /// Fixed polling interval for all status waits; per-resource defaults when unset
    pub poll_interval: Option<Duration>,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

impl ProviderConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            cloud: DEFAULT_CLOUD.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            ..Default::default()
        }
    }

    /// Build a configuration from provider block attributes
    pub fn from_attributes(attrs: &HashMap<String, Value>) -> Result<Self, ConfigError> {
        let mut config = Self::new(attrs.get_str("region").unwrap_or_default());

        config.project_id = attrs.get_str("project_id").map(String::from);
        config.domain_name = attrs.get_str("domain_name").map(String::from);
        config.user_name = attrs.get_str("user_name").map(String::from);
        config.password = attrs.get_str("password").map(String::from);
        config.auth_token = attrs.get_str("auth_token").map(String::from);
        config.auth_url = attrs.get_str("auth_url").map(String::from);
        config.insecure = attrs.get_bool("insecure").unwrap_or(false);

        if let Some(cloud) = attrs.get_str("cloud") {
            config.cloud = cloud.to_string();
        }

        if let Some(retries) = attrs.get_int("max_retries") {
            config.max_retries = u32::try_from(retries).map_err(|_| ConfigError::Invalid {
                name: "max_retries",
                message: format!("{} is not a non-negative integer", retries),
            })?;
        }

        if let Some(interval) = attrs.get_str("poll_interval") {
            let d = parse_duration(interval).map_err(|e| ConfigError::Invalid {
                name: "poll_interval",
                message: e.to_string(),
            })?;
            config.poll_interval = Some(d);
        }

        if let Some(endpoints) = attrs.get_map("endpoints") {
            for (service, url) in endpoints {
                let Value::String(url) = url else {
                    return Err(ConfigError::Invalid {
                        name: "endpoints",
                        message: format!("endpoint for '{}' must be a string", service),
                    });
                };
                config
                    .endpoint_overrides
                    .insert(service.clone(), url.trim_end_matches('/').to_string());
            }
        }

        Ok(config)
    }

    /// Fill unset fields from the process environment
    pub fn with_env_defaults(self) -> Self {
        self.with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Fill unset fields using `lookup` for `HW_*` variable names
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.region.is_empty()
            && let Some(region) = lookup("HW_REGION_NAME")
        {
            self.region = region;
        }
        fill(&mut self.project_id, &lookup, "HW_PROJECT_ID");
        fill(&mut self.domain_name, &lookup, "HW_DOMAIN_NAME");
        fill(&mut self.user_name, &lookup, "HW_USER_NAME");
        fill(&mut self.password, &lookup, "HW_PASSWORD");
        fill(&mut self.auth_token, &lookup, "HW_AUTH_TOKEN");
        fill(&mut self.auth_url, &lookup, "HW_AUTH_URL");
        self
    }

    /// Check that the configuration can authenticate against a region
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            return Err(ConfigError::Missing("region"));
        }
        if self.auth_token.is_some() {
            if self.project_id.is_none() {
                return Err(ConfigError::Missing("project_id"));
            }
            return Ok(());
        }
        match (&self.user_name, &self.password, &self.domain_name) {
            (Some(_), Some(_), Some(_)) => Ok(()),
            _ => Err(ConfigError::NoCredentials),
        }
    }

    /// Base URL for a service, honouring overrides
    pub fn endpoint(&self, service: &str) -> String {
        if let Some(url) = self.endpoint_overrides.get(service) {
            return url.clone();
        }
        format!("https://{}.{}.{}", service, self.region, self.cloud)
    }

    /// IAM v3 endpoint used for token requests
    pub fn identity_endpoint(&self) -> String {
        if let Some(url) = &self.auth_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.endpoint_overrides.get("iam") {
            Some(url) => format!("{}/v3", url),
            None => format!("https://iam.{}/v3", self.cloud),
        }
    }
}

fn fill(slot: &mut Option<String>, lookup: &impl Fn(&str) -> Option<String>, key: &str) {
    if slot.is_none() {
        *slot = lookup(key).filter(|v| !v.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn from_attributes_reads_settings() {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            "vpc".to_string(),
            Value::String("http://127.0.0.1:8080/".to_string()),
        );
        let config = ProviderConfig::from_attributes(&attrs(&[
            ("region", Value::String("cn-north-4".to_string())),
            ("project_id", Value::String("p-123".to_string())),
            ("auth_token", Value::String("token".to_string())),
            ("max_retries", Value::Int(2)),
            ("poll_interval", Value::String("2s".to_string())),
            ("endpoints", Value::Map(endpoints)),
        ]))
        .unwrap();

        assert_eq!(config.region, "cn-north-4");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.poll_interval, Some(Duration::from_secs(2)));
        assert_eq!(config.endpoint("vpc"), "http://127.0.0.1:8080");
        assert_eq!(config.endpoint("cce"), "https://cce.cn-north-4.myhuaweicloud.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cloud_domain_builds_endpoints() {
        let config = ProviderConfig::from_attributes(&attrs(&[
            ("region", Value::String("eu-de".to_string())),
            ("cloud", Value::String("otc.t-systems.com".to_string())),
        ]))
        .unwrap();

        assert_eq!(config.endpoint("vpc"), "https://vpc.eu-de.otc.t-systems.com");
        assert_eq!(config.identity_endpoint(), "https://iam.otc.t-systems.com/v3");
    }

    #[test]
    fn negative_retries_rejected() {
        let err = ProviderConfig::from_attributes(&attrs(&[("max_retries", Value::Int(-1))]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "max_retries", .. }));
    }

    #[test]
    fn env_fills_only_missing_values() {
        let config = ProviderConfig::new("")
            .with_env_lookup(|key| match key {
                "HW_REGION_NAME" => Some("ap-southeast-1".to_string()),
                "HW_USER_NAME" => Some("alice".to_string()),
                "HW_PASSWORD" => Some("secret".to_string()),
                "HW_DOMAIN_NAME" => Some("acme".to_string()),
                "HW_PROJECT_ID" => Some(String::new()),
                _ => None,
            });

        assert_eq!(config.region, "ap-southeast-1");
        assert_eq!(config.user_name.as_deref(), Some("alice"));
        assert_eq!(config.project_id, None);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.identity_endpoint(),
            "https://iam.myhuaweicloud.com/v3"
        );
    }

    #[test]
    fn validate_requires_credentials() {
        assert_eq!(
            ProviderConfig::default().validate(),
            Err(ConfigError::Missing("region"))
        );
        assert_eq!(
            ProviderConfig::new("cn-north-4").validate(),
            Err(ConfigError::NoCredentials)
        );

        let mut config = ProviderConfig::new("cn-north-4");
        config.auth_token = Some("t".to_string());
        assert_eq!(config.validate(), Err(ConfigError::Missing("project_id")));
    }
}
