//! Authenticated REST client for Huawei Cloud services

pub mod error;
pub mod jobs;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::{Value as JsonValue, json};
use stratus_core::waiter::StateChangeConf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ProviderConfig};
pub use error::{ApiError, ClientError, ClientResult, check_deleted};

/// Header carrying the IAM token on every request
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Header carrying the issued token in the IAM response
pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// Default wait before the first status refresh
const DEFAULT_WAIT_DELAY: Duration = Duration::from_secs(5);
/// Default floor between status refreshes
const DEFAULT_WAIT_MIN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
struct Credentials {
    token: String,
    project_id: String,
}

/// Shared HTTP client holding the IAM token cache
#[derive(Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    config: Arc<ProviderConfig>,
    credentials: Arc<RwLock<Option<Credentials>>>,
}

impl CloudClient {
    pub fn new(config: ProviderConfig) -> ClientResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!(
                "stratus-provider-huaweicloud/",
                env!("CARGO_PKG_VERSION")
            ))
            .danger_accept_invalid_certs(config.insecure)
            .build()?;

        Ok(Self {
            http,
            config: Arc::new(config),
            credentials: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Client for one service, rooted at its regional endpoint
    pub fn service(&self, name: &'static str) -> ServiceClient {
        ServiceClient {
            client: self.clone(),
            service: name,
            endpoint: self.config.endpoint(name),
        }
    }

    /// Project id, authenticating first when it comes from the token
    pub async fn project_id(&self) -> ClientResult<String> {
        Ok(self.credentials().await?.project_id)
    }

    async fn credentials(&self) -> ClientResult<Credentials> {
        if let Some(creds) = self.credentials.read().await.as_ref() {
            return Ok(creds.clone());
        }

        let mut guard = self.credentials.write().await;
        if let Some(creds) = guard.as_ref() {
            return Ok(creds.clone());
        }
        let creds = self.authenticate().await?;
        *guard = Some(creds.clone());
        Ok(creds)
    }

    async fn invalidate_credentials(&self) {
        *self.credentials.write().await = None;
    }

    async fn authenticate(&self) -> ClientResult<Credentials> {
        if let Some(token) = &self.config.auth_token {
            let project_id = self
                .config
                .project_id
                .clone()
                .ok_or(ConfigError::Missing("project_id"))?;
            return Ok(Credentials {
                token: token.clone(),
                project_id,
            });
        }

        let (Some(user), Some(password), Some(domain)) = (
            &self.config.user_name,
            &self.config.password,
            &self.config.domain_name,
        ) else {
            return Err(ConfigError::NoCredentials.into());
        };

        let scope = match &self.config.project_id {
            Some(id) => json!({ "project": { "id": id } }),
            None => json!({ "project": { "name": self.config.region } }),
        };
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": user,
                            "password": password,
                            "domain": { "name": domain }
                        }
                    }
                },
                "scope": scope
            }
        });

        let url = format!("{}/auth/tokens", self.config.identity_endpoint());
        debug!(url = %url, user = %user, "requesting IAM token");

        let response = self.http.post(&url).json(&body).send().await?;
        let status = response.status();
        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let text = response.text().await?;

        if !status.is_success() {
            let err = ApiError::from_response("POST", &url, status.as_u16(), &text);
            return Err(ClientError::Auth(err.to_string()));
        }
        let token = token.ok_or_else(|| {
            ClientError::Auth(format!("response carried no {} header", SUBJECT_TOKEN_HEADER))
        })?;

        let project_id = match &self.config.project_id {
            Some(id) => id.clone(),
            None => {
                let json: JsonValue = serde_json::from_str(&text)?;
                json.pointer("/token/project/id")
                    .and_then(JsonValue::as_str)
                    .map(String::from)
                    .ok_or_else(|| ClientError::Auth("token is not scoped to a project".into()))?
            }
        };

        info!(project_id = %project_id, "authenticated against IAM");
        Ok(Credentials { token, project_id })
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&JsonValue>,
    ) -> ClientResult<JsonValue> {
        let mut attempt = 0u32;
        let mut reauthenticated = false;

        loop {
            let creds = self.credentials().await?;
            debug!(method = %method, url = %url, attempt, "sending request");

            let mut request = self
                .http
                .request(method.clone(), url)
                .header(AUTH_TOKEN_HEADER, &creds.token);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                debug!(method = %method, url = %url, status = status.as_u16(), "request succeeded");
                if text.trim().is_empty() {
                    return Ok(JsonValue::Null);
                }
                return Ok(serde_json::from_str(&text)?);
            }

            let err = ApiError::from_response(method.as_str(), url, status.as_u16(), &text);

            if status == StatusCode::UNAUTHORIZED
                && !reauthenticated
                && self.config.auth_token.is_none()
            {
                warn!(url = %url, "token rejected, re-authenticating");
                self.invalidate_credentials().await;
                reauthenticated = true;
                continue;
            }

            if is_retryable(&method, status) && attempt < self.config.max_retries {
                let delay = retry_delay(attempt);
                warn!(
                    url = %url,
                    status = status.as_u16(),
                    attempt = attempt + 1,
                    max_retries = self.config.max_retries,
                    "retrying request in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            debug!(method = %method, url = %url, status = status.as_u16(), body = %err.body, "API error");
            return Err(err.into());
        }
    }
}

/// Throttling is always retried. A server error is only retried for methods
/// that may be repeated without creating a second object.
fn is_retryable(method: &Method, status: StatusCode) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status.is_server_error() && *method != Method::POST
}

fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY)
}

/// Client for a single cloud service endpoint
#[derive(Clone)]
pub struct ServiceClient {
    client: CloudClient,
    service: &'static str,
    endpoint: String,
}

impl ServiceClient {
    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn config(&self) -> &ProviderConfig {
        self.client.config()
    }

    /// Full URL for `path`, with `{project_id}` substituted
    pub async fn url(&self, path: &str) -> ClientResult<String> {
        let path = if path.contains("{project_id}") {
            path.replace("{project_id}", &self.client.project_id().await?)
        } else {
            path.to_string()
        };
        Ok(format!("{}{}", self.endpoint, path))
    }

    pub async fn get(&self, path: &str) -> ClientResult<JsonValue> {
        self.get_with_query(path, &[]).await
    }

    /// GET with query parameters, percent-encoded by the HTTP client
    pub async fn get_with_query(&self, path: &str, query: &[(&str, &str)]) -> ClientResult<JsonValue> {
        let url = self.url(path).await?;
        self.client.send(Method::GET, &url, query, None).await
    }

    pub async fn post(&self, path: &str, body: &JsonValue) -> ClientResult<JsonValue> {
        let url = self.url(path).await?;
        self.client.send(Method::POST, &url, &[], Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &JsonValue) -> ClientResult<JsonValue> {
        let url = self.url(path).await?;
        self.client.send(Method::PUT, &url, &[], Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> ClientResult<JsonValue> {
        let url = self.url(path).await?;
        self.client.send(Method::DELETE, &url, &[], None).await
    }

    /// Waiter settings for a status transition, honouring a configured poll interval
    pub fn state_change_conf<P, T>(&self, pending: P, target: T, timeout: Duration) -> StateChangeConf
    where
        P: IntoIterator,
        P::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let conf = StateChangeConf::new(pending, target, timeout);
        match self.config().poll_interval {
            Some(interval) => conf.with_poll_interval(interval),
            None => conf
                .with_delay(DEFAULT_WAIT_DELAY)
                .with_min_timeout(DEFAULT_WAIT_MIN_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_config() -> ProviderConfig {
        let mut config = ProviderConfig::new("cn-north-4");
        config.auth_token = Some("static-token".to_string());
        config.project_id = Some("p-1".to_string());
        config
    }

    #[test]
    fn retry_delay_grows_and_caps() {
        assert_eq!(retry_delay(0), Duration::from_millis(500));
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(10), RETRY_MAX_DELAY);
        assert_eq!(retry_delay(40), RETRY_MAX_DELAY);
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert!(is_retryable(&Method::GET, StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(&Method::GET, StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(&Method::GET, StatusCode::NOT_FOUND));
        assert!(!is_retryable(&Method::GET, StatusCode::BAD_REQUEST));
    }

    #[test]
    fn new_rejects_invalid_config() {
        let err = CloudClient::new(ProviderConfig::new("cn-north-4")).err();
        assert!(matches!(err, Some(ClientError::Config(ConfigError::NoCredentials))));
    }

    #[tokio::test]
    async fn url_substitutes_project_id() {
        let client = CloudClient::new(token_config()).unwrap();
        let vpc = client.service("vpc");
        assert_eq!(
            vpc.url("/v1/{project_id}/vpcs").await.unwrap(),
            "https://vpc.cn-north-4.myhuaweicloud.com/v1/p-1/vpcs"
        );
    }

    #[test]
    fn server_errors_are_only_retried_for_repeatable_methods() {
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            assert!(is_retryable(&method, StatusCode::BAD_GATEWAY), "{}", method);
            assert!(is_retryable(&method, StatusCode::TOO_MANY_REQUESTS), "{}", method);
        }
        assert!(!is_retryable(&Method::POST, StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(&Method::POST, StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(&Method::POST, StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable(&Method::GET, StatusCode::BAD_REQUEST));
    }

    #[test]
    fn state_change_conf_uses_configured_interval() {
        let mut config = token_config();
        config.poll_interval = Some(Duration::from_millis(10));
        let client = CloudClient::new(config).unwrap();
        let conf = client
            .service("cce")
            .state_change_conf(["Creating"], ["Available"], Duration::from_secs(60));
        assert_eq!(conf.poll_interval, Some(Duration::from_millis(10)));
        assert_eq!(conf.delay, Duration::ZERO);

        let client = CloudClient::new(token_config()).unwrap();
        let conf = client
            .service("cce")
            .state_change_conf(["Creating"], ["Available"], Duration::from_secs(60));
        assert_eq!(conf.poll_interval, None);
        assert_eq!(conf.delay, DEFAULT_WAIT_DELAY);
    }
}
