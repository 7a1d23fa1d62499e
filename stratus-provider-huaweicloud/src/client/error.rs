//! Client error types and translation into provider errors
//!
//! Huawei Cloud services disagree on how they say "no such object": most
//! answer 404, some answer 403 for objects in another project or already
//! deleted, and some answer 400 with a service-specific `error_code`. The
//! helpers here fold those answers into a single not-found notion so read
//! handlers can report drift instead of failing.

use serde_json::Value as JsonValue;
use stratus_core::provider::{ErrorKind, ProviderError, ProviderResult};
use stratus_core::resource::{ResourceId, State};
use thiserror::Error;

use crate::config::ConfigError;

/// Maximum length of a response body kept in error messages
const MAX_ERROR_BODY_LENGTH: usize = 512;

/// An HTTP error answered by a cloud API
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{method} {url} returned {status}: {}", self.summary())]
pub struct ApiError {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub error_code: Option<String>,
    pub error_msg: Option<String>,
    pub body: String,
}

impl ApiError {
    /// Build from a raw response, extracting the error code and message
    pub fn from_response(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        body: &str,
    ) -> Self {
        let (error_code, error_msg) = match serde_json::from_str::<JsonValue>(body) {
            Ok(json) => parse_error_body(&json),
            Err(_) => (None, None),
        };
        Self {
            method: method.into(),
            url: url.into(),
            status,
            error_code,
            error_msg,
            body: sanitize_body(body),
        }
    }

    fn summary(&self) -> String {
        match (&self.error_code, &self.error_msg) {
            (Some(code), Some(msg)) => format!("{} {}", code, msg),
            (Some(code), None) => code.clone(),
            (None, Some(msg)) => msg.clone(),
            (None, None) => self.body.clone(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn has_code(&self, codes: &[&str]) -> bool {
        self.error_code
            .as_deref()
            .is_some_and(|code| codes.contains(&code))
    }
}

/// Errors raised by the REST client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api(e) if e.is_not_found())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api(e) => Some(e.status),
            _ => None,
        }
    }

    /// Treat the error as not-found when it carries `status` and one of `codes`
    pub fn convert_expected_code_to_404(self, status: u16, codes: &[&str]) -> Self {
        match self {
            ClientError::Api(mut e) if e.status == status && e.has_code(codes) => {
                e.status = 404;
                ClientError::Api(e)
            }
            other => other,
        }
    }

    /// Treat a 403 as not-found. With `codes` non-empty only those codes qualify.
    pub fn convert_expected_403_to_404(self, codes: &[&str]) -> Self {
        match self {
            ClientError::Api(mut e) if e.status == 403 && (codes.is_empty() || e.has_code(codes)) => {
                e.status = 404;
                ClientError::Api(e)
            }
            other => other,
        }
    }
}

impl From<ClientError> for ProviderError {
    fn from(err: ClientError) -> Self {
        let kind = match &err {
            ClientError::Api(e) if e.is_not_found() => ErrorKind::NotFound,
            ClientError::Config(_) => ErrorKind::Validation,
            _ => ErrorKind::Api,
        };
        ProviderError::new(err.to_string())
            .with_kind(kind)
            .with_cause(err)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Map a read failure to `State::not_found` when the object is gone
pub fn check_deleted(err: ClientError, id: &ResourceId) -> ProviderResult<State> {
    if err.is_not_found() {
        tracing::warn!(resource = %id, "resource not found, removing from state");
        Ok(State::not_found(id.clone()))
    } else {
        Err(ProviderError::from(err).for_resource(id.clone()))
    }
}

/// Extract `(error_code, error_msg)` from the known error body shapes
fn parse_error_body(json: &JsonValue) -> (Option<String>, Option<String>) {
    let text = |v: Option<&JsonValue>| -> Option<String> {
        v.and_then(|v| match v {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };

    // {"error_code": "...", "error_msg": "..."}
    if json.get("error_code").is_some() || json.get("error_msg").is_some() {
        return (text(json.get("error_code")), text(json.get("error_msg")));
    }
    // {"errorCode": "...", "errorMessage": "..."}
    if json.get("errorCode").is_some() {
        return (text(json.get("errorCode")), text(json.get("errorMessage")));
    }
    // {"code": "...", "message": "..."}
    if json.get("code").is_some() && json.get("message").is_some() {
        return (text(json.get("code")), text(json.get("message")));
    }
    // {"error": {"code": "...", "message": "..."}} and the OpenStack wrappers
    for wrapper in ["error", "NeutronError", "badRequest", "itemNotFound", "forbidden"] {
        if let Some(inner) = json.get(wrapper).filter(|v| v.is_object()) {
            let code = text(inner.get("code"))
                .or_else(|| text(inner.get("error_code")))
                .or_else(|| text(inner.get("type")));
            let msg = text(inner.get("message")).or_else(|| text(inner.get("error_msg")));
            return (code, msg);
        }
    }
    (None, None)
}

fn sanitize_body(body: &str) -> String {
    let cleaned: String = body
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    if cleaned.len() > MAX_ERROR_BODY_LENGTH {
        let cut = (0..=MAX_ERROR_BODY_LENGTH)
            .rev()
            .find(|i| cleaned.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &cleaned[..cut], cleaned.len())
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, body: &str) -> ClientError {
        ClientError::Api(ApiError::from_response("GET", "https://x/y", status, body))
    }

    #[test]
    fn parses_error_body_shapes() {
        let e = ApiError::from_response(
            "GET",
            "u",
            400,
            r#"{"error_code":"VPC.0101","error_msg":"bad vpc"}"#,
        );
        assert_eq!(e.error_code.as_deref(), Some("VPC.0101"));
        assert_eq!(e.error_msg.as_deref(), Some("bad vpc"));

        let e = ApiError::from_response(
            "GET",
            "u",
            404,
            r#"{"error":{"code":"CCE.01404001","message":"cluster not found"}}"#,
        );
        assert_eq!(e.error_code.as_deref(), Some("CCE.01404001"));

        let e = ApiError::from_response(
            "GET",
            "u",
            404,
            r#"{"itemNotFound":{"code":404,"message":"keypair not found"}}"#,
        );
        assert_eq!(e.error_code.as_deref(), Some("404"));
        assert_eq!(e.error_msg.as_deref(), Some("keypair not found"));

        let e = ApiError::from_response("GET", "u", 500, "gateway exploded");
        assert_eq!(e.error_code, None);
        assert!(e.to_string().contains("gateway exploded"));
    }

    #[test]
    fn remaps_expected_403() {
        let err = api(403, r#"{"error_code":"KMS.0205","error_msg":"no key"}"#)
            .convert_expected_403_to_404(&["KMS.0205"]);
        assert!(err.is_not_found());

        let err = api(403, r#"{"error_code":"IAM.0001","error_msg":"denied"}"#)
            .convert_expected_403_to_404(&["KMS.0205"]);
        assert!(!err.is_not_found());

        let err = api(403, "{}").convert_expected_403_to_404(&[]);
        assert!(err.is_not_found());
    }

    #[test]
    fn remaps_expected_code() {
        let err = api(400, r#"{"error_code":"DMS.00400004","error_msg":"no instance"}"#)
            .convert_expected_code_to_404(400, &["DMS.00400004"]);
        assert!(err.is_not_found());

        let err = api(500, r#"{"error_code":"DMS.00400004"}"#)
            .convert_expected_code_to_404(400, &["DMS.00400004"]);
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn check_deleted_maps_not_found_to_state() {
        let id = ResourceId::new("vpc", "main");
        let state = check_deleted(api(404, "{}"), &id).unwrap();
        assert!(!state.exists);

        let err = check_deleted(api(500, "{}"), &id).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Api);
        assert_eq!(err.resource_id, Some(id));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        let e = ApiError::from_response("GET", "u", 500, &body);
        assert!(e.body.contains("truncated, 2000 bytes total"));
    }
}
