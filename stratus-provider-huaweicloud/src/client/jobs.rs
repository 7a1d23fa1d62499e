//! Asynchronous job API shared by EVS and other OpenStack-derived services

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use stratus_core::provider::{ProviderError, ProviderResult};
use tracing::info;

use super::ServiceClient;

const JOB_PENDING: [&str; 2] = ["INIT", "RUNNING"];
const JOB_SUCCESS: &str = "SUCCESS";
const JOB_FAIL: &str = "FAIL";

#[derive(Debug, Deserialize)]
struct Job {
    #[serde(default)]
    status: String,
    #[serde(default)]
    fail_reason: Option<String>,
    #[serde(default)]
    entities: JsonValue,
}

impl ServiceClient {
    /// Wait for a job to finish and return its `entities` object
    pub async fn wait_for_job(&self, job_id: &str, timeout: Duration) -> ProviderResult<JsonValue> {
        info!(service = self.service(), job_id, "waiting for job");
        let path = format!("/v1/{{project_id}}/jobs/{}", job_id);
        let conf = self.state_change_conf(JOB_PENDING, [JOB_SUCCESS], timeout);

        let job = conf
            .wait_for_state(|| async {
                let body = self.get(&path).await.map_err(ProviderError::from)?;
                let job: Job = serde_json::from_value(body).map_err(|e| {
                    ProviderError::new(format!("malformed job {}: {}", job_id, e))
                })?;

                if job.status == JOB_FAIL {
                    let reason = job.fail_reason.as_deref().unwrap_or("unknown reason");
                    return Err(ProviderError::new(format!("job {} failed: {}", job_id, reason)));
                }
                let status = job.status.clone();
                Ok(Some((job, status)))
            })
            .await?;

        Ok(job.map(|job| job.entities).unwrap_or(JsonValue::Null))
    }
}

/// Job id from a job-creating response
pub fn job_id(response: &JsonValue) -> ProviderResult<String> {
    response
        .get("job_id")
        .and_then(JsonValue::as_str)
        .map(String::from)
        .ok_or_else(|| ProviderError::new("response carried no job_id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_id_extraction() {
        assert_eq!(job_id(&json!({"job_id": "j-1"})).unwrap(), "j-1");
        assert!(job_id(&json!({"error": "x"})).is_err());
    }

    #[test]
    fn job_body_tolerates_missing_fields() {
        let job: Job = serde_json::from_value(json!({"status": "RUNNING"})).unwrap();
        assert_eq!(job.status, "RUNNING");
        assert!(job.entities.is_null());

        let job: Job = serde_json::from_value(json!({
            "status": "FAIL",
            "fail_reason": "quota exceeded",
            "entities": {"volume_id": "v-1"}
        }))
        .unwrap();
        assert_eq!(job.fail_reason.as_deref(), Some("quota exceeded"));
        assert_eq!(job.entities["volume_id"], "v-1");
    }
}
