// src/agent/models.rs

//! Wire types exchanged with the job queue API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::JobConfig;
use crate::types::LeaseStatus;

/// Payload stored with every queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub repo_url: String,
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    pub job: JobConfig,
}

fn default_ref() -> String {
    "HEAD".to_string()
}

/// A job claimed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: String,
    pub run_id: String,
    pub job_name: String,
    pub payload_json: JobPayload,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimRequest<'a> {
    pub agent_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteRequest<'a> {
    pub agent_id: &'a str,
    pub status: LeaseStatus,
    pub details: Value,
}

/// One job of a submitted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJob {
    pub job_name: String,
    pub payload_json: JobPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRunRequest {
    pub repo: String,
    pub jobs: Vec<SubmitJob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRunResponse {
    pub run_id: String,
    #[serde(default)]
    pub job_ids: Vec<String>,
}

/// Job record as returned by `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub job_name: String,
    pub status: String,
    #[serde(default)]
    pub logs: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_parses_claimed_job_response() {
        let body = r#"{
            "job_id": "j-1",
            "run_id": "r-1",
            "job_name": "unit",
            "payload_json": {
                "repo_url": "https://example.com/acme/app.git",
                "job": { "name": "unit", "steps": [{ "name": "test", "run": "make test" }] }
            },
            "lease_expires_at": "2026-01-01T00:00:00Z"
        }"#;
        let lease: Lease = serde_json::from_str(body).unwrap();
        assert_eq!(lease.job_name, "unit");
        assert_eq!(lease.payload_json.git_ref, "HEAD");
        assert_eq!(lease.payload_json.job.steps.len(), 1);
    }

    #[test]
    fn complete_request_uses_lowercase_status() {
        let req = CompleteRequest {
            agent_id: "agent-1",
            status: LeaseStatus::Failed,
            details: serde_json::json!({ "error": "boom" }),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["details"]["error"], "boom");
    }

    #[test]
    fn job_record_allows_missing_logs() {
        let record: JobRecord = serde_json::from_str(
            r#"{"id":"j-1","job_name":"unit","status":"queued","created_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(record.logs, None);
        assert_eq!(record.status, "queued");
    }

    #[test]
    fn payload_serializes_ref_key() {
        let payload: JobPayload = serde_json::from_value(serde_json::json!({
            "repo_url": "r",
            "ref": "main",
            "job": { "name": "a", "steps": [{ "name": "s", "run": "true" }] }
        }))
        .unwrap();
        assert_eq!(payload.git_ref, "main");
        let back = serde_json::to_value(&payload).unwrap();
        assert_eq!(back["ref"], "main");
    }
}
