// src/agent/mod.rs

//! Remote execution: a queue API client, the lease-polling agent and
//! workflow submission.

pub mod api_client;
pub mod models;
pub mod submit;
pub mod worker;

pub use api_client::{ApiClient, CLAIM_ATTEMPTS};
pub use models::{JobPayload, JobRecord, Lease, SubmitJob, SubmitRunRequest, SubmitRunResponse};
pub use submit::{build_submit_request, submit_workflow};
pub use worker::{Agent, AgentOptions, checkout, lease_result, repo_dir_name};
