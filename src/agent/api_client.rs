// src/agent/api_client.rs

//! HTTP client for the job queue API.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::agent::models::{
    ClaimRequest, CompleteRequest, JobRecord, Lease, SubmitRunRequest, SubmitRunResponse,
};
use crate::types::LeaseStatus;

/// Attempts made by [`ApiClient::claim_lease`] when the server reports
/// contention (`409`).
pub const CLAIM_ATTEMPTS: usize = 3;

const CLAIM_RETRY_DELAY: Duration = Duration::from_millis(200);

/// API client for the lease/run endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a new API client. Trailing slashes on `base_url` are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Claims the next queued job for `agent_id`.
    ///
    /// `Ok(None)` means the queue is empty (`204`). A `409` means another
    /// agent won the race; the claim is retried up to [`CLAIM_ATTEMPTS`]
    /// times before giving up with `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn claim_lease(&self, agent_id: &str) -> Result<Option<Lease>> {
        let url = format!("{}/leases/claim", self.base_url);
        let request = ClaimRequest { agent_id };

        for attempt in 1..=CLAIM_ATTEMPTS {
            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .context("Failed to send request")?;

            match response.status() {
                StatusCode::NO_CONTENT => return Ok(None),
                StatusCode::CONFLICT => {
                    debug!(attempt, "lease claim contended; retrying");
                    tokio::time::sleep(CLAIM_RETRY_DELAY).await;
                }
                status if status.is_success() => {
                    let lease = response.json().await.context("Failed to parse response")?;
                    return Ok(Some(lease));
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("API error ({status}): {body}")
                }
            }
        }

        Ok(None)
    }

    /// Marks a leased job as finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects it.
    pub async fn complete_lease(
        &self,
        job_id: &str,
        agent_id: &str,
        status: LeaseStatus,
        details: Value,
    ) -> Result<()> {
        let url = format!("{}/leases/{job_id}/complete", self.base_url);
        let request = CompleteRequest {
            agent_id,
            status,
            details,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }

    /// Gets a job record.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn get_job(&self, job_id: &str) -> Result<JobRecord> {
        let url = format!("{}/jobs/{job_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status().is_success() {
            response.json().await.context("Failed to parse response")
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }

    /// Enqueues a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn submit_run(&self, request: &SubmitRunRequest) -> Result<SubmitRunResponse> {
        let url = format!("{}/runs", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status().is_success() {
            response.json().await.context("Failed to parse response")
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }
}
