use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::BatchService;
use super::error::BatchError;
use super::retry::RetryPolicy;
use super::types::{
    JobStatus, ListJobsRequest, ListJobsResponse, SubmitJobRequest, SubmitJobResponse,
};

const SUBMIT_PATH: &str = "/v1/submitjob";
const LIST_PATH: &str = "/v1/listjobs";

/// JSON-over-HTTP client for the batch execution service.
pub struct HttpBatchClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl HttpBatchClient {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        retry: RetryPolicy,
    ) -> Result<Self, BatchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
            retry,
        })
    }

    /// POSTs `body` to `path`, retrying transient failures per the policy.
    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, BatchError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut attempt = 1;
        loop {
            match self.post_once(path, body).await {
                Ok(resp) => return Ok(resp),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = err
                        .retry_after()
                        .map(|d| self.retry.clamp(d))
                        .unwrap_or_else(|| self.retry.delay_for_attempt(attempt));
                    warn!(
                        path,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "batch request failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_once<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, BatchError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}{path}", self.endpoint))
            .header("content-type", "application/json")
            .json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(BatchError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(BatchError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<Resp>().await?)
    }
}

impl BatchService for HttpBatchClient {
    async fn submit_job(
        &self,
        request: &SubmitJobRequest,
    ) -> Result<SubmitJobResponse, BatchError> {
        self.post(SUBMIT_PATH, request).await
    }

    async fn list_job_names(
        &self,
        queue: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<String>, BatchError> {
        let mut names = Vec::new();
        for &status in statuses {
            let mut next_token = None;
            loop {
                let request = ListJobsRequest {
                    job_queue: queue.to_string(),
                    job_status: status,
                    next_token,
                };
                let page: ListJobsResponse = self.post(LIST_PATH, &request).await?;
                debug!(
                    queue,
                    %status,
                    jobs = page.job_summary_list.len(),
                    "listed batch jobs"
                );
                names.extend(
                    page.job_summary_list
                        .into_iter()
                        .filter(|job| !job.status.is_some_and(JobStatus::is_terminal))
                        .map(|job| job.job_name),
                );
                match page.next_token {
                    Some(token) => next_token = Some(token),
                    None => break,
                }
            }
        }
        Ok(names)
    }
}
