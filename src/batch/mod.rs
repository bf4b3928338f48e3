pub mod client;
pub mod error;
pub mod retry;
pub mod types;

pub use client::HttpBatchClient;
pub use error::BatchError;
pub use retry::RetryPolicy;
pub use types::{JobStatus, SubmitJobRequest, SubmitJobResponse};

/// The two calls the dispatcher needs from the batch execution service.
pub trait BatchService {
    async fn submit_job(&self, request: &SubmitJobRequest)
    -> Result<SubmitJobResponse, BatchError>;

    /// Names of every job on `queue` currently in one of `statuses`.
    async fn list_job_names(
        &self,
        queue: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<String>, BatchError>;
}

impl<B: BatchService> BatchService for &B {
    async fn submit_job(
        &self,
        request: &SubmitJobRequest,
    ) -> Result<SubmitJobResponse, BatchError> {
        (**self).submit_job(request).await
    }

    async fn list_job_names(
        &self,
        queue: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<String>, BatchError> {
        (**self).list_job_names(queue, statuses).await
    }
}
