//! The platform client seam (section 4.13 / spec section 6): four
//! interfaces onto the external job-execution platform, each with
//! idempotent semantics on its primary key.

mod http_client;
mod retry;

pub use http_client::HttpPlatformClient;

use async_trait::async_trait;
use camino::Utf8Path;

use crate::types::{JobId, JobPriority, PayloadId, PipelineId};

#[async_trait]
pub trait JobsClient: Send + Sync {
    async fn create(
        &self,
        pipeline_id: &PipelineId,
        job_name: &str,
        priority: JobPriority,
    ) -> anyhow::Result<(JobId, PayloadId)>;

    async fn start(&self, job_id: &JobId) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PayloadsClient: Send + Sync {
    async fn upload(&self, payload_id: &PayloadId, path: &Utf8Path) -> anyhow::Result<()>;
    async fn download(&self, payload_id: &PayloadId, uri: &str) -> anyhow::Result<Vec<u8>>;
}

/// A pending task as reported by `getPending`.
#[derive(Debug, Clone)]
pub struct PendingExportTask {
    pub task_id: crate::types::TaskId,
    pub job_id: JobId,
    pub payload_id: PayloadId,
    pub parameters: serde_json::Value,
    pub uris: Vec<String>,
    pub retries: u32,
}

#[async_trait]
pub trait ResultsClient: Send + Sync {
    async fn get_pending(&self, agent: &str, limit: u32) -> anyhow::Result<Vec<PendingExportTask>>;
    async fn report_success(&self, task_id: &crate::types::TaskId) -> anyhow::Result<()>;
    async fn report_failure(&self, task_id: &crate::types::TaskId, retry: bool) -> anyhow::Result<()>;
}
