use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::InstanceStorageInfo;
use crate::types::{JobId, PayloadId, PipelineId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobState {
    Created,
    MetadataUploaded,
    PayloadUploaded,
    Started,
    Failed,
}

/// Section 3. Invariant: `state` only ever advances in the order declared
/// above; `Started` is terminal for this service.
///
/// `record_id` is a repository-internal key: it exists before the platform
/// assigns `job_id`, which the job processor does not have until
/// `JobSubmissionService` creates the platform job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceJob {
    pub record_id: Uuid,
    pub job_id: Option<JobId>,
    pub payload_id: Option<PayloadId>,
    pub job_name: String,
    pub pipeline_id: PipelineId,
    pub priority: u8,
    pub instances: Vec<InstanceStorageInfo>,
    pub state: JobState,
    pub retries: u32,
}

impl InferenceJob {
    /// Advances `state` if `next` is strictly later in the declared order;
    /// a no-op (not an error) otherwise, since callers drive this off
    /// repository polls that may race.
    pub fn advance(&mut self, next: JobState) {
        if next > self.state {
            self.state = next;
        }
    }
}
