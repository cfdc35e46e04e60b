use serde::{Deserialize, Serialize};

use crate::types::{JobId, PayloadId, TaskId};

/// An export task delivered by the external results service (section 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportTask {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub payload_id: PayloadId,
    pub agent: String,
    /// Opaque JSON; for the SCU variant this is the destination selector.
    pub parameters: serde_json::Value,
    pub uris: Vec<String>,
    pub retries: u32,
}
