mod ids;
mod priority;

pub use ids::{AeTitle, JobId, PayloadId, PipelineId, TaskId, TransactionId, Uid};
pub use priority::{map_priority_byte, ConfiguredPriority, JobPriority};
