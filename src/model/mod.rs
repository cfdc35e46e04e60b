//! The entities of section 3: plain structs/enums, no persistence or
//! transport logic attached.

mod destination_ae;
mod export_task;
mod inference_job;
mod inference_request;
mod instance;
mod local_ae;
mod source_ae;

pub use destination_ae::DestinationApplicationEntity;
pub use export_task::ExportTask;
pub use inference_job::{InferenceJob, JobState};
pub use inference_request::{
    InferenceRequest, InputMetadataDetails, InputResource, OutputResource, RequestState,
    RequestStatus,
};
pub use instance::InstanceStorageInfo;
pub use local_ae::LocalApplicationEntity;
pub use source_ae::SourceApplicationEntity;
