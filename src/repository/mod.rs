//! The persistence seam (section 4.12): transactional CRUD for AE configs,
//! inference requests, and inference jobs, behind a trait so the rest of
//! the core never depends on a concrete database.

mod fake;
mod postgres;

pub use fake::FakeRepository;
pub use postgres::PostgresRepository;

use async_trait::async_trait;

use uuid::Uuid;

use crate::model::{
    DestinationApplicationEntity, InferenceJob, InferenceRequest, LocalApplicationEntity,
    SourceApplicationEntity,
};
use crate::types::{AeTitle, TransactionId};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_local_aes(&self) -> anyhow::Result<Vec<LocalApplicationEntity>>;
    async fn get_local_ae(&self, ae_title: &AeTitle) -> anyhow::Result<Option<LocalApplicationEntity>>;
    async fn put_local_ae(&self, ae: LocalApplicationEntity) -> anyhow::Result<()>;
    async fn delete_local_ae(&self, ae_title: &AeTitle) -> anyhow::Result<()>;

    async fn list_source_aes(&self) -> anyhow::Result<Vec<SourceApplicationEntity>>;
    async fn put_source_ae(&self, ae: SourceApplicationEntity) -> anyhow::Result<()>;

    async fn list_destination_aes(&self) -> anyhow::Result<Vec<DestinationApplicationEntity>>;
    async fn get_destination_ae(&self, name: &str) -> anyhow::Result<Option<DestinationApplicationEntity>>;
    async fn put_destination_ae(&self, ae: DestinationApplicationEntity) -> anyhow::Result<()>;

    async fn put_inference_request(&self, request: InferenceRequest) -> anyhow::Result<()>;
    async fn get_inference_request(
        &self,
        transaction_id: &TransactionId,
    ) -> anyhow::Result<Option<InferenceRequest>>;
    /// Requests currently in state `Queued`, in no particular order.
    async fn list_queued_inference_requests(&self) -> anyhow::Result<Vec<InferenceRequest>>;

    async fn put_inference_job(&self, job: InferenceJob) -> anyhow::Result<()>;
    async fn get_inference_job(&self, record_id: Uuid) -> anyhow::Result<Option<InferenceJob>>;
    /// Jobs currently in state `Created`, drained by `JobSubmissionService`.
    async fn list_created_inference_jobs(&self) -> anyhow::Result<Vec<InferenceJob>>;
}
